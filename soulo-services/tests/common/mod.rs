//! Shared test utilities for integration tests.
//!
//! In-process doubles for the vendor APIs and a seeded local journal.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use soulo_api::{ChatMessageParam, CompletionOptions, SentimentScore, TranscriptionResult};
use soulo_core::config::{DatabaseConfig, RetrievalConfig};
use soulo_core::error::{SouloError, SouloResult};
use soulo_models::queries::DateWindow;
use soulo_models::{ChatMessage, ChatThread, Database, JournalEntry, ScoredEntry};
use soulo_services::chat::ChatService;
use soulo_services::event_bus::EventBus;
use soulo_services::store::{JournalStore, LocalStore, SqlDialect, SqlRow};
use soulo_services::traits::{LanguageModel, SentimentAnalyzer, Transcriber};
use soulo_services::RagPipeline;

pub const USER: &str = "user-1";
pub const OTHER_USER: &str = "user-2";

/// Keyword buckets used as embedding dimensions.
const BUCKETS: [&[&str]; 4] = [
    &["hike", "hiking", "trail", "mountain"],
    &["work", "boss", "deadline", "office"],
    &["family", "mom", "dad", "sister"],
    &["sleep", "tired", "insomnia", "nap"],
];

/// Bag-of-buckets embedding with a small constant component so no vector
/// is zero.
pub fn fake_embedding(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = BUCKETS
        .iter()
        .map(|words| if words.iter().any(|w| lower.contains(w)) { 1.0 } else { 0.0 })
        .collect();
    vector.push(0.1);
    vector
}

/// Language-model double.
///
/// Answers SQL prompts with `sql`, emotion prompts with fixed JSON,
/// transcript cleanup with the input, and everything else with a canned
/// answer. Every answer request is recorded.
pub struct FakeModel {
    pub sql: Mutex<String>,
    pub fail_embed: bool,
    pub fail_answer: bool,
    pub embed_delay: Option<Duration>,
    pub answer_requests: Mutex<Vec<Vec<ChatMessageParam>>>,
}

impl FakeModel {
    pub fn new() -> Self {
        Self {
            sql: Mutex::new("SELECT COUNT(*) AS entries FROM journal_entries WHERE user_id = :user_id".into()),
            fail_embed: false,
            fail_answer: false,
            embed_delay: None,
            answer_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_embeddings() -> Self {
        Self { fail_embed: true, ..Self::new() }
    }

    pub fn failing_answers() -> Self {
        Self { fail_answer: true, ..Self::new() }
    }

    pub fn slow_embeddings(delay: Duration) -> Self {
        Self { embed_delay: Some(delay), ..Self::new() }
    }

    pub fn set_sql(&self, sql: &str) {
        *self.sql.lock().unwrap() = sql.to_string();
    }

    pub fn last_answer_request(&self) -> Vec<ChatMessageParam> {
        self.answer_requests.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn complete(&self, messages: &[ChatMessageParam], _options: &CompletionOptions) -> SouloResult<String> {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or_default();
        if system.contains("read-only") {
            return Ok(self.sql.lock().unwrap().clone());
        }
        if system.starts_with("Identify the emotions") {
            return Ok(r#"{"emotions": {"joy": 0.8, "calm": 0.3}, "themes": ["nature"]}"#.into());
        }
        if system.starts_with("Clean up") {
            return Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default());
        }
        self.answer_requests.lock().unwrap().push(messages.to_vec());
        if self.fail_answer {
            return Err(SouloError::Generation("model unavailable".into()));
        }
        Ok("Here is what your journal says.".into())
    }

    async fn embed(&self, text: &str) -> SouloResult<Vec<f32>> {
        if let Some(delay) = self.embed_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_embed {
            return Err(SouloError::Api {
                service: "llm".into(),
                status: 503,
                message: "embeddings unavailable".into(),
            });
        }
        Ok(fake_embedding(text))
    }
}

/// Transcriber double returning fixed text, or failing when `text` is `None`.
pub struct FakeTranscriber {
    pub text: Option<String>,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _audio: &[u8], _mime_type: &str) -> SouloResult<TranscriptionResult> {
        match &self.text {
            Some(text) => Ok(TranscriptionResult {
                text: text.clone(),
                language: Some("en".into()),
                duration: Some(12.5),
            }),
            None => Err(SouloError::Transcription("audio could not be decoded".into())),
        }
    }
}

pub struct FakeSentiment;

#[async_trait]
impl SentimentAnalyzer for FakeSentiment {
    async fn analyze(&self, _text: &str) -> SouloResult<SentimentScore> {
        Ok(SentimentScore::clamped(0.6, 1.2))
    }
}

/// Create a temporary database with full schema and migrations applied.
/// Returns the Database and the TempDir (must be held alive for the duration of the test).
pub fn create_test_db() -> (Database, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("test.db");
    let config = DatabaseConfig::default();
    let db = Database::init(&path, &config).expect("failed to init test database");
    (db, dir)
}

/// Create an EventBus with a small buffer suitable for tests.
pub fn create_test_event_bus() -> EventBus {
    EventBus::new(64)
}

/// Store an entry written `days_ago` days before `now`, embedded with
/// [`fake_embedding`].
pub async fn add_entry(
    store: &dyn JournalStore,
    user_id: &str,
    text: &str,
    days_ago: i64,
    now: DateTime<Utc>,
) -> JournalEntry {
    let mut entry = JournalEntry::new(user_id, text);
    entry.created_at = now - chrono::Duration::days(days_ago);
    entry.embedding = Some(fake_embedding(text));
    entry.sentiment = Some(0.4);
    store.insert_entry(&entry).await.expect("failed to insert entry")
}

/// Seed a realistic journal.
///
/// Creates for [`USER`]:
/// - 2 hiking entries (1 and 3 days ago)
/// - 2 work entries (5 and 40 days ago)
/// - 1 family entry (10 days ago)
/// - 1 sleep entry (2 days ago)
///
/// and 1 hiking entry for [`OTHER_USER`].
pub async fn seed_journal(store: &dyn JournalStore, now: DateTime<Utc>) {
    add_entry(store, USER, "Went hiking on the ridge trail, the mountain air cleared my head.", 1, now).await;
    add_entry(store, USER, "Short hike after dinner, legs sore but happy.", 3, now).await;
    add_entry(store, USER, "Deadline pressure at work, my boss moved the launch again.", 5, now).await;
    add_entry(store, USER, "Long day at the office, felt anxious about the review.", 40, now).await;
    add_entry(store, USER, "Dinner with mom and my sister, lots of laughing.", 10, now).await;
    add_entry(store, USER, "Could not sleep again, insomnia until 3am.", 2, now).await;
    add_entry(store, OTHER_USER, "Private hiking notes from someone else.", 1, now).await;
}

/// A local store over a fresh temp database.
pub fn create_test_store() -> (Arc<LocalStore>, TempDir) {
    let (db, dir) = create_test_db();
    (Arc::new(LocalStore::new(db)), dir)
}

/// Local store that records the date window of every similarity search.
pub struct RecordingStore {
    pub inner: Arc<LocalStore>,
    pub windows: Mutex<Vec<Option<DateWindow>>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<LocalStore>) -> Self {
        Self { inner, windows: Mutex::new(Vec::new()) }
    }

    pub fn searched_windows(&self) -> Vec<Option<DateWindow>> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl JournalStore for RecordingStore {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn dialect(&self) -> SqlDialect {
        self.inner.dialect()
    }

    async fn match_entries(
        &self,
        user_id: &str,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
        window: Option<&DateWindow>,
    ) -> SouloResult<Vec<ScoredEntry>> {
        self.windows.lock().unwrap().push(window.copied());
        self.inner.match_entries(user_id, embedding, threshold, limit, window).await
    }

    async fn execute_query(&self, sql: &str, user_id: &str) -> SouloResult<Vec<SqlRow>> {
        self.inner.execute_query(sql, user_id).await
    }

    async fn recent_entries(&self, user_id: &str, limit: usize) -> SouloResult<Vec<JournalEntry>> {
        self.inner.recent_entries(user_id, limit).await
    }

    async fn list_entries(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
        window: Option<&DateWindow>,
    ) -> SouloResult<Vec<JournalEntry>> {
        self.inner.list_entries(user_id, offset, limit, window).await
    }

    async fn search_entries(&self, user_id: &str, keyword: &str, limit: usize) -> SouloResult<Vec<JournalEntry>> {
        self.inner.search_entries(user_id, keyword, limit).await
    }

    async fn entries_by_ids(&self, ids: &[String]) -> SouloResult<Vec<JournalEntry>> {
        self.inner.entries_by_ids(ids).await
    }

    async fn entries_missing_embeddings(&self, user_id: &str, limit: usize) -> SouloResult<Vec<JournalEntry>> {
        self.inner.entries_missing_embeddings(user_id, limit).await
    }

    async fn insert_entry(&self, entry: &JournalEntry) -> SouloResult<JournalEntry> {
        self.inner.insert_entry(entry).await
    }

    async fn update_embedding(&self, entry_id: &str, embedding: &[f32]) -> SouloResult<bool> {
        self.inner.update_embedding(entry_id, embedding).await
    }

    async fn delete_entry(&self, entry_id: &str) -> SouloResult<bool> {
        self.inner.delete_entry(entry_id).await
    }

    async fn create_thread(&self, thread: &ChatThread) -> SouloResult<ChatThread> {
        self.inner.create_thread(thread).await
    }

    async fn get_thread(&self, thread_id: &str) -> SouloResult<Option<ChatThread>> {
        self.inner.get_thread(thread_id).await
    }

    async fn list_threads(&self, user_id: &str, limit: usize) -> SouloResult<Vec<ChatThread>> {
        self.inner.list_threads(user_id, limit).await
    }

    async fn rename_thread(&self, thread_id: &str, title: &str) -> SouloResult<bool> {
        self.inner.rename_thread(thread_id, title).await
    }

    async fn touch_thread(&self, thread_id: &str) -> SouloResult<()> {
        self.inner.touch_thread(thread_id).await
    }

    async fn delete_thread(&self, thread_id: &str) -> SouloResult<bool> {
        self.inner.delete_thread(thread_id).await
    }

    async fn append_message(&self, message: &ChatMessage) -> SouloResult<()> {
        self.inner.append_message(message).await
    }

    async fn thread_messages(&self, thread_id: &str, limit: usize) -> SouloResult<Vec<ChatMessage>> {
        self.inner.thread_messages(thread_id, limit).await
    }
}

/// Pipeline, chat service and model over the given store.
pub fn create_pipeline(
    store: Arc<LocalStore>,
    model: Arc<FakeModel>,
    config: RetrievalConfig,
) -> (RagPipeline, Arc<ChatService>, EventBus) {
    create_pipeline_over(store, model, config)
}

/// Like [`create_pipeline`], over any store.
pub fn create_pipeline_over(
    store: Arc<dyn JournalStore>,
    model: Arc<FakeModel>,
    config: RetrievalConfig,
) -> (RagPipeline, Arc<ChatService>, EventBus) {
    let bus = create_test_event_bus();
    let chat = Arc::new(ChatService::new(store.clone(), bus.clone()));
    let pipeline = RagPipeline::new(store, model, chat.clone(), config, USER, bus.clone());
    (pipeline, chat, bus)
}
