//! Journal store backed by the managed backend.

use async_trait::async_trait;

use soulo_api::BackendClient;
use soulo_core::error::SouloResult;
use soulo_models::queries::DateWindow;
use soulo_models::{ChatMessage, ChatThread, JournalEntry, ScoredEntry};

use super::{JournalStore, SqlDialect, SqlRow};

/// PostgREST tables plus the match/query RPC functions.
#[derive(Clone)]
pub struct RemoteStore {
    client: BackendClient,
}

impl RemoteStore {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }
}

#[async_trait]
impl JournalStore for RemoteStore {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    async fn match_entries(
        &self,
        user_id: &str,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
        window: Option<&DateWindow>,
    ) -> SouloResult<Vec<ScoredEntry>> {
        self.client
            .match_journal_entries(embedding, threshold, limit, user_id, window)
            .await
    }

    async fn execute_query(&self, sql: &str, user_id: &str) -> SouloResult<Vec<SqlRow>> {
        self.client.execute_journal_query(sql, user_id).await
    }

    async fn recent_entries(&self, user_id: &str, limit: usize) -> SouloResult<Vec<JournalEntry>> {
        self.client.recent_journal_entries(user_id, limit).await
    }

    async fn list_entries(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
        window: Option<&DateWindow>,
    ) -> SouloResult<Vec<JournalEntry>> {
        self.client.list_journal_entries(user_id, offset, limit, window).await
    }

    async fn search_entries(&self, user_id: &str, keyword: &str, limit: usize) -> SouloResult<Vec<JournalEntry>> {
        self.client.search_journal_entries(user_id, keyword, limit).await
    }

    async fn entries_by_ids(&self, ids: &[String]) -> SouloResult<Vec<JournalEntry>> {
        self.client.journal_entries_by_ids(ids).await
    }

    async fn entries_missing_embeddings(&self, user_id: &str, limit: usize) -> SouloResult<Vec<JournalEntry>> {
        self.client.entries_missing_embeddings(user_id, limit).await
    }

    async fn insert_entry(&self, entry: &JournalEntry) -> SouloResult<JournalEntry> {
        self.client.insert_journal_entry(entry).await
    }

    async fn update_embedding(&self, entry_id: &str, embedding: &[f32]) -> SouloResult<bool> {
        self.client.update_entry_embedding(entry_id, embedding).await
    }

    async fn delete_entry(&self, entry_id: &str) -> SouloResult<bool> {
        self.client.delete_journal_entry(entry_id).await
    }

    async fn create_thread(&self, thread: &ChatThread) -> SouloResult<ChatThread> {
        self.client.create_thread(thread).await
    }

    async fn get_thread(&self, thread_id: &str) -> SouloResult<Option<ChatThread>> {
        self.client.get_thread(thread_id).await
    }

    async fn list_threads(&self, user_id: &str, limit: usize) -> SouloResult<Vec<ChatThread>> {
        self.client.list_threads(user_id, limit).await
    }

    async fn rename_thread(&self, thread_id: &str, title: &str) -> SouloResult<bool> {
        self.client.rename_thread(thread_id, title).await
    }

    async fn touch_thread(&self, thread_id: &str) -> SouloResult<()> {
        self.client.touch_thread(thread_id).await
    }

    async fn delete_thread(&self, thread_id: &str) -> SouloResult<bool> {
        self.client.delete_thread(thread_id).await
    }

    async fn append_message(&self, message: &ChatMessage) -> SouloResult<()> {
        self.client.insert_message(message).await
    }

    async fn thread_messages(&self, thread_id: &str, limit: usize) -> SouloResult<Vec<ChatMessage>> {
        self.client.thread_messages(thread_id, limit).await
    }
}
