//! Chat-with-RAG handler.
//!
//! Classifies the question, plans and routes the search, runs it, generates
//! the answer and records the exchange in the thread. Failures collapse to a
//! fallback payload carrying `error` and `errorCode` instead of an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use soulo_api::ChatMessageParam;
use soulo_core::config::RetrievalConfig;
use soulo_core::constants::FALLBACK_RESPONSE;
use soulo_core::error::{SouloError, SouloResult};
use soulo_models::{ChatThread, ScoredEntry};

use crate::chat::ChatService;
use crate::event_bus::{AppEvent, EventBus};
use crate::service::{Service, ServiceState, StateCell};
use crate::store::JournalStore;
use crate::traits::LanguageModel;

use super::classifier::{classify_complexity, ComplexityAnalysis};
use super::executor::{SearchDiagnostics, SearchExecutor};
use super::generator::{excerpt, ResponseGenerator};
use super::planner::{plan_query, QueryPlan};
use super::router::{route, RoutingDecision};
use super::sql_guard::SqlGuard;

/// Characters of entry text included in a reference.
const SNIPPET_CHARS: usize = 160;

/// A chat question.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRagRequest {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Client-side history, used when no thread is given.
    #[serde(default, alias = "conversationHistory")]
    pub history: Option<Vec<ChatMessageParam>>,
    /// Start a new thread titled after the message.
    #[serde(default)]
    pub create_thread: bool,
}

impl ChatRagRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Default::default() }
    }
}

/// An entry cited by an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryReference {
    pub id: String,
    pub date: String,
    pub snippet: String,
    pub similarity: Option<f32>,
    pub sentiment: Option<f64>,
    pub emotions: Vec<String>,
    pub themes: Vec<String>,
}

impl From<&ScoredEntry> for EntryReference {
    fn from(scored: &ScoredEntry) -> Self {
        let entry = &scored.entry;
        Self {
            id: entry.id.clone(),
            date: entry.created_at.format("%Y-%m-%d").to_string(),
            snippet: excerpt(entry.text(), SNIPPET_CHARS),
            similarity: scored.similarity,
            sentiment: entry.sentiment,
            emotions: entry.top_emotions(3).into_iter().map(|(name, _)| name.to_string()).collect(),
            themes: entry.themes.clone(),
        }
    }
}

/// Classifier, planner and router output for a question.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPreview {
    pub complexity: ComplexityAnalysis,
    pub plan: QueryPlan,
    pub routing: RoutingDecision,
}

/// Analysis attached to an answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RagAnalysis {
    #[serde(flatten)]
    pub preview: QueryPreview,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

/// Response body of the chat handler.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRagResponse {
    pub response: String,
    pub references: Vec<EntryReference>,
    pub analysis: Option<RagAnalysis>,
    pub diagnostics: Option<SearchDiagnostics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ChatRagResponse {
    /// Apology payload for a failed request.
    pub fn fallback(err: &SouloError, thread_id: Option<String>) -> Self {
        Self {
            response: FALLBACK_RESPONSE.to_string(),
            references: Vec::new(),
            analysis: None,
            diagnostics: None,
            thread_id,
            error: Some(err.to_string()),
            error_code: Some(err.error_code().to_string()),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

/// Classify, plan and route a question without any I/O.
pub fn preview(message: &str, config: &RetrievalConfig, now: DateTime<Utc>) -> QueryPreview {
    let complexity = classify_complexity(message, config);
    let plan = plan_query(message, &complexity, config, now);
    let routing = route(&complexity, &plan, config);
    QueryPreview { complexity, plan, routing }
}

/// The retrieval-augmented chat pipeline.
pub struct RagPipeline {
    state: StateCell,
    store: Arc<dyn JournalStore>,
    chat: Arc<ChatService>,
    executor: SearchExecutor,
    generator: ResponseGenerator,
    config: RetrievalConfig,
    default_user_id: String,
    event_bus: EventBus,
}

impl RagPipeline {
    pub fn new(
        store: Arc<dyn JournalStore>,
        llm: Arc<dyn LanguageModel>,
        chat: Arc<ChatService>,
        config: RetrievalConfig,
        default_user_id: &str,
        event_bus: EventBus,
    ) -> Self {
        let executor = SearchExecutor::new(
            store.clone(),
            llm.clone(),
            SqlGuard::new(config.sql_row_limit),
            config.recent_fallback_count,
        );
        Self {
            state: StateCell::new(),
            store,
            chat,
            executor,
            generator: ResponseGenerator::new(llm),
            config,
            default_user_id: default_user_id.to_string(),
            event_bus,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Classifier, planner and router output for a question.
    pub fn preview(&self, message: &str, now: DateTime<Utc>) -> QueryPreview {
        preview(message, &self.config, now)
    }

    /// Answer a question, returning a fallback payload on any failure.
    pub async fn handle(&self, request: ChatRagRequest) -> ChatRagResponse {
        let thread_id = request.thread_id.clone();
        match self.answer(request, Utc::now()).await {
            Ok(response) => response,
            Err(e) => {
                error!("chat-with-rag failed: {e}");
                self.event_bus.emit(AppEvent::ChatFailed {
                    error_code: e.error_code().to_string(),
                });
                ChatRagResponse::fallback(&e, thread_id)
            }
        }
    }

    /// Answer a question.
    pub async fn answer(&self, request: ChatRagRequest, now: DateTime<Utc>) -> SouloResult<ChatRagResponse> {
        let question = request.message.trim();
        if question.is_empty() {
            return Err(SouloError::InvalidInput("message is empty".into()));
        }
        let user_id = request
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.default_user_id);

        let preview = self.preview(question, now);
        let history_limit = preview.complexity.history_messages;

        let thread = match request.thread_id.as_deref() {
            Some(id) => Some(self.chat.get_user_thread(id, user_id).await?),
            None if request.create_thread => Some(self.chat.create_thread(user_id, None).await?),
            None => None,
        };

        let mut history = match &thread {
            Some(t) => self.chat.history(&t.id, history_limit).await?,
            None => Vec::new(),
        };
        if history.is_empty() {
            history = request.history.clone().unwrap_or_default();
        }

        let outcome = self
            .executor
            .execute(question, user_id, &preview.plan, &preview.routing, now)
            .await?;

        let answer = self
            .generator
            .generate(question, &preview.complexity, &preview.plan, &outcome, &history, now)
            .await?;

        let references: Vec<EntryReference> = outcome.entries.iter().map(EntryReference::from).collect();
        let analysis = RagAnalysis { preview, sql: outcome.sql.clone() };

        if let Some(thread) = &thread {
            self.persist(thread, question, &answer, &references, &analysis).await;
        }

        info!(
            complexity = %analysis.preview.complexity.complexity,
            strategy = %analysis.preview.plan.strategy,
            entries = references.len(),
            store = self.store.name(),
            "answered question"
        );
        self.event_bus.emit(AppEvent::ChatAnswered {
            thread_id: thread.as_ref().map(|t| t.id.clone()),
            complexity: analysis.preview.complexity.complexity.to_string(),
            strategy: analysis.preview.plan.strategy.to_string(),
            route_used: outcome.diagnostics.route_used.map(|r| r.to_string()),
            entries: references.len(),
            elapsed_ms: outcome.diagnostics.elapsed_ms,
        });

        Ok(ChatRagResponse {
            response: answer,
            references,
            analysis: Some(analysis),
            diagnostics: Some(outcome.diagnostics),
            thread_id: thread.map(|t| t.id),
            error: None,
            error_code: None,
        })
    }

    /// Store the exchange; the answer is returned even if this fails.
    async fn persist(
        &self,
        thread: &ChatThread,
        question: &str,
        answer: &str,
        references: &[EntryReference],
        analysis: &RagAnalysis,
    ) {
        let references = serde_json::to_value(references).unwrap_or_default();
        let analysis = serde_json::to_value(analysis).unwrap_or_default();
        if let Err(e) = self
            .chat
            .record_exchange(thread, question, answer, references, analysis)
            .await
        {
            warn!("failed to record exchange in thread {}: {e}", thread.id);
        }
    }
}

impl Service for RagPipeline {
    fn name(&self) -> &str { "rag" }
    fn state(&self) -> ServiceState { self.state.get() }
    fn init(&self) -> SouloResult<()> {
        self.state.set(ServiceState::Running);
        info!(
            "rag pipeline initialized ({} store, sql row limit {})",
            self.store.name(),
            self.config.sql_row_limit
        );
        Ok(())
    }
    fn shutdown(&self) -> SouloResult<()> {
        self.state.set(ServiceState::Stopped);
        Ok(())
    }
}
