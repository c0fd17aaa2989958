//! Chat service for managing conversations with the journal assistant.
//!
//! Handles thread CRUD, message history, automatic titles derived from the
//! first user message, and recording question/answer exchanges.

use std::sync::Arc;

use tracing::{debug, info};

use soulo_api::ChatMessageParam;
use soulo_core::constants::roles;
use soulo_core::error::{SouloError, SouloResult};
use soulo_models::models::chat_thread::{DEFAULT_TITLE, MAX_TITLE_CHARS};
use soulo_models::{ChatMessage, ChatThread};

use crate::event_bus::{AppEvent, EventBus};
use crate::service::{Service, ServiceState, StateCell};
use crate::store::JournalStore;

/// Default number of threads returned by a listing.
pub const DEFAULT_THREAD_LIMIT: usize = 50;

/// Service for chat threads and their messages.
pub struct ChatService {
    state: StateCell,
    store: Arc<dyn JournalStore>,
    event_bus: EventBus,
}

impl ChatService {
    /// Create a new ChatService.
    pub fn new(store: Arc<dyn JournalStore>, event_bus: EventBus) -> Self {
        Self {
            state: StateCell::new(),
            store,
            event_bus,
        }
    }

    /// Create a thread. Without a title the thread starts as
    /// "New conversation" and is named after its first message.
    pub async fn create_thread(&self, user_id: &str, title: Option<&str>) -> SouloResult<ChatThread> {
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => clamp_title(t),
            None => DEFAULT_TITLE.to_string(),
        };
        let thread = self.store.create_thread(&ChatThread::new(user_id, &title)).await?;
        info!("created thread {} ({})", thread.id, thread.title);
        self.event_bus.emit(AppEvent::ThreadCreated {
            thread_id: thread.id.clone(),
        });
        Ok(thread)
    }

    /// Create a thread titled after the message that starts it.
    pub async fn create_thread_for_message(&self, user_id: &str, message: &str) -> SouloResult<ChatThread> {
        let title = ChatThread::title_from_message(message);
        self.create_thread(user_id, Some(&title)).await
    }

    /// A user's threads, most recently active first.
    pub async fn list_threads(&self, user_id: &str, limit: usize) -> SouloResult<Vec<ChatThread>> {
        self.store.list_threads(user_id, limit).await
    }

    /// Look up a thread, failing with `ThreadNotFound`.
    pub async fn get_thread(&self, thread_id: &str) -> SouloResult<ChatThread> {
        self.store
            .get_thread(thread_id)
            .await?
            .ok_or_else(|| SouloError::ThreadNotFound(thread_id.to_string()))
    }

    /// Look up a thread owned by `user_id`. Threads of other users are
    /// reported as missing.
    pub async fn get_user_thread(&self, thread_id: &str, user_id: &str) -> SouloResult<ChatThread> {
        let thread = self.get_thread(thread_id).await?;
        if thread.user_id != user_id {
            return Err(SouloError::ThreadNotFound(thread_id.to_string()));
        }
        Ok(thread)
    }

    /// The last `limit` messages of a thread in chronological order.
    pub async fn messages(&self, thread_id: &str, limit: usize) -> SouloResult<Vec<ChatMessage>> {
        self.store.thread_messages(thread_id, limit).await
    }

    /// Thread history in completion-request form.
    pub async fn history(&self, thread_id: &str, limit: usize) -> SouloResult<Vec<ChatMessageParam>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let messages = self.messages(thread_id, limit).await?;
        Ok(messages
            .into_iter()
            .map(|m| ChatMessageParam::new(&m.role, m.content))
            .collect())
    }

    /// Rename a thread.
    pub async fn rename_thread(&self, thread_id: &str, title: &str) -> SouloResult<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SouloError::InvalidInput("thread title cannot be empty".into()));
        }
        let title = clamp_title(title);
        if !self.store.rename_thread(thread_id, &title).await? {
            return Err(SouloError::ThreadNotFound(thread_id.to_string()));
        }
        self.event_bus.emit(AppEvent::ThreadRenamed {
            thread_id: thread_id.to_string(),
            title,
        });
        Ok(())
    }

    /// Delete a thread and its messages.
    pub async fn delete_thread(&self, thread_id: &str) -> SouloResult<()> {
        if !self.store.delete_thread(thread_id).await? {
            return Err(SouloError::ThreadNotFound(thread_id.to_string()));
        }
        info!("deleted thread {thread_id}");
        self.event_bus.emit(AppEvent::ThreadDeleted {
            thread_id: thread_id.to_string(),
        });
        Ok(())
    }

    /// Append a message and bump the thread's activity time.
    pub async fn append_message(&self, thread_id: &str, role: &str, content: &str) -> SouloResult<ChatMessage> {
        let message = ChatMessage::new(thread_id, role, content)?;
        self.store.append_message(&message).await?;
        self.store.touch_thread(thread_id).await?;
        Ok(message)
    }

    /// Store a question and its answer. The assistant message carries the
    /// cited entries and the pipeline analysis. An unnamed thread is titled
    /// after the question.
    pub async fn record_exchange(
        &self,
        thread: &ChatThread,
        question: &str,
        answer: &str,
        references: serde_json::Value,
        analysis: serde_json::Value,
    ) -> SouloResult<()> {
        let user_message = ChatMessage::new(&thread.id, roles::USER, question)?;
        self.store.append_message(&user_message).await?;

        let mut reply = ChatMessage::new(&thread.id, roles::ASSISTANT, answer)?;
        // keep the reply ordered after the question on equal clocks
        if reply.created_at <= user_message.created_at {
            reply.created_at = user_message.created_at + chrono::Duration::milliseconds(1);
        }
        reply.reference_entries = Some(references);
        reply.analysis = Some(analysis);
        self.store.append_message(&reply).await?;

        if thread.title == DEFAULT_TITLE {
            let title = ChatThread::title_from_message(question);
            if title != DEFAULT_TITLE {
                self.store.rename_thread(&thread.id, &title).await?;
                debug!("titled thread {} from first message", thread.id);
            }
        }
        self.store.touch_thread(&thread.id).await
    }
}

fn clamp_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title.to_string();
    }
    let cut: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
    format!("{}...", cut.trim_end())
}

impl Service for ChatService {
    fn name(&self) -> &str { "chat" }
    fn state(&self) -> ServiceState { self.state.get() }
    fn init(&self) -> SouloResult<()> {
        self.state.set(ServiceState::Running);
        info!("chat service initialized ({} store)", self.store.name());
        Ok(())
    }
    fn shutdown(&self) -> SouloResult<()> {
        self.state.set(ServiceState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use soulo_models::Database;

    fn create_service() -> ChatService {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let config = soulo_core::config::DatabaseConfig::default();
        let db = Database::init(&path, &config).unwrap();
        std::mem::forget(dir);
        ChatService::new(Arc::new(LocalStore::new(db)), EventBus::new(16))
    }

    #[test]
    fn test_chat_service_name() {
        let svc = create_service();
        assert_eq!(svc.name(), "chat");
        svc.init().unwrap();
        assert!(svc.is_healthy());
    }

    #[tokio::test]
    async fn test_thread_crud() {
        let svc = create_service();
        let mut rx = svc.event_bus.subscribe();

        let thread = svc.create_thread("u1", None).await.unwrap();
        assert_eq!(thread.title, DEFAULT_TITLE);
        assert!(matches!(rx.recv().await.unwrap(), AppEvent::ThreadCreated { .. }));

        svc.rename_thread(&thread.id, "  Sleep questions  ").await.unwrap();
        assert_eq!(svc.get_thread(&thread.id).await.unwrap().title, "Sleep questions");
        assert!(svc.rename_thread(&thread.id, "   ").await.is_err());

        assert_eq!(svc.list_threads("u1", 10).await.unwrap().len(), 1);
        assert!(svc.list_threads("u2", 10).await.unwrap().is_empty());
        assert!(matches!(
            svc.get_user_thread(&thread.id, "u2").await,
            Err(SouloError::ThreadNotFound(_))
        ));

        svc.delete_thread(&thread.id).await.unwrap();
        assert!(matches!(svc.get_thread(&thread.id).await, Err(SouloError::ThreadNotFound(_))));
        assert!(svc.delete_thread(&thread.id).await.is_err());
    }

    #[tokio::test]
    async fn test_record_exchange_titles_thread() {
        let svc = create_service();
        let thread = svc.create_thread("u1", None).await.unwrap();
        svc.record_exchange(
            &thread,
            "How did I sleep during the conference week in Berlin?",
            "You mentioned sleeping badly on two nights.",
            serde_json::json!([{"id": "e1"}]),
            serde_json::json!({"complexity": "simple"}),
        )
        .await
        .unwrap();

        let renamed = svc.get_thread(&thread.id).await.unwrap();
        assert_eq!(renamed.title, "How did I sleep during the");

        let messages = svc.messages(&thread.id, 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].reference_entries, Some(serde_json::json!([{"id": "e1"}])));

        let history = svc.history(&thread.id, 1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, "assistant");
    }

    #[tokio::test]
    async fn test_append_message_rejects_system_role() {
        let svc = create_service();
        let thread = svc.create_thread("u1", Some("Named")).await.unwrap();
        assert!(svc.append_message(&thread.id, "system", "nope").await.is_err());
        svc.append_message(&thread.id, "user", "hello").await.unwrap();
        assert_eq!(svc.messages(&thread.id, 10).await.unwrap().len(), 1);
    }

    #[test]
    fn test_clamp_title() {
        assert_eq!(clamp_title("short"), "short");
        let long = "a".repeat(80);
        let clamped = clamp_title(&long);
        assert_eq!(clamped.chars().count(), MAX_TITLE_CHARS);
        assert!(clamped.ends_with("..."));
    }
}
