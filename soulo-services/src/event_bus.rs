//! Fan-out of journal and chat activity to whoever is listening: the
//! `serve` command prints it, `journal reindex` drives its progress bar.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

/// Application-level events emitted by the services.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A journal entry was stored.
    EntryCreated {
        entry_id: String,
        user_id: String,
        has_embedding: bool,
    },
    /// An optional processing step failed and the entry was saved without it.
    EntryStepSkipped {
        step: String,
        error: String,
    },
    /// Speech-to-text failed after all retries.
    TranscriptionFailed {
        error: String,
    },
    /// Reindexing progress.
    ReindexProgress {
        processed: usize,
        failed: usize,
        total: usize,
    },
    /// The retrieval pipeline answered a question.
    ChatAnswered {
        thread_id: Option<String>,
        complexity: String,
        strategy: String,
        route_used: Option<String>,
        entries: usize,
        elapsed_ms: u64,
    },
    /// The retrieval pipeline fell back to the apology response.
    ChatFailed {
        error_code: String,
    },
    /// A chat thread was created.
    ThreadCreated {
        thread_id: String,
    },
    /// A chat thread was renamed.
    ThreadRenamed {
        thread_id: String,
        title: String,
    },
    /// A chat thread was deleted.
    ThreadDeleted {
        thread_id: String,
    },
    /// The reminder schedule changed.
    RemindersChanged {
        count: usize,
    },
}

/// Broadcast channel of [`AppEvent`]s. A receiver that falls more than
/// `capacity` events behind gets `Lagged` and skips ahead.
#[derive(Clone)]
pub struct EventBus {
    tx: Arc<broadcast::Sender<AppEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: Arc::new(broadcast::channel(capacity.max(1)).0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Deliver to current subscribers; dropped silently when there are none.
    pub fn emit(&self, event: AppEvent) {
        let kind = event.kind();
        let delivered = self.tx.send(event).unwrap_or(0);
        trace!(kind, delivered, "event");
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl AppEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EntryCreated { .. } => "entry_created",
            Self::EntryStepSkipped { .. } => "entry_step_skipped",
            Self::TranscriptionFailed { .. } => "transcription_failed",
            Self::ReindexProgress { .. } => "reindex_progress",
            Self::ChatAnswered { .. } => "chat_answered",
            Self::ChatFailed { .. } => "chat_failed",
            Self::ThreadCreated { .. } => "thread_created",
            Self::ThreadRenamed { .. } => "thread_renamed",
            Self::ThreadDeleted { .. } => "thread_deleted",
            Self::RemindersChanged { .. } => "reminders_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_thread_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(AppEvent::ThreadCreated {
            thread_id: "t-1".into(),
        });

        match rx.recv().await.unwrap() {
            AppEvent::ThreadCreated { thread_id } => assert_eq!(thread_id, "t-1"),
            _ => panic!("unexpected event type"),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_a_copy() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(AppEvent::RemindersChanged { count: 3 });

        match (rx1.recv().await.unwrap(), rx2.recv().await.unwrap()) {
            (AppEvent::RemindersChanged { count: c1 }, AppEvent::RemindersChanged { count: c2 }) => {
                assert_eq!((c1, c2), (3, 3));
            }
            _ => panic!("unexpected event types"),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::default();
        bus.emit(AppEvent::ChatFailed { error_code: "timeout".into() });
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(AppEvent::TranscriptionFailed { error: String::new() }.kind(), "transcription_failed");
    }
}
