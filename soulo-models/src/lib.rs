//! Soulo Models - Database schema, models, migrations, and query builders.
//!
//! This crate owns local persistence: SQLite database initialization,
//! journal/chat/reminder entity models, versioned migrations, the embedding
//! codec, and query builders used by the local journal store.

pub mod db;
pub mod schema;
pub mod models;
pub mod queries;
pub mod migrations;
pub mod embedding;
pub mod timestamp;

// Re-export key types
pub use db::{Database, DatabaseStats, DiskUsage};
pub use models::journal_entry::{JournalEntry, ScoredEntry};
pub use models::chat_thread::ChatThread;
pub use models::chat_message::ChatMessage;
pub use models::reminder::Reminder;
