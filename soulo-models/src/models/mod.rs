//! Entity model definitions.

pub mod journal_entry;
pub mod chat_thread;
pub mod chat_message;
pub mod reminder;
