//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "Soulo";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// PostgREST path prefix on the managed backend.
pub const REST_PATH: &str = "/rest/v1";

/// Default vendor API timeout in milliseconds.
pub const DEFAULT_API_TIMEOUT_MS: u64 = 30_000;

/// Extended timeout multiplier for audio uploads and long completions.
pub const EXTENDED_TIMEOUT_MULTIPLIER: u64 = 4;

/// Database schema version.
pub const DB_SCHEMA_VERSION: i32 = 2;

/// Default page size when listing journal entries.
pub const DEFAULT_ENTRY_PAGE_SIZE: i64 = 20;

/// Maximum audio payload accepted for transcription (25 MB, the speech API limit).
pub const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

/// Maximum characters of a single entry included in the answer prompt.
pub const MAX_ENTRY_EXCERPT_CHARS: usize = 600;

/// Names of the managed tables and RPC functions.
pub mod tables {
    pub const JOURNAL_ENTRIES: &str = "journal_entries";
    pub const CHAT_THREADS: &str = "chat_threads";
    pub const CHAT_MESSAGES: &str = "chat_messages";

    /// Vector similarity RPC (pgvector cosine distance on the server side).
    pub const RPC_MATCH_ENTRIES: &str = "match_journal_entries";
    /// Read-only SQL execution RPC scoped to the calling user.
    pub const RPC_EXECUTE_QUERY: &str = "execute_journal_query";
}

/// Chat message roles.
pub mod roles {
    pub const SYSTEM: &str = "system";
    pub const USER: &str = "user";
    pub const ASSISTANT: &str = "assistant";

    /// Roles that may be persisted in a thread.
    pub const PERSISTED: &[&str] = &[USER, ASSISTANT];
}

/// Reminder notification defaults.
pub mod reminders {
    pub const DEFAULT_TITLE: &str = "Journal Reminder";
    pub const DEFAULT_BODY: &str = "Time to write in your journal!";
}

/// Text returned to the client when the chat pipeline fails outright.
pub const FALLBACK_RESPONSE: &str =
    "I'm sorry, I ran into a problem while looking through your journal. Please try again in a moment.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_constants() {
        assert_eq!(roles::PERSISTED.len(), 2);
        assert!(roles::PERSISTED.contains(&"assistant"));
        assert!(!roles::PERSISTED.contains(&roles::SYSTEM));
    }

    #[test]
    fn test_audio_limit() {
        assert_eq!(MAX_AUDIO_BYTES, 26_214_400);
    }
}
