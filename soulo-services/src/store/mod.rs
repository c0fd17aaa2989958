//! Journal stores.
//!
//! The retrieval pipeline and the journal/chat services read and write
//! through [`JournalStore`]. [`RemoteStore`] talks to the managed backend
//! (pgvector similarity and the SQL RPC run server-side); [`LocalStore`]
//! works over the SQLite database for offline use and tests.

pub mod local;
pub mod remote;

use async_trait::async_trait;

use soulo_core::error::SouloResult;
use soulo_models::queries::DateWindow;
use soulo_models::{ChatMessage, ChatThread, JournalEntry, ScoredEntry};

pub use local::LocalStore;
pub use remote::RemoteStore;

/// A row returned by a generated SQL statement.
pub type SqlRow = serde_json::Map<String, serde_json::Value>;

/// SQL dialect the store executes generated statements in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    Sqlite,
}

impl SqlDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::Sqlite => "SQLite",
        }
    }

    /// Table description handed to the model when it writes SQL.
    pub fn schema_description(&self) -> &'static str {
        match self {
            Self::Postgres => {
                "journal_entries(id uuid, user_id text, content text, transcript text, \
                 created_at timestamptz, duration_secs double precision, audio_url text, \
                 sentiment double precision (-1..1), sentiment_magnitude double precision, \
                 emotions jsonb (object of emotion name -> intensity 0..1), \
                 themes jsonb (array of strings), embedding vector)"
            }
            Self::Sqlite => {
                "journal_entries(id TEXT, user_id TEXT, content TEXT, transcript TEXT, \
                 created_at TEXT (RFC 3339 UTC), duration_secs REAL, audio_url TEXT, \
                 sentiment REAL (-1..1), sentiment_magnitude REAL, \
                 emotions TEXT (JSON object of emotion name -> intensity 0..1), \
                 themes TEXT (JSON array of strings), embedding BLOB)"
            }
        }
    }

    /// Dialect-specific idioms for dates and JSON columns.
    pub fn hints(&self) -> &'static str {
        match self {
            Self::Postgres => {
                "Use date_trunc/extract and interval arithmetic for dates, \
                 (emotions->>'joy')::float for an emotion score, jsonb_each_text(emotions) \
                 to iterate emotions and jsonb_array_elements_text(themes) for themes."
            }
            Self::Sqlite => {
                "Use strftime('%Y-%m', created_at) and date(created_at) for dates, \
                 CAST(json_extract(emotions, '$.joy') AS REAL) for an emotion score, \
                 json_each(emotions) to iterate emotions and json_each(themes) for themes."
            }
        }
    }
}

/// Persistence operations the services need, independent of where the
/// journal lives.
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Short name for logs ("remote", "local").
    fn name(&self) -> &'static str;

    fn dialect(&self) -> SqlDialect;

    // --- Entries ---

    /// Entries whose embedding has cosine similarity >= `threshold` to
    /// `embedding`, best first, at most `limit`.
    async fn match_entries(
        &self,
        user_id: &str,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
        window: Option<&DateWindow>,
    ) -> SouloResult<Vec<ScoredEntry>>;

    /// Execute a guarded read-only statement with `:user_id` bound.
    async fn execute_query(&self, sql: &str, user_id: &str) -> SouloResult<Vec<SqlRow>>;

    async fn recent_entries(&self, user_id: &str, limit: usize) -> SouloResult<Vec<JournalEntry>>;

    async fn list_entries(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
        window: Option<&DateWindow>,
    ) -> SouloResult<Vec<JournalEntry>>;

    async fn search_entries(&self, user_id: &str, keyword: &str, limit: usize) -> SouloResult<Vec<JournalEntry>>;

    async fn entries_by_ids(&self, ids: &[String]) -> SouloResult<Vec<JournalEntry>>;

    async fn entries_missing_embeddings(&self, user_id: &str, limit: usize) -> SouloResult<Vec<JournalEntry>>;

    async fn insert_entry(&self, entry: &JournalEntry) -> SouloResult<JournalEntry>;

    async fn update_embedding(&self, entry_id: &str, embedding: &[f32]) -> SouloResult<bool>;

    async fn delete_entry(&self, entry_id: &str) -> SouloResult<bool>;

    // --- Threads ---

    async fn create_thread(&self, thread: &ChatThread) -> SouloResult<ChatThread>;

    async fn get_thread(&self, thread_id: &str) -> SouloResult<Option<ChatThread>>;

    async fn list_threads(&self, user_id: &str, limit: usize) -> SouloResult<Vec<ChatThread>>;

    async fn rename_thread(&self, thread_id: &str, title: &str) -> SouloResult<bool>;

    async fn touch_thread(&self, thread_id: &str) -> SouloResult<()>;

    async fn delete_thread(&self, thread_id: &str) -> SouloResult<bool>;

    async fn append_message(&self, message: &ChatMessage) -> SouloResult<()>;

    /// The last `limit` messages of a thread in chronological order.
    async fn thread_messages(&self, thread_id: &str, limit: usize) -> SouloResult<Vec<ChatMessage>>;
}
