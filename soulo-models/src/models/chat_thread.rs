//! Chat thread entity model.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use soulo_core::error::{SouloError, SouloResult};

use crate::timestamp;

/// Maximum title length derived from a first message.
pub const MAX_TITLE_CHARS: usize = 60;

/// Number of words taken from the first message for an automatic title.
pub const TITLE_WORDS: usize = 6;

/// Title of a thread that has not been named yet.
pub const DEFAULT_TITLE: &str = "New conversation";

/// A conversation with the journal assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatThread {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatThread {
    /// Create a new thread with a fresh UUID.
    pub fn new(user_id: &str, title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Derive a thread title from the first user message: the first few
    /// words, capped in length. Empty input yields "New conversation".
    pub fn title_from_message(message: &str) -> String {
        let words: Vec<&str> = message.split_whitespace().take(TITLE_WORDS).collect();
        if words.is_empty() {
            return DEFAULT_TITLE.to_string();
        }
        let joined = words.join(" ");
        if joined.chars().count() <= MAX_TITLE_CHARS {
            return joined;
        }
        let cut: String = joined.chars().take(MAX_TITLE_CHARS - 3).collect();
        format!("{}...", cut.trim_end())
    }

    /// Create a ChatThread from a PostgREST row.
    pub fn from_backend_map(map: &serde_json::Value) -> SouloResult<Self> {
        let id = map
            .get("id")
            .and_then(crate::models::journal_entry::json_id)
            .ok_or_else(|| SouloError::Serialization("chat thread row without id".into()))?;
        let created_at = map
            .get("created_at")
            .and_then(|v| v.as_str())
            .and_then(timestamp::parse)
            .unwrap_or_default();
        Ok(Self {
            id,
            user_id: map.get("user_id").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            title: map.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            created_at,
            updated_at: map
                .get("updated_at")
                .and_then(|v| v.as_str())
                .and_then(timestamp::parse)
                .unwrap_or(created_at),
        })
    }

    /// Serialize to a PostgREST insert body.
    pub fn to_backend_map(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "user_id": self.user_id,
            "title": self.title,
            "created_at": timestamp::to_string(&self.created_at),
            "updated_at": timestamp::to_string(&self.updated_at),
        })
    }

    /// Construct a ChatThread from a database row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
            created_at: timestamp::parse(&created_at).unwrap_or_default(),
            updated_at: timestamp::parse(&updated_at).unwrap_or_default(),
        })
    }

    /// Find a thread by id.
    pub fn find_by_id(conn: &Connection, id: &str) -> SouloResult<Option<Self>> {
        match conn.query_row("SELECT * FROM chat_threads WHERE id = ?1", [id], Self::from_row) {
            Ok(thread) => Ok(Some(thread)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SouloError::Database(e.to_string())),
        }
    }

    /// Insert or update this thread.
    pub fn save(&self, conn: &Connection) -> SouloResult<()> {
        conn.execute(
            "INSERT INTO chat_threads (id, user_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title, updated_at = excluded.updated_at",
            params![
                self.id,
                self.user_id,
                self.title,
                timestamp::to_string(&self.created_at),
                timestamp::to_string(&self.updated_at),
            ],
        )
        .map_err(|e| SouloError::Database(e.to_string()))?;
        Ok(())
    }

    /// Rename a thread. Returns false when the thread does not exist.
    pub fn rename(conn: &Connection, id: &str, title: &str) -> SouloResult<bool> {
        let changed = conn
            .execute(
                "UPDATE chat_threads SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, timestamp::now_string(), id],
            )
            .map_err(|e| SouloError::Database(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Bump `updated_at` to now.
    pub fn touch(conn: &Connection, id: &str) -> SouloResult<()> {
        conn.execute(
            "UPDATE chat_threads SET updated_at = ?1 WHERE id = ?2",
            params![timestamp::now_string(), id],
        )
        .map_err(|e| SouloError::Database(e.to_string()))?;
        Ok(())
    }

    /// Delete a thread and (via cascade) its messages.
    pub fn delete(conn: &Connection, id: &str) -> SouloResult<bool> {
        let changed = conn
            .execute("DELETE FROM chat_threads WHERE id = ?1", [id])
            .map_err(|e| SouloError::Database(e.to_string()))?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    #[test]
    fn test_title_from_message() {
        assert_eq!(
            ChatThread::title_from_message("How have I been feeling about work lately overall?"),
            "How have I been feeling about"
        );
        assert_eq!(ChatThread::title_from_message("   "), "New conversation");

        let long = "Supercalifragilisticexpialidocious ".repeat(6);
        let title = ChatThread::title_from_message(&long);
        assert!(title.chars().count() <= MAX_TITLE_CHARS);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_save_rename_delete() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();

        let thread = ChatThread::new("u1", "First");
        thread.save(&conn).unwrap();
        assert!(ChatThread::rename(&conn, &thread.id, "Renamed").unwrap());

        let loaded = ChatThread::find_by_id(&conn, &thread.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Renamed");
        assert!(loaded.updated_at >= thread.updated_at);

        assert!(ChatThread::delete(&conn, &thread.id).unwrap());
        assert!(ChatThread::find_by_id(&conn, &thread.id).unwrap().is_none());
        assert!(!ChatThread::rename(&conn, &thread.id, "x").unwrap());
    }

    #[test]
    fn test_from_backend_map_defaults_updated_at() {
        let json = serde_json::json!({
            "id": "t1", "user_id": "u", "title": "Sleep",
            "created_at": "2024-02-01T00:00:00Z"
        });
        let thread = ChatThread::from_backend_map(&json).unwrap();
        assert_eq!(thread.updated_at, thread.created_at);
    }
}
