//! Database schema definitions and table creation.
//!
//! Mirrors the managed backend's journal and chat tables so the local store
//! can stand in for the remote one. Emotions and themes are JSON text;
//! embeddings are little-endian f32 BLOBs (see [`crate::embedding`]).

use rusqlite::Connection;
use soulo_core::error::{SouloError, SouloResult};
use tracing::info;

/// Create all database tables and indexes if they do not exist.
pub fn create_tables(conn: &Connection) -> SouloResult<()> {
    conn.execute_batch(SCHEMA_SQL)
        .map_err(|e| SouloError::Database(format!("failed to create schema: {e}")))?;
    info!("database schema verified");
    Ok(())
}

/// Drop all tables (used for database reset).
pub fn drop_tables(conn: &Connection) -> SouloResult<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS chat_messages;
         DROP TABLE IF EXISTS chat_threads;
         DROP TABLE IF EXISTS journal_entries;
         DROP TABLE IF EXISTS reminders;
         DROP TABLE IF EXISTS schema_version;",
    )
    .map_err(|e| SouloError::Database(format!("failed to drop tables: {e}")))?;
    Ok(())
}

/// Complete SQL schema for all tables.
const SCHEMA_SQL: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

-- Journal entries
CREATE TABLE IF NOT EXISTS journal_entries (
    id                  TEXT PRIMARY KEY NOT NULL,
    user_id             TEXT NOT NULL,
    content             TEXT NOT NULL DEFAULT '',
    transcript          TEXT,
    created_at          TEXT NOT NULL,
    duration_secs       REAL,
    audio_url           TEXT,
    sentiment           REAL,
    sentiment_magnitude REAL,
    emotions            TEXT NOT NULL DEFAULT '{}',
    themes              TEXT NOT NULL DEFAULT '[]',
    embedding           BLOB
);

CREATE INDEX IF NOT EXISTS idx_entries_user_created ON journal_entries(user_id, created_at);

-- Chat threads
CREATE TABLE IF NOT EXISTS chat_threads (
    id          TEXT PRIMARY KEY NOT NULL,
    user_id     TEXT NOT NULL,
    title       TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_threads_user_updated ON chat_threads(user_id, updated_at);

-- Chat messages
CREATE TABLE IF NOT EXISTS chat_messages (
    id                  TEXT PRIMARY KEY NOT NULL,
    thread_id           TEXT NOT NULL REFERENCES chat_threads(id) ON DELETE CASCADE,
    role                TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
    content             TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    reference_entries   TEXT,
    analysis            TEXT
);

-- Reminder schedule (local only)
CREATE TABLE IF NOT EXISTS reminders (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    time        TEXT NOT NULL,
    title       TEXT NOT NULL,
    body        TEXT NOT NULL,
    enabled     INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_drop() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);

        drop_tables(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[test]
    fn test_role_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO chat_threads (id, user_id, title, created_at, updated_at) VALUES ('t', 'u', 'x', 'now', 'now')",
            [],
        )
        .unwrap();
        let bad = conn.execute(
            "INSERT INTO chat_messages (id, thread_id, role, content, created_at) VALUES ('m', 't', 'system', 'hi', 'now')",
            [],
        );
        assert!(bad.is_err());
    }
}
