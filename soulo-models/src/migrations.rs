//! Ordered schema migrations.
//!
//! `schema_version` holds a single row. Each step runs inside its own
//! transaction together with the version bump, so a failed step leaves the
//! store at the last good version.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use soulo_core::constants::{reminders, DB_SCHEMA_VERSION};
use soulo_core::error::{SouloError, SouloResult};

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// (version, step) pairs in application order.
const STEPS: &[(i32, Step)] = &[(1, seed_default_reminder), (2, index_messages_and_backfill)];

fn migration_err(version: i32) -> impl Fn(rusqlite::Error) -> SouloError {
    move |e| SouloError::Migration(format!("v{version}: {e}"))
}

/// Apply every step newer than the stored version.
pub fn run_migrations(conn: &Connection) -> SouloResult<()> {
    let current = get_schema_version(conn)?;
    let pending: Vec<_> = STEPS.iter().filter(|(v, _)| *v > current).collect();
    if pending.is_empty() {
        return Ok(());
    }

    for (version, step) in pending {
        let tx = conn.unchecked_transaction().map_err(migration_err(*version))?;
        let conn: &Connection = &tx;
        step(conn).map_err(migration_err(*version))?;
        tx.execute("UPDATE schema_version SET version = ?1", [version])
            .map_err(migration_err(*version))?;
        tx.commit().map_err(migration_err(*version))?;
        info!(version, "applied schema migration");
    }
    Ok(())
}

/// Stored schema version; inserts the version row on a fresh database.
pub fn get_schema_version(conn: &Connection) -> SouloResult<i32> {
    let stored: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(migration_err(0))?;

    match stored {
        Some(version) => Ok(version),
        None => {
            conn.execute("INSERT INTO schema_version (version) VALUES (0)", [])
                .map_err(migration_err(0))?;
            Ok(0)
        }
    }
}

/// New installs start with a disabled evening reminder.
fn seed_default_reminder(conn: &Connection) -> rusqlite::Result<()> {
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM reminders", [], |row| row.get(0))?;
    if existing == 0 {
        conn.execute(
            "INSERT INTO reminders (time, title, body, enabled, created_at)
             VALUES ('20:00', ?1, ?2, 0, ?3)",
            rusqlite::params![
                reminders::DEFAULT_TITLE,
                reminders::DEFAULT_BODY,
                crate::timestamp::now_string(),
            ],
        )?;
    }
    Ok(())
}

/// Message history index, plus threads whose `updated_at` lags their newest message.
fn index_messages_and_backfill(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_messages_thread_created
             ON chat_messages(thread_id, created_at);
         UPDATE chat_threads SET updated_at = (
             SELECT MAX(m.created_at) FROM chat_messages m WHERE m.thread_id = chat_threads.id
         )
         WHERE EXISTS (
             SELECT 1 FROM chat_messages m
             WHERE m.thread_id = chat_threads.id AND m.created_at > chat_threads.updated_at
         );",
    )
}
