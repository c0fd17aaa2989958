//! SQLite handle for the local store: pooled connections, schema setup and
//! maintenance queries used by `soulo db`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use soulo_core::config::DatabaseConfig;
use soulo_core::error::{SouloError, SouloResult};

use crate::migrations;
use crate::schema;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Tables reported by [`Database::stats`], in display order.
const COUNTED_TABLES: [&str; 4] = ["journal_entries", "chat_threads", "chat_messages", "reminders"];

/// Cloneable handle to the journal database.
#[derive(Clone)]
pub struct Database {
    pool: Arc<DbPool>,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the database at `db_path`, bring the schema up to
    /// date and optionally verify integrity first.
    pub fn init(db_path: &Path, config: &DatabaseConfig) -> SouloResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!(path = %db_path.display(), pool_size = config.pool_size, "opening journal database");

        let pragmas = Pragmas { wal: config.wal_mode };
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .connection_customizer(Box::new(pragmas))
            .build(SqliteConnectionManager::file(db_path))
            .map_err(|e| SouloError::Pool(e.to_string()))?;

        let db = Self {
            pool: Arc::new(pool),
            path: db_path.to_path_buf(),
        };

        if config.integrity_check_on_startup {
            db.run_integrity_check()?;
        }
        db.prepare_schema()?;

        info!(path = %db_path.display(), "journal database ready");
        Ok(db)
    }

    fn prepare_schema(&self) -> SouloResult<()> {
        let conn = self.conn()?;
        schema::create_tables(&conn)?;
        migrations::run_migrations(&conn)
    }

    /// Borrow a pooled connection.
    pub fn conn(&self) -> SouloResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| SouloError::Pool(e.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_integrity_check(&self) -> SouloResult<()> {
        let verdict: String = self
            .conn()?
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .map_err(|e| SouloError::Database(e.to_string()))?;

        if verdict != "ok" {
            error!("journal database failed integrity check: {verdict}");
            return Err(SouloError::IntegrityCheck(verdict));
        }
        debug!("integrity check ok");
        Ok(())
    }

    /// Active journal mode ("wal", "delete", ...).
    pub fn journal_mode(&self) -> SouloResult<String> {
        self.conn()?
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .map_err(|e| SouloError::Database(e.to_string()))
    }

    /// Bytes on disk for the main file and its write-ahead log.
    pub fn disk_usage(&self) -> DiskUsage {
        let size_of = |p: &Path| std::fs::metadata(p).ok().map(|m| m.len());
        let mut wal = self.path.as_os_str().to_owned();
        wal.push("-wal");
        DiskUsage {
            db_bytes: size_of(&self.path),
            wal_bytes: size_of(Path::new(&wal)),
        }
    }

    /// Row counts for the user-data tables.
    pub fn stats(&self) -> SouloResult<DatabaseStats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> SouloResult<i64> {
            conn.query_row(sql, [], |row| row.get(0))
                .map_err(|e| SouloError::Database(e.to_string()))
        };

        let mut totals = [0i64; COUNTED_TABLES.len()];
        for (total, table) in totals.iter_mut().zip(COUNTED_TABLES) {
            *total = count(&format!("SELECT COUNT(*) FROM {table}"))?;
        }
        let [journal_entries, chat_threads, chat_messages, reminders] = totals;

        Ok(DatabaseStats {
            journal_entries,
            embedded_entries: count("SELECT COUNT(*) FROM journal_entries WHERE embedding IS NOT NULL")?,
            chat_threads,
            chat_messages,
            reminders,
        })
    }

    /// Run `f` inside a transaction; rolled back when `f` fails.
    pub fn transaction<T, F>(&self, f: F) -> SouloResult<T>
    where
        F: FnOnce(&Connection) -> SouloResult<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| SouloError::Database(e.to_string()))?;
        let value = f(&tx)?;
        tx.commit().map_err(|e| SouloError::Database(e.to_string()))?;
        Ok(value)
    }

    /// Drop every table and rebuild an empty schema, default reminder included.
    pub fn reset(&self) -> SouloResult<()> {
        warn!(path = %self.path.display(), "wiping local journal database");
        self.transaction(|conn| {
            schema::drop_tables(conn)?;
            schema::create_tables(conn)
        })?;
        migrations::run_migrations(&*self.conn()?)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub journal_entries: i64,
    pub embedded_entries: i64,
    pub chat_threads: i64,
    pub chat_messages: i64,
    pub reminders: i64,
}

impl std::fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} entries ({} embedded), {} threads, {} messages, {} reminders",
            self.journal_entries, self.embedded_entries, self.chat_threads, self.chat_messages, self.reminders
        )
    }
}

/// File sizes; `None` when the file does not exist.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DiskUsage {
    pub db_bytes: Option<u64>,
    pub wal_bytes: Option<u64>,
}

/// Per-connection PRAGMAs applied by the pool.
#[derive(Debug)]
struct Pragmas {
    wal: bool,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for Pragmas {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        if self.wal {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }
        conn.execute_batch(
            "PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;
             PRAGMA synchronous=NORMAL;
             PRAGMA temp_store=MEMORY;",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::init(&dir.path().join("journal.db"), &DatabaseConfig::default()).unwrap();
        (db, dir)
    }

    #[test]
    fn test_fresh_database_has_only_default_reminder() {
        let (db, _dir) = open_db();
        let stats = db.stats().unwrap();
        assert_eq!(stats.journal_entries, 0);
        assert_eq!(stats.embedded_entries, 0);
        assert_eq!(stats.reminders, 1);
        assert!(db.run_integrity_check().is_ok());
    }

    #[test]
    fn test_wal_mode_and_disk_usage() {
        let (db, _dir) = open_db();
        assert_eq!(db.journal_mode().unwrap().to_lowercase(), "wal");
        let usage = db.disk_usage();
        assert!(usage.db_bytes.is_some());
    }

    #[test]
    fn test_stats_display() {
        let (db, _dir) = open_db();
        let line = db.stats().unwrap().to_string();
        assert!(line.starts_with("0 entries (0 embedded)"));
        assert!(line.ends_with("1 reminders"));
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let (db, _dir) = open_db();
        let result: SouloResult<()> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO chat_threads (id, user_id, title, created_at, updated_at)
                 VALUES ('t1', 'u1', 'Morning', '2024-01-01T00:00:00.000Z', '2024-01-01T00:00:00.000Z')",
                [],
            )
            .map_err(|e| SouloError::Database(e.to_string()))?;
            Err(SouloError::Internal("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(db.stats().unwrap().chat_threads, 0);
    }

    #[test]
    fn test_reset_restores_empty_schema() {
        let (db, _dir) = open_db();
        let conn = db.conn().unwrap();
        conn.execute(
            "INSERT INTO chat_threads (id, user_id, title, created_at, updated_at)
             VALUES ('t1', 'u1', 'Morning', '2024-01-01T00:00:00.000Z', '2024-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO reminders (time, title, body, enabled, created_at)
             VALUES ('08:00', 't', 'b', 1, '2024-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();
        drop(conn);
        assert_eq!(db.stats().unwrap().chat_threads, 1);
        assert_eq!(db.stats().unwrap().reminders, 2);

        db.reset().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.chat_threads, 0);
        assert_eq!(stats.reminders, 1);
    }
}
