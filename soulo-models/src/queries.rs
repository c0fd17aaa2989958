//! Query builders for common database access patterns.
//!
//! Entry listings, keyword search, embedding candidates for similarity
//! ranking, thread history, and execution of guarded read-only SQL. All
//! queries bind their parameters; only the validated read-only statement in
//! [`execute_read_only`] is caller-provided text.

use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use soulo_core::error::{SouloError, SouloResult};

use crate::models::chat_message::ChatMessage;
use crate::models::chat_thread::ChatThread;
use crate::models::journal_entry::JournalEntry;
use crate::timestamp;

/// Inclusive start / exclusive end date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts < self.end
    }

    fn bounds(window: Option<&DateWindow>) -> (String, String) {
        match window {
            Some(w) => (timestamp::to_string(&w.start), timestamp::to_string(&w.end)),
            // Lexicographic bounds covering every canonical timestamp
            None => ("0000".to_string(), "9999".to_string()),
        }
    }
}

// ─── Journal Entry Queries ──────────────────────────────────────────────────

fn collect_entries(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> SouloResult<Vec<JournalEntry>> {
    let mut stmt = conn.prepare(sql).map_err(|e| SouloError::Database(e.to_string()))?;
    let entries = stmt
        .query_map(params, JournalEntry::from_row)
        .map_err(|e| SouloError::Database(e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(entries)
}

/// List a user's entries newest first, optionally within a date window.
pub fn list_entries(
    conn: &Connection,
    user_id: &str,
    offset: i64,
    limit: i64,
    window: Option<&DateWindow>,
) -> SouloResult<Vec<JournalEntry>> {
    let (start, end) = DateWindow::bounds(window);
    collect_entries(
        conn,
        "SELECT * FROM journal_entries
         WHERE user_id = ?1 AND created_at >= ?2 AND created_at < ?3
         ORDER BY created_at DESC
         LIMIT ?4 OFFSET ?5",
        params![user_id, start, end, limit, offset],
    )
}

/// Most recent entries for a user.
pub fn recent_entries(conn: &Connection, user_id: &str, limit: i64) -> SouloResult<Vec<JournalEntry>> {
    list_entries(conn, user_id, 0, limit, None)
}

/// Case-insensitive keyword search over content, transcript and themes.
pub fn search_entries(
    conn: &Connection,
    user_id: &str,
    keyword: &str,
    limit: i64,
) -> SouloResult<Vec<JournalEntry>> {
    let escaped = keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{escaped}%");
    collect_entries(
        conn,
        "SELECT * FROM journal_entries
         WHERE user_id = ?1
           AND (content LIKE ?2 ESCAPE '\\'
                OR transcript LIKE ?2 ESCAPE '\\'
                OR themes LIKE ?2 ESCAPE '\\')
         ORDER BY created_at DESC
         LIMIT ?3",
        params![user_id, pattern, limit],
    )
}

/// Entries carrying an embedding, optionally within a date window.
///
/// Similarity ranking happens in Rust over these candidates.
pub fn entries_with_embeddings(
    conn: &Connection,
    user_id: &str,
    window: Option<&DateWindow>,
) -> SouloResult<Vec<JournalEntry>> {
    let (start, end) = DateWindow::bounds(window);
    collect_entries(
        conn,
        "SELECT * FROM journal_entries
         WHERE user_id = ?1 AND embedding IS NOT NULL
           AND created_at >= ?2 AND created_at < ?3",
        params![user_id, start, end],
    )
}

/// Entries with no embedding yet, oldest first.
pub fn entries_missing_embeddings(
    conn: &Connection,
    user_id: &str,
    limit: i64,
) -> SouloResult<Vec<JournalEntry>> {
    collect_entries(
        conn,
        "SELECT * FROM journal_entries
         WHERE user_id = ?1 AND embedding IS NULL AND content != ''
         ORDER BY created_at ASC
         LIMIT ?2",
        params![user_id, limit],
    )
}

/// Load entries by id, preserving the order of `ids` and skipping unknown ones.
pub fn entries_by_ids(conn: &Connection, ids: &[String]) -> SouloResult<Vec<JournalEntry>> {
    let mut entries = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(entry) = JournalEntry::find_by_id(conn, id)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Count a user's entries.
pub fn count_entries(conn: &Connection, user_id: &str) -> SouloResult<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM journal_entries WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )
    .map_err(|e| SouloError::Database(e.to_string()))
}

// ─── Chat Queries ───────────────────────────────────────────────────────────

/// A user's threads, most recently active first.
pub fn list_threads(conn: &Connection, user_id: &str, limit: i64) -> SouloResult<Vec<ChatThread>> {
    let mut stmt = conn
        .prepare(
            "SELECT * FROM chat_threads WHERE user_id = ?1
             ORDER BY updated_at DESC LIMIT ?2",
        )
        .map_err(|e| SouloError::Database(e.to_string()))?;
    let threads = stmt
        .query_map(params![user_id, limit], ChatThread::from_row)
        .map_err(|e| SouloError::Database(e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(threads)
}

/// The last `limit` messages of a thread, in chronological order.
pub fn thread_history(conn: &Connection, thread_id: &str, limit: i64) -> SouloResult<Vec<ChatMessage>> {
    let mut stmt = conn
        .prepare(
            "SELECT * FROM (
                SELECT * FROM chat_messages WHERE thread_id = ?1
                ORDER BY created_at DESC, rowid DESC LIMIT ?2
             ) ORDER BY created_at ASC",
        )
        .map_err(|e| SouloError::Database(e.to_string()))?;
    let messages = stmt
        .query_map(params![thread_id, limit], ChatMessage::from_row)
        .map_err(|e| SouloError::Database(e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(messages)
}

// ─── Read-only SQL ──────────────────────────────────────────────────────────

/// Execute a validated read-only statement and return rows as JSON objects.
///
/// A `:user_id` parameter, when present, is bound to `user_id`. BLOB columns
/// (embeddings) are returned as null. Statements SQLite does not consider
/// read-only are rejected before execution.
pub fn execute_read_only(
    conn: &Connection,
    sql: &str,
    user_id: &str,
    max_rows: usize,
) -> SouloResult<Vec<serde_json::Map<String, serde_json::Value>>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| SouloError::UnsafeQuery(format!("statement did not compile: {e}")))?;

    if !stmt.readonly() {
        return Err(SouloError::UnsafeQuery("statement is not read-only".into()));
    }

    if let Some(idx) = stmt
        .parameter_index(":user_id")
        .map_err(|e| SouloError::Database(e.to_string()))?
    {
        stmt.raw_bind_parameter(idx, user_id)
            .map_err(|e| SouloError::Database(e.to_string()))?;
    }

    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = stmt.raw_query();
    let mut out = Vec::new();

    while let Some(row) = rows.next().map_err(|e| SouloError::Database(e.to_string()))? {
        if out.len() >= max_rows {
            break;
        }
        let mut map = serde_json::Map::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let value = row.get_ref(i).map_err(|e| SouloError::Database(e.to_string()))?;
            map.insert(name.clone(), value_to_json(value));
        }
        out.push(map);
    }

    Ok(out)
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use chrono::{Duration, TimeZone};
    use soulo_core::constants::roles;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        for (i, text) in ["work stress", "100% calm day", "family dinner"].iter().enumerate() {
            let mut e = JournalEntry::new("u1", text);
            e.created_at = base + Duration::days(i as i64);
            e.sentiment = Some(i as f64 * 0.3);
            if i != 1 {
                e.embedding = Some(vec![1.0, i as f32]);
            }
            e.save(&conn).unwrap();
        }
        JournalEntry::new("u2", "other user").save(&conn).unwrap();
        conn
    }

    #[test]
    fn test_list_and_window() {
        let conn = setup();
        let all = list_entries(&conn, "u1", 0, 10, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].content, "family dinner");

        let window = DateWindow::new(
            Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap(),
        );
        let within = list_entries(&conn, "u1", 0, 10, Some(&window)).unwrap();
        assert_eq!(within.len(), 1);
        assert_eq!(within[0].content, "100% calm day");

        assert_eq!(recent_entries(&conn, "u1", 2).unwrap().len(), 2);
        assert_eq!(count_entries(&conn, "u2").unwrap(), 1);
    }

    #[test]
    fn test_search_escapes_wildcards() {
        let conn = setup();
        assert_eq!(search_entries(&conn, "u1", "100%", 10).unwrap().len(), 1);
        assert_eq!(search_entries(&conn, "u1", "%", 10).unwrap().len(), 1);
        assert_eq!(search_entries(&conn, "u1", "STRESS", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_embedding_candidates() {
        let conn = setup();
        assert_eq!(entries_with_embeddings(&conn, "u1", None).unwrap().len(), 2);
        let missing = entries_missing_embeddings(&conn, "u1", 10).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].content, "100% calm day");
    }

    #[test]
    fn test_thread_history_is_chronological_tail() {
        let conn = setup();
        let thread = ChatThread::new("u1", "t");
        thread.save(&conn).unwrap();
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        for i in 0..5 {
            let role = if i % 2 == 0 { roles::USER } else { roles::ASSISTANT };
            let mut m = ChatMessage::new(&thread.id, role, &format!("m{i}")).unwrap();
            m.created_at = base + Duration::minutes(i);
            m.save(&conn).unwrap();
        }
        let history = thread_history(&conn, &thread.id, 3).unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_execute_read_only_scoped() {
        let conn = setup();
        let rows = execute_read_only(
            &conn,
            "SELECT COUNT(*) AS n, AVG(sentiment) AS avg_sentiment FROM journal_entries WHERE user_id = :user_id",
            "u1",
            100,
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["n"], serde_json::json!(3));

        let rows = execute_read_only(
            &conn,
            "SELECT id, embedding FROM journal_entries WHERE user_id = :user_id",
            "u1",
            2,
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["embedding"].is_null()));
    }

    #[test]
    fn test_execute_read_only_rejects_writes() {
        let conn = setup();
        let err = execute_read_only(&conn, "DELETE FROM journal_entries", "u1", 10).unwrap_err();
        assert!(matches!(err, SouloError::UnsafeQuery(_)));
        assert_eq!(count_entries(&conn, "u1").unwrap(), 3);
    }
}
