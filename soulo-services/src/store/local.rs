//! Journal store over the local SQLite database.
//!
//! Similarity is computed in Rust over the candidate embeddings; generated
//! SQL runs through the read-only executor with `:user_id` bound.

use std::cmp::Ordering;

use async_trait::async_trait;
use tracing::debug;

use soulo_core::error::SouloResult;
use soulo_models::queries::{self, DateWindow};
use soulo_models::{embedding, ChatMessage, ChatThread, Database, JournalEntry, ScoredEntry};

use super::{JournalStore, SqlDialect, SqlRow};

/// Hard cap on rows a local statement may return, on top of the guard's LIMIT.
const MAX_QUERY_ROWS: usize = 1000;

#[derive(Clone)]
pub struct LocalStore {
    database: Database,
}

impl LocalStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

/// Rank candidates by cosine similarity, keeping those at or above the threshold.
pub fn rank_by_similarity(
    candidates: Vec<JournalEntry>,
    query: &[f32],
    threshold: f32,
    limit: usize,
) -> Vec<ScoredEntry> {
    let mut scored: Vec<ScoredEntry> = candidates
        .into_iter()
        .filter_map(|entry| {
            let similarity = entry
                .embedding
                .as_deref()
                .and_then(|v| embedding::cosine_similarity(v, query))?;
            (similarity >= threshold).then(|| ScoredEntry::new(entry, Some(similarity)))
        })
        .collect();
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.entry.created_at.cmp(&a.entry.created_at))
    });
    scored.truncate(limit);
    scored
}

#[async_trait]
impl JournalStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn match_entries(
        &self,
        user_id: &str,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
        window: Option<&DateWindow>,
    ) -> SouloResult<Vec<ScoredEntry>> {
        let conn = self.database.conn()?;
        let candidates = queries::entries_with_embeddings(&conn, user_id, window)?;
        let total = candidates.len();
        let ranked = rank_by_similarity(candidates, embedding, threshold, limit);
        debug!("local match: {} of {total} candidates >= {threshold}", ranked.len());
        Ok(ranked)
    }

    async fn execute_query(&self, sql: &str, user_id: &str) -> SouloResult<Vec<SqlRow>> {
        let conn = self.database.conn()?;
        queries::execute_read_only(&conn, sql, user_id, MAX_QUERY_ROWS)
    }

    async fn recent_entries(&self, user_id: &str, limit: usize) -> SouloResult<Vec<JournalEntry>> {
        let conn = self.database.conn()?;
        queries::recent_entries(&conn, user_id, limit as i64)
    }

    async fn list_entries(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
        window: Option<&DateWindow>,
    ) -> SouloResult<Vec<JournalEntry>> {
        let conn = self.database.conn()?;
        queries::list_entries(&conn, user_id, offset as i64, limit as i64, window)
    }

    async fn search_entries(&self, user_id: &str, keyword: &str, limit: usize) -> SouloResult<Vec<JournalEntry>> {
        let conn = self.database.conn()?;
        queries::search_entries(&conn, user_id, keyword, limit as i64)
    }

    async fn entries_by_ids(&self, ids: &[String]) -> SouloResult<Vec<JournalEntry>> {
        let conn = self.database.conn()?;
        queries::entries_by_ids(&conn, ids)
    }

    async fn entries_missing_embeddings(&self, user_id: &str, limit: usize) -> SouloResult<Vec<JournalEntry>> {
        let conn = self.database.conn()?;
        queries::entries_missing_embeddings(&conn, user_id, limit as i64)
    }

    async fn insert_entry(&self, entry: &JournalEntry) -> SouloResult<JournalEntry> {
        let conn = self.database.conn()?;
        entry.save(&conn)?;
        Ok(entry.clone())
    }

    async fn update_embedding(&self, entry_id: &str, embedding: &[f32]) -> SouloResult<bool> {
        let conn = self.database.conn()?;
        JournalEntry::update_embedding(&conn, entry_id, embedding)
    }

    async fn delete_entry(&self, entry_id: &str) -> SouloResult<bool> {
        let conn = self.database.conn()?;
        JournalEntry::delete(&conn, entry_id)
    }

    async fn create_thread(&self, thread: &ChatThread) -> SouloResult<ChatThread> {
        let conn = self.database.conn()?;
        thread.save(&conn)?;
        Ok(thread.clone())
    }

    async fn get_thread(&self, thread_id: &str) -> SouloResult<Option<ChatThread>> {
        let conn = self.database.conn()?;
        ChatThread::find_by_id(&conn, thread_id)
    }

    async fn list_threads(&self, user_id: &str, limit: usize) -> SouloResult<Vec<ChatThread>> {
        let conn = self.database.conn()?;
        queries::list_threads(&conn, user_id, limit as i64)
    }

    async fn rename_thread(&self, thread_id: &str, title: &str) -> SouloResult<bool> {
        let conn = self.database.conn()?;
        ChatThread::rename(&conn, thread_id, title)
    }

    async fn touch_thread(&self, thread_id: &str) -> SouloResult<()> {
        let conn = self.database.conn()?;
        ChatThread::touch(&conn, thread_id)
    }

    async fn delete_thread(&self, thread_id: &str) -> SouloResult<bool> {
        let conn = self.database.conn()?;
        ChatThread::delete(&conn, thread_id)
    }

    async fn append_message(&self, message: &ChatMessage) -> SouloResult<()> {
        let conn = self.database.conn()?;
        message.save(&conn)
    }

    async fn thread_messages(&self, thread_id: &str, limit: usize) -> SouloResult<Vec<ChatMessage>> {
        let conn = self.database.conn()?;
        queries::thread_history(&conn, thread_id, limit as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn entry_with(content: &str, vector: Vec<f32>, age_days: i64) -> JournalEntry {
        let mut e = JournalEntry::new("u1", content);
        e.embedding = Some(vector);
        e.created_at = Utc::now() - Duration::days(age_days);
        e
    }

    #[test]
    fn test_rank_by_similarity() {
        let candidates = vec![
            entry_with("orthogonal", vec![0.0, 1.0], 0),
            entry_with("close", vec![0.9, 0.1], 1),
            entry_with("exact", vec![1.0, 0.0], 2),
            entry_with("no vector", vec![], 0),
        ];
        let ranked = rank_by_similarity(candidates, &[1.0, 0.0], 0.5, 10);
        let names: Vec<&str> = ranked.iter().map(|s| s.entry.content.as_str()).collect();
        assert_eq!(names, vec!["exact", "close"]);
        assert!(ranked[0].similarity.unwrap() > 0.99);
    }

    #[test]
    fn test_rank_ties_prefer_recent_and_truncate() {
        let candidates = vec![
            entry_with("older", vec![1.0, 0.0], 5),
            entry_with("newer", vec![1.0, 0.0], 1),
            entry_with("oldest", vec![1.0, 0.0], 9),
        ];
        let ranked = rank_by_similarity(candidates, &[1.0, 0.0], 0.0, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].entry.content, "newer");
        assert_eq!(ranked[1].entry.content, "older");
    }
}
