//! Managed backend endpoints (PostgREST tables and RPC functions).

use reqwest::Method;
use serde_json::json;

use soulo_core::config::BackendConfig;
use soulo_core::constants::{tables, REST_PATH};
use soulo_core::error::{SouloError, SouloResult};
use soulo_models::queries::DateWindow;
use soulo_models::{timestamp, ChatMessage, ChatThread, JournalEntry, ScoredEntry};

use crate::client::{ApiClient, Call};

/// PostgREST returns the affected rows with this preference.
const RETURN_ROWS: &str = "return=representation";

/// A PostgREST query fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, String),
    Gte(String, String),
    Lt(String, String),
    IsNull(String),
    In(String, Vec<String>),
    /// Raw `or=(...)` group, e.g. `content.ilike.*sleep*`.
    Or(Vec<String>),
    Order { column: String, descending: bool },
    Limit(usize),
    Offset(usize),
}

impl Filter {
    pub fn eq(column: &str, value: impl ToString) -> Self {
        Filter::Eq(column.to_string(), value.to_string())
    }

    pub fn order_desc(column: &str) -> Self {
        Filter::Order { column: column.to_string(), descending: true }
    }

    fn to_pair(&self) -> (String, String) {
        match self {
            Filter::Eq(c, v) => (c.clone(), format!("eq.{v}")),
            Filter::Gte(c, v) => (c.clone(), format!("gte.{v}")),
            Filter::Lt(c, v) => (c.clone(), format!("lt.{v}")),
            Filter::IsNull(c) => (c.clone(), "is.null".to_string()),
            Filter::In(c, values) => {
                let quoted: Vec<String> = values.iter().map(|v| format!("\"{v}\"")).collect();
                (c.clone(), format!("in.({})", quoted.join(",")))
            }
            Filter::Or(parts) => ("or".to_string(), format!("({})", parts.join(","))),
            Filter::Order { column, descending } => (
                "order".to_string(),
                format!("{column}.{}", if *descending { "desc" } else { "asc" }),
            ),
            Filter::Limit(n) => ("limit".to_string(), n.to_string()),
            Filter::Offset(n) => ("offset".to_string(), n.to_string()),
        }
    }
}

/// Encode `select` plus filters into a URL query string.
pub fn build_query(select: &str, filters: &[Filter]) -> String {
    let mut url = match reqwest::Url::parse("http://query.local/") {
        Ok(url) => url,
        Err(_) => return String::new(),
    };
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("select", select);
        for filter in filters {
            let (key, value) = filter.to_pair();
            pairs.append_pair(&key, &value);
        }
    }
    url.query().unwrap_or_default().to_string()
}

/// Client for the managed Postgres backend.
#[derive(Clone)]
pub struct BackendClient {
    api: ApiClient,
}

impl BackendClient {
    /// Create a client authenticated with the service key when present,
    /// otherwise with the anon key.
    pub fn new(config: &BackendConfig) -> SouloResult<Self> {
        if config.url.is_empty() {
            return Err(SouloError::MissingConfig("backend.url".into()));
        }
        let key = if config.service_key.is_empty() {
            &config.anon_key
        } else {
            &config.service_key
        };
        if key.is_empty() {
            return Err(SouloError::MissingConfig("backend.anon_key or backend.service_key".into()));
        }

        let base = format!("{}{}", soulo_core::AppConfig::sanitize_url(&config.url), REST_PATH);
        let api = ApiClient::new("backend", &base, config.timeout_ms)?
            .with_header("apikey", key)
            .with_bearer(key);
        Ok(Self { api })
    }

    /// The underlying HTTP client.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    // --- Generic table access ---

    /// `GET /{table}?select=...&filters`.
    pub async fn select(
        &self,
        table: &str,
        select: &str,
        filters: &[Filter],
    ) -> SouloResult<Vec<serde_json::Value>> {
        let path = format!("/{table}?{}", build_query(select, filters));
        self.api.get_json(&path).await
    }

    /// Insert one row or an array of rows, returning the stored rows.
    pub async fn insert(&self, table: &str, rows: &serde_json::Value) -> SouloResult<Vec<serde_json::Value>> {
        let path = format!("/{table}");
        let resp = self
            .api
            .send(Call::new(Method::POST, &path).json(rows).header("Prefer", RETURN_ROWS))
            .await?;
        self.api.parse_json(resp).await
    }

    /// Patch rows matching the filters, returning the updated rows.
    pub async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: &serde_json::Value,
    ) -> SouloResult<Vec<serde_json::Value>> {
        let path = format!("/{table}?{}", build_query("*", filters));
        let resp = self
            .api
            .send(Call::new(Method::PATCH, &path).json(patch).header("Prefer", RETURN_ROWS))
            .await?;
        self.api.parse_json(resp).await
    }

    /// Delete rows matching the filters; returns how many were removed.
    pub async fn delete(&self, table: &str, filters: &[Filter]) -> SouloResult<usize> {
        if filters.is_empty() {
            return Err(SouloError::InvalidInput("refusing unfiltered delete".into()));
        }
        let path = format!("/{table}?{}", build_query("id", filters));
        let resp = self
            .api
            .send(Call::new(Method::DELETE, &path).header("Prefer", RETURN_ROWS))
            .await?;
        let rows: Vec<serde_json::Value> = self.api.parse_json(resp).await?;
        Ok(rows.len())
    }

    /// Call a Postgres function through `/rpc/{name}`.
    pub async fn rpc(&self, name: &str, args: &serde_json::Value) -> SouloResult<serde_json::Value> {
        self.api.post_json(&format!("/rpc/{name}"), args).await
    }

    /// Check that the REST endpoint answers.
    pub async fn ping(&self) -> SouloResult<std::time::Duration> {
        let start = std::time::Instant::now();
        self.select(tables::JOURNAL_ENTRIES, "id", &[Filter::Limit(1)]).await?;
        Ok(start.elapsed())
    }

    // --- Journal entries ---

    /// Vector similarity search through the match RPC.
    ///
    /// Rows carry a `similarity` column computed server-side.
    pub async fn match_journal_entries(
        &self,
        embedding: &[f32],
        threshold: f32,
        count: usize,
        user_id: &str,
        window: Option<&DateWindow>,
    ) -> SouloResult<Vec<ScoredEntry>> {
        let args = json!({
            "query_embedding": embedding,
            "match_threshold": threshold,
            "match_count": count,
            "user_id_filter": user_id,
            "start_date": window.map(|w| timestamp::to_string(&w.start)),
            "end_date": window.map(|w| timestamp::to_string(&w.end)),
        });
        let value = self.rpc(tables::RPC_MATCH_ENTRIES, &args).await?;
        let rows = value.as_array().cloned().unwrap_or_default();

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let similarity = row.get("similarity").and_then(|v| v.as_f64()).map(|s| s as f32);
            out.push(ScoredEntry::new(JournalEntry::from_backend_map(row)?, similarity));
        }
        Ok(out)
    }

    /// Run a guarded read-only statement through the SQL RPC.
    pub async fn execute_journal_query(
        &self,
        sql: &str,
        user_id: &str,
    ) -> SouloResult<Vec<serde_json::Map<String, serde_json::Value>>> {
        let args = json!({ "query_text": sql, "user_id_param": user_id });
        let value = self.rpc(tables::RPC_EXECUTE_QUERY, &args).await?;
        match value {
            serde_json::Value::Array(rows) => Ok(rows
                .into_iter()
                .filter_map(|r| match r {
                    serde_json::Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect()),
            serde_json::Value::Null => Ok(Vec::new()),
            other => Err(SouloError::Serialization(format!(
                "unexpected query result shape: {}",
                truncate_json(&other)
            ))),
        }
    }

    /// List a user's entries newest first.
    pub async fn list_journal_entries(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
        window: Option<&DateWindow>,
    ) -> SouloResult<Vec<JournalEntry>> {
        let mut filters = vec![Filter::eq("user_id", user_id)];
        if let Some(w) = window {
            filters.push(Filter::Gte("created_at".into(), timestamp::to_string(&w.start)));
            filters.push(Filter::Lt("created_at".into(), timestamp::to_string(&w.end)));
        }
        filters.push(Filter::order_desc("created_at"));
        filters.push(Filter::Limit(limit));
        filters.push(Filter::Offset(offset));
        self.entries(&filters).await
    }

    /// Most recent entries for a user.
    pub async fn recent_journal_entries(&self, user_id: &str, limit: usize) -> SouloResult<Vec<JournalEntry>> {
        self.list_journal_entries(user_id, 0, limit, None).await
    }

    /// Case-insensitive keyword search over content and transcript.
    pub async fn search_journal_entries(
        &self,
        user_id: &str,
        keyword: &str,
        limit: usize,
    ) -> SouloResult<Vec<JournalEntry>> {
        // PostgREST reserves these inside or=() groups
        let cleaned: String = keyword
            .chars()
            .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '"'))
            .collect();
        let filters = vec![
            Filter::eq("user_id", user_id),
            Filter::Or(vec![
                format!("content.ilike.*{cleaned}*"),
                format!("transcript.ilike.*{cleaned}*"),
            ]),
            Filter::order_desc("created_at"),
            Filter::Limit(limit),
        ];
        self.entries(&filters).await
    }

    /// Load entries by id.
    pub async fn journal_entries_by_ids(&self, ids: &[String]) -> SouloResult<Vec<JournalEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.entries(&[Filter::In("id".into(), ids.to_vec())]).await
    }

    /// Entries without an embedding, oldest first.
    pub async fn entries_missing_embeddings(&self, user_id: &str, limit: usize) -> SouloResult<Vec<JournalEntry>> {
        let filters = vec![
            Filter::eq("user_id", user_id),
            Filter::IsNull("embedding".into()),
            Filter::Order { column: "created_at".into(), descending: false },
            Filter::Limit(limit),
        ];
        self.entries(&filters).await
    }

    /// Insert a new entry.
    pub async fn insert_journal_entry(&self, entry: &JournalEntry) -> SouloResult<JournalEntry> {
        let rows = self.insert(tables::JOURNAL_ENTRIES, &entry.to_backend_map()).await?;
        match rows.first() {
            Some(row) => JournalEntry::from_backend_map(row),
            None => Ok(entry.clone()),
        }
    }

    /// Store an embedding for an existing entry.
    pub async fn update_entry_embedding(&self, id: &str, embedding: &[f32]) -> SouloResult<bool> {
        let rows = self
            .update(tables::JOURNAL_ENTRIES, &[Filter::eq("id", id)], &json!({ "embedding": embedding }))
            .await?;
        Ok(!rows.is_empty())
    }

    /// Delete an entry.
    pub async fn delete_journal_entry(&self, id: &str) -> SouloResult<bool> {
        Ok(self.delete(tables::JOURNAL_ENTRIES, &[Filter::eq("id", id)]).await? > 0)
    }

    async fn entries(&self, filters: &[Filter]) -> SouloResult<Vec<JournalEntry>> {
        let rows = self.select(tables::JOURNAL_ENTRIES, "*", filters).await?;
        rows.iter().map(JournalEntry::from_backend_map).collect()
    }

    // --- Threads & messages ---

    pub async fn create_thread(&self, thread: &ChatThread) -> SouloResult<ChatThread> {
        let rows = self.insert(tables::CHAT_THREADS, &thread.to_backend_map()).await?;
        match rows.first() {
            Some(row) => ChatThread::from_backend_map(row),
            None => Ok(thread.clone()),
        }
    }

    pub async fn get_thread(&self, id: &str) -> SouloResult<Option<ChatThread>> {
        let rows = self
            .select(tables::CHAT_THREADS, "*", &[Filter::eq("id", id), Filter::Limit(1)])
            .await?;
        rows.first().map(ChatThread::from_backend_map).transpose()
    }

    pub async fn list_threads(&self, user_id: &str, limit: usize) -> SouloResult<Vec<ChatThread>> {
        let rows = self
            .select(
                tables::CHAT_THREADS,
                "*",
                &[Filter::eq("user_id", user_id), Filter::order_desc("updated_at"), Filter::Limit(limit)],
            )
            .await?;
        rows.iter().map(ChatThread::from_backend_map).collect()
    }

    pub async fn rename_thread(&self, id: &str, title: &str) -> SouloResult<bool> {
        let rows = self
            .update(
                tables::CHAT_THREADS,
                &[Filter::eq("id", id)],
                &json!({ "title": title, "updated_at": timestamp::now_string() }),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    pub async fn touch_thread(&self, id: &str) -> SouloResult<()> {
        self.update(
            tables::CHAT_THREADS,
            &[Filter::eq("id", id)],
            &json!({ "updated_at": timestamp::now_string() }),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_thread(&self, id: &str) -> SouloResult<bool> {
        self.delete(tables::CHAT_MESSAGES, &[Filter::eq("thread_id", id)]).await?;
        Ok(self.delete(tables::CHAT_THREADS, &[Filter::eq("id", id)]).await? > 0)
    }

    pub async fn insert_message(&self, message: &ChatMessage) -> SouloResult<()> {
        self.insert(tables::CHAT_MESSAGES, &message.to_backend_map()).await?;
        Ok(())
    }

    /// The last `limit` messages of a thread in chronological order.
    pub async fn thread_messages(&self, thread_id: &str, limit: usize) -> SouloResult<Vec<ChatMessage>> {
        let rows = self
            .select(
                tables::CHAT_MESSAGES,
                "*",
                &[Filter::eq("thread_id", thread_id), Filter::order_desc("created_at"), Filter::Limit(limit)],
            )
            .await?;
        let mut messages = rows
            .iter()
            .map(ChatMessage::from_backend_map)
            .collect::<SouloResult<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }
}

fn truncate_json(value: &serde_json::Value) -> String {
    value.to_string().chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query_encodes_values() {
        let q = build_query(
            "*",
            &[
                Filter::eq("user_id", "u 1"),
                Filter::Gte("created_at".into(), "2024-01-01T00:00:00.000Z".into()),
                Filter::order_desc("created_at"),
                Filter::Limit(5),
            ],
        );
        assert_eq!(
            q,
            "select=*&user_id=eq.u+1&created_at=gte.2024-01-01T00%3A00%3A00.000Z&order=created_at.desc&limit=5"
        );
    }

    #[test]
    fn test_in_and_or_filters() {
        assert_eq!(
            Filter::In("id".into(), vec!["a".into(), "b".into()]).to_pair(),
            ("id".to_string(), "in.(\"a\",\"b\")".to_string())
        );
        assert_eq!(
            Filter::Or(vec!["content.ilike.*x*".into()]).to_pair(),
            ("or".to_string(), "(content.ilike.*x*)".to_string())
        );
        assert_eq!(
            Filter::IsNull("embedding".into()).to_pair().1,
            "is.null"
        );
    }

    #[test]
    fn test_new_requires_key() {
        let mut config = BackendConfig {
            url: "abc.supabase.co".into(),
            ..Default::default()
        };
        assert!(BackendClient::new(&config).is_err());
        config.anon_key = "anon".into();
        let client = BackendClient::new(&config).unwrap();
        assert_eq!(client.api().base_url(), "https://abc.supabase.co/rest/v1");
    }

    #[tokio::test]
    async fn test_unfiltered_delete_refused() {
        let config = BackendConfig {
            url: "localhost:1".into(),
            anon_key: "anon".into(),
            ..Default::default()
        };
        let client = BackendClient::new(&config).unwrap();
        assert!(matches!(
            client.delete("journal_entries", &[]).await,
            Err(SouloError::InvalidInput(_))
        ));
    }
}
