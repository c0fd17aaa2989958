//! Search executor.
//!
//! Walks a [`RoutingDecision`]'s fallback chain. Each route runs under the
//! remaining time budget; outbound searches share a semaphore sized by the
//! route's concurrency ceiling. A route fails on error, timeout or an empty
//! result, except the last route whose result is used as-is.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info, warn};

use soulo_api::{ChatMessageParam, CompletionOptions};
use soulo_core::error::{SouloError, SouloResult};
use soulo_models::queries::DateWindow;
use soulo_models::models::journal_entry::json_id;
use soulo_models::{timestamp, ScoredEntry};

use crate::store::{JournalStore, SqlRow};
use crate::traits::LanguageModel;

use super::planner::{QueryPlan, SearchStrategy};
use super::router::RoutingDecision;
use super::sql_guard::SqlGuard;

/// Minimum time granted to the last route even when the budget is spent.
const FINAL_ROUTE_FLOOR: Duration = Duration::from_secs(2);

/// Token budget for a generated statement.
const SQL_MAX_TOKENS: u32 = 500;

/// Counters describing one search.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDiagnostics {
    pub vector_hits: usize,
    pub sql_hits: usize,
    pub aggregate_rows: usize,
    pub duplicates_removed: usize,
    pub routes_attempted: Vec<SearchStrategy>,
    pub route_used: Option<SearchStrategy>,
    pub failures: Vec<String>,
    pub elapsed_ms: u64,
}

/// Entries and aggregate rows found for a question.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub entries: Vec<ScoredEntry>,
    pub aggregates: Vec<SqlRow>,
    /// The validated statement, when a SQL route produced the result.
    pub sql: Option<String>,
    pub diagnostics: SearchDiagnostics,
}

#[derive(Debug, Default)]
struct SqlResult {
    entries: Vec<ScoredEntry>,
    aggregates: Vec<SqlRow>,
    sql: String,
}

#[derive(Debug, Default)]
struct RouteResult {
    entries: Vec<ScoredEntry>,
    aggregates: Vec<SqlRow>,
    sql: Option<String>,
    vector_hits: usize,
    sql_hits: usize,
    duplicates_removed: usize,
}

impl RouteResult {
    fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.aggregates.is_empty()
    }

    fn combine(vector: SouloResult<Vec<ScoredEntry>>, sql: SouloResult<SqlResult>) -> SouloResult<Self> {
        match (vector, sql) {
            (Err(v), Err(s)) => Err(SouloError::Retrieval(format!("vector: {v}; sql: {s}"))),
            (vector, sql) => {
                if let Err(e) = &vector {
                    warn!("vector half of dual search failed: {e}");
                }
                if let Err(e) = &sql {
                    warn!("sql half of dual search failed: {e}");
                }
                let vector = vector.unwrap_or_default();
                let sql = sql.ok();
                let vector_hits = vector.len();
                let sql_hits = sql.as_ref().map(|s| s.entries.len()).unwrap_or(0);
                let (aggregates, statement, sql_entries) = match sql {
                    Some(s) => (s.aggregates, Some(s.sql), s.entries),
                    None => (Vec::new(), None, Vec::new()),
                };
                let (entries, duplicates_removed) = merge_results(vec![vector, sql_entries]);
                Ok(Self {
                    entries,
                    aggregates,
                    sql: statement,
                    vector_hits,
                    sql_hits,
                    duplicates_removed,
                })
            }
        }
    }
}

/// Per-question state shared by the routes.
struct SearchContext<'a> {
    question: &'a str,
    user_id: &'a str,
    plan: &'a QueryPlan,
    now: DateTime<Utc>,
    embedding: OnceCell<Vec<f32>>,
    permits: Semaphore,
}

/// Runs searches against a journal store.
#[derive(Clone)]
pub struct SearchExecutor {
    store: Arc<dyn JournalStore>,
    llm: Arc<dyn LanguageModel>,
    guard: SqlGuard,
    recent_count: usize,
}

impl SearchExecutor {
    pub fn new(
        store: Arc<dyn JournalStore>,
        llm: Arc<dyn LanguageModel>,
        guard: SqlGuard,
        recent_count: usize,
    ) -> Self {
        Self {
            store,
            llm,
            guard,
            recent_count: recent_count.max(1),
        }
    }

    /// Search for a question, walking the fallback chain.
    pub async fn execute(
        &self,
        question: &str,
        user_id: &str,
        plan: &QueryPlan,
        decision: &RoutingDecision,
        now: DateTime<Utc>,
    ) -> SouloResult<SearchOutcome> {
        let started = Instant::now();
        let deadline = started + decision.budget();
        let ctx = SearchContext {
            question,
            user_id,
            plan,
            now,
            embedding: OnceCell::new(),
            permits: Semaphore::new(decision.max_concurrency.max(1)),
        };

        let mut diagnostics = SearchDiagnostics::default();
        let last = decision.chain.len().saturating_sub(1);

        for (i, strategy) in decision.chain.iter().copied().enumerate() {
            let is_final = i == last;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let budget = if is_final { remaining.max(FINAL_ROUTE_FLOOR) } else { remaining };
            diagnostics.routes_attempted.push(strategy);

            if budget.is_zero() {
                diagnostics.failures.push(format!("{strategy}: budget exhausted"));
                continue;
            }

            match tokio::time::timeout(budget, self.run_route(strategy, &ctx)).await {
                Ok(Ok(result)) if is_final || !result.is_empty() => {
                    let mut entries = result.entries;
                    entries.truncate(plan.max_entries);

                    diagnostics.vector_hits = result.vector_hits;
                    diagnostics.sql_hits = result.sql_hits;
                    diagnostics.aggregate_rows = result.aggregates.len();
                    diagnostics.duplicates_removed = result.duplicates_removed;
                    diagnostics.route_used = Some(strategy);
                    diagnostics.elapsed_ms = started.elapsed().as_millis() as u64;

                    info!(
                        route = %strategy,
                        vector_hits = diagnostics.vector_hits,
                        sql_hits = diagnostics.sql_hits,
                        aggregate_rows = diagnostics.aggregate_rows,
                        duplicates_removed = diagnostics.duplicates_removed,
                        routes_attempted = diagnostics.routes_attempted.len(),
                        elapsed_ms = diagnostics.elapsed_ms,
                        "search complete"
                    );

                    return Ok(SearchOutcome {
                        entries,
                        aggregates: result.aggregates,
                        sql: result.sql,
                        diagnostics,
                    });
                }
                Ok(Ok(_)) => {
                    debug!("route {strategy} found nothing, falling back");
                    diagnostics.failures.push(format!("{strategy}: no results"));
                }
                Ok(Err(e)) => {
                    warn!("route {strategy} failed: {e}");
                    diagnostics.failures.push(format!("{strategy}: {e}"));
                }
                Err(_) => {
                    warn!("route {strategy} timed out after {}ms", budget.as_millis());
                    diagnostics
                        .failures
                        .push(format!("{strategy}: timed out after {}ms", budget.as_millis()));
                }
            }
        }

        Err(SouloError::Retrieval(diagnostics.failures.join("; ")))
    }

    async fn run_route(&self, strategy: SearchStrategy, ctx: &SearchContext<'_>) -> SouloResult<RouteResult> {
        match strategy {
            SearchStrategy::VectorOnly => {
                let hits = self.vector_search(ctx, ctx.plan.window()).await?;
                Ok(RouteResult {
                    vector_hits: hits.len(),
                    entries: hits,
                    ..Default::default()
                })
            }
            SearchStrategy::SqlOnly => {
                let sql = self.sql_search(ctx).await?;
                Ok(RouteResult {
                    sql_hits: sql.entries.len(),
                    entries: sql.entries,
                    aggregates: sql.aggregates,
                    sql: Some(sql.sql),
                    ..Default::default()
                })
            }
            SearchStrategy::DualParallel => {
                let (vector, sql) = tokio::join!(
                    self.vector_search(ctx, ctx.plan.window()),
                    self.sql_search(ctx)
                );
                RouteResult::combine(vector, sql)
            }
            SearchStrategy::DualSequential => {
                let sql = self.sql_search(ctx).await;
                let window = match &sql {
                    Ok(result) => entry_span(&result.entries).or_else(|| ctx.plan.window()),
                    Err(_) => ctx.plan.window(),
                };
                let vector = self.vector_search(ctx, window).await;
                RouteResult::combine(vector, sql)
            }
            SearchStrategy::RecentEntries => {
                let entries = self.store.recent_entries(ctx.user_id, self.recent_count).await?;
                Ok(RouteResult {
                    entries: entries.into_iter().map(|e| ScoredEntry::new(e, None)).collect(),
                    ..Default::default()
                })
            }
        }
    }

    async fn vector_search(
        &self,
        ctx: &SearchContext<'_>,
        window: Option<DateWindow>,
    ) -> SouloResult<Vec<ScoredEntry>> {
        let _permit = ctx
            .permits
            .acquire()
            .await
            .map_err(|e| SouloError::Internal(e.to_string()))?;

        let embedding = ctx
            .embedding
            .get_or_try_init(|| self.llm.embed(ctx.question))
            .await?;

        self.store
            .match_entries(
                ctx.user_id,
                embedding,
                ctx.plan.similarity_threshold,
                ctx.plan.max_entries,
                window.as_ref(),
            )
            .await
    }

    async fn sql_search(&self, ctx: &SearchContext<'_>) -> SouloResult<SqlResult> {
        let _permit = ctx
            .permits
            .acquire()
            .await
            .map_err(|e| SouloError::Internal(e.to_string()))?;

        let messages = sql_generation_messages(
            ctx.question,
            ctx.plan,
            self.store.as_ref(),
            ctx.now,
            self.guard.row_limit(),
        );
        let raw = self
            .llm
            .complete(&messages, &CompletionOptions::structured(SQL_MAX_TOKENS))
            .await?;
        let sql = self.guard.validate(&raw)?;
        debug!(sql = %sql, store = self.store.name(), "executing generated sql");

        let rows = self.store.execute_query(&sql, ctx.user_id).await?;
        let (ids, aggregates) = split_rows(rows);
        let entries = if ids.is_empty() {
            Vec::new()
        } else {
            self.store
                .entries_by_ids(&ids)
                .await?
                .into_iter()
                .filter(|e| e.user_id == ctx.user_id)
                .map(|e| ScoredEntry::new(e, None))
                .collect()
        };

        Ok(SqlResult { entries, aggregates, sql })
    }
}

/// Rows carrying an `id` name entries; the rest are aggregate rows.
pub fn split_rows(rows: Vec<SqlRow>) -> (Vec<String>, Vec<SqlRow>) {
    let mut ids: Vec<String> = Vec::new();
    let mut aggregates = Vec::new();
    for row in rows {
        match row.get("id").and_then(json_id) {
            Some(id) => {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            None => aggregates.push(row),
        }
    }
    (ids, aggregates)
}

/// Dedupe by entry id keeping the best similarity, then rank by similarity
/// (unscored last) and recency. Returns the merged list and the number of
/// duplicates dropped.
pub fn merge_results(lists: Vec<Vec<ScoredEntry>>) -> (Vec<ScoredEntry>, usize) {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<ScoredEntry> = Vec::new();
    let mut duplicates = 0;

    for item in lists.into_iter().flatten() {
        match index.get(&item.entry.id) {
            Some(&i) => {
                duplicates += 1;
                if item.similarity > merged[i].similarity {
                    merged[i].similarity = item.similarity;
                }
            }
            None => {
                index.insert(item.entry.id.clone(), merged.len());
                merged.push(item);
            }
        }
    }

    merged.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.entry.created_at.cmp(&a.entry.created_at))
    });
    (merged, duplicates)
}

/// Whole-day window covering the given entries.
pub fn entry_span(entries: &[ScoredEntry]) -> Option<DateWindow> {
    let first = entries.iter().map(|e| e.entry.created_at).min()?;
    let last = entries.iter().map(|e| e.entry.created_at).max()?;
    let start = first.date_naive().and_time(chrono::NaiveTime::MIN).and_utc();
    let end = (last.date_naive() + chrono::Duration::days(1))
        .and_time(chrono::NaiveTime::MIN)
        .and_utc();
    Some(DateWindow::new(start, end))
}

/// Prompt asking the model for one guarded statement.
pub fn sql_generation_messages(
    question: &str,
    plan: &QueryPlan,
    store: &dyn JournalStore,
    now: DateTime<Utc>,
    row_limit: usize,
) -> Vec<ChatMessageParam> {
    let dialect = store.dialect();
    let mut system = format!(
        "You write one read-only {dialect} query over a personal journal.\n\
         Table: {schema}\n\n\
         Rules:\n\
         - Reply with the SQL only: no explanation, no code fences.\n\
         - One SELECT (or WITH ... SELECT) statement that reads from journal_entries and no other table.\n\
         - Always filter with user_id = :user_id.\n\
         - Never select the embedding column.\n\
         - When the answer is a list of entries, select id and created_at so the entries can be loaded.\n\
         - When the answer is a number or a grouping, return aggregate columns with clear aliases and no id column.\n\
         - End with LIMIT {row_limit} or lower.\n\
         {hints}\n\n\
         Current time: {now} (UTC).",
        dialect = dialect.as_str(),
        schema = dialect.schema_description(),
        hints = dialect.hints(),
        now = timestamp::to_string(&now),
    );

    if let Some(range) = &plan.time_range {
        system.push_str(&format!(
            "\nThe question refers to {}: created_at >= '{}' AND created_at < '{}'.",
            range.label,
            timestamp::to_string(&range.start),
            timestamp::to_string(&range.end),
        ));
    }
    if !plan.emotion_filters.is_empty() {
        system.push_str(&format!(
            "\nEmotions of interest (keys of the emotions column): {}.",
            plan.emotion_filters.join(", ")
        ));
    }
    if !plan.themes.is_empty() {
        system.push_str(&format!("\nTopics of interest: {}.", plan.themes.join(", ")));
    }

    vec![ChatMessageParam::system(system), ChatMessageParam::user(question)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use serde_json::json;
    use soulo_models::JournalEntry;

    fn scored(id: &str, similarity: Option<f32>, day: u32) -> ScoredEntry {
        let mut e = JournalEntry::new("u1", id);
        e.id = id.to_string();
        e.created_at = Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap();
        ScoredEntry::new(e, similarity)
    }

    fn ids(list: &[ScoredEntry]) -> Vec<&str> {
        list.iter().map(|s| s.entry.id.as_str()).collect()
    }

    #[test]
    fn test_merge_dedupes_keeping_best_similarity() {
        let vector = vec![scored("a", Some(0.6), 1), scored("b", Some(0.9), 2)];
        let sql = vec![scored("a", None, 1), scored("c", None, 5), scored("b", None, 2)];
        let (merged, duplicates) = merge_results(vec![vector, sql]);
        assert_eq!(duplicates, 2);
        assert_eq!(ids(&merged), vec!["b", "a", "c"]);
        assert_eq!(merged[1].similarity, Some(0.6));
    }

    #[test]
    fn test_merge_upgrades_unscored_duplicate() {
        let (merged, _) = merge_results(vec![vec![scored("a", None, 1)], vec![scored("a", Some(0.4), 1)]]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].similarity, Some(0.4));
    }

    #[test]
    fn test_merge_orders_unscored_by_recency() {
        let (merged, duplicates) =
            merge_results(vec![vec![scored("old", None, 1), scored("new", None, 9), scored("mid", None, 4)]]);
        assert_eq!(duplicates, 0);
        assert_eq!(ids(&merged), vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_split_rows() {
        let rows: Vec<SqlRow> = vec![
            json!({"id": "e1", "created_at": "2024-05-01"}),
            json!({"month": "2024-05", "avg_sentiment": 0.4}),
            json!({"id": "e1"}),
            json!({"id": 42}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
        let (ids, aggregates) = split_rows(rows);
        assert_eq!(ids, vec!["e1".to_string(), "42".to_string()]);
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0]["month"], "2024-05");
    }

    #[test]
    fn test_entry_span() {
        assert!(entry_span(&[]).is_none());
        let span = entry_span(&[scored("a", None, 3), scored("b", None, 7)]).unwrap();
        assert_eq!(span.start, Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap());
        assert_eq!(span.end, Utc.with_ymd_and_hms(2024, 5, 8, 0, 0, 0).unwrap());
        assert!(span.contains(&(span.end - ChronoDuration::seconds(1))));
    }
}
