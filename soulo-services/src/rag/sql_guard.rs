//! Validation for model-written SQL.
//!
//! Generated statements must be a single read-only query over
//! `journal_entries`, scoped with a `:user_id` placeholder. The guard also
//! enforces a row limit. Stores execute only what the guard returns.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

use soulo_core::constants::tables;
use soulo_core::error::{SouloError, SouloResult};

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").unwrap();
    static ref WORD: Regex = Regex::new(r"[a-z_][a-z0-9_]*").unwrap();
    static ref TABLE_REF: Regex = Regex::new(r"\b(?:from|join)\s+([a-z_][a-z0-9_\.]*)(\s*\()?").unwrap();
    static ref CTE_NAME: Regex = Regex::new(r"\b([a-z_][a-z0-9_]*)\s+as\s*(?:not\s+)?(?:materialized\s+)?\(").unwrap();
    static ref TRAILING_LIMIT: Regex = Regex::new(r"\blimit\s+(\d+)\s*$").unwrap();
}

/// Keywords that never appear in a read-only query over the journal.
const FORBIDDEN: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "grant", "revoke",
    "attach", "detach", "pragma", "vacuum", "merge", "copy", "call", "execute", "reindex", "into",
    "lock", "analyze", "pg_sleep", "pg_read_file", "pg_ls_dir", "dblink", "load_extension",
    "set_config", "current_setting",
];

/// Relations outside the journal, however they are referenced.
const OTHER_TABLES: &[&str] = &[
    "chat_messages", "chat_threads", "reminders", "schema_version", "information_schema",
    "auth", "storage", "users",
];

/// Set-returning functions allowed in FROM/JOIN.
const TABLE_FUNCTIONS: &[&str] = &[
    "jsonb_each", "jsonb_each_text", "jsonb_array_elements", "jsonb_array_elements_text",
    "json_each", "json_tree", "unnest", "generate_series",
];

/// Columns of `journal_entries`; `EXTRACT(x FROM created_at)` looks like a
/// table reference to the scanner.
const ENTRY_COLUMNS: &[&str] = &[
    "id", "user_id", "content", "transcript", "created_at", "duration_secs", "audio_url",
    "sentiment", "sentiment_magnitude", "emotions", "themes", "embedding",
];

/// Placeholder every statement must filter on.
pub const USER_PLACEHOLDER: &str = ":user_id";

/// Validates generated SQL and enforces a row limit.
#[derive(Debug, Clone)]
pub struct SqlGuard {
    row_limit: usize,
}

impl SqlGuard {
    pub fn new(row_limit: usize) -> Self {
        Self { row_limit: row_limit.max(1) }
    }

    pub fn row_limit(&self) -> usize {
        self.row_limit
    }

    /// Validate a statement and return it normalized (fences and trailing
    /// semicolons removed, LIMIT present and capped).
    pub fn validate(&self, raw: &str) -> SouloResult<String> {
        let mut sql = raw.trim().to_string();
        if let Some(caps) = CODE_FENCE.captures(&sql) {
            sql = caps[1].trim().to_string();
        }
        let sql = sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace()).to_string();
        if sql.is_empty() {
            return Err(reject("empty statement"));
        }

        let scrubbed = strip_string_literals(&sql)?.to_ascii_lowercase();

        if scrubbed.contains(';') {
            return Err(reject("multiple statements"));
        }
        if scrubbed.contains("--") || scrubbed.contains("/*") {
            return Err(reject("comments are not allowed"));
        }
        if !(scrubbed.starts_with("select") || scrubbed.starts_with("with")) {
            return Err(reject("only SELECT or WITH queries are allowed"));
        }
        for word in WORD.find_iter(&scrubbed).map(|m| m.as_str()) {
            if FORBIDDEN.contains(&word) {
                return Err(reject(&format!("forbidden keyword '{word}'")));
            }
            if OTHER_TABLES.contains(&word) || word.starts_with("pg_") || word.starts_with("sqlite_") {
                return Err(reject(&format!("'{word}' is not allowed")));
            }
        }

        self.check_tables(&scrubbed)?;

        if !sql.contains(USER_PLACEHOLDER) {
            return Err(reject("query must filter on user_id = :user_id"));
        }

        Ok(self.apply_limit(sql, &scrubbed))
    }

    fn check_tables(&self, scrubbed: &str) -> SouloResult<()> {
        let ctes: HashSet<&str> = CTE_NAME
            .captures_iter(scrubbed)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();

        let mut references_entries = false;
        for caps in TABLE_REF.captures_iter(scrubbed) {
            let name = caps[1].trim_start_matches("public.");
            let is_call = caps.get(2).is_some();
            let allowed = if is_call {
                TABLE_FUNCTIONS.contains(&name)
            } else {
                ctes.contains(name) || ENTRY_COLUMNS.contains(&name)
            };
            if name == tables::JOURNAL_ENTRIES {
                references_entries = true;
            } else if !allowed {
                return Err(reject(&format!("table '{name}' is not allowed")));
            }
        }

        if !references_entries {
            return Err(reject("query must read from journal_entries"));
        }
        Ok(())
    }

    fn apply_limit(&self, sql: String, scrubbed: &str) -> String {
        match TRAILING_LIMIT.captures(scrubbed) {
            Some(caps) => {
                let requested: usize = caps[1].parse().unwrap_or(usize::MAX);
                if requested <= self.row_limit {
                    return sql;
                }
                // the scrubbed text only differs inside literals, so the
                // trailing LIMIT sits at the same offset
                let start = caps.get(0).map(|m| m.start()).unwrap_or(sql.len());
                format!("{} LIMIT {}", sql[..start].trim_end(), self.row_limit)
            }
            None => format!("{sql} LIMIT {}", self.row_limit),
        }
    }
}

fn reject(reason: &str) -> SouloError {
    SouloError::UnsafeQuery(reason.to_string())
}

/// Blank out the contents of single-quoted literals, keeping byte offsets.
fn strip_string_literals(sql: &str) -> SouloResult<String> {
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if in_literal {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    out.push_str("  ");
                    continue;
                }
                in_literal = false;
                out.push('\'');
            } else {
                out.extend(std::iter::repeat(' ').take(c.len_utf8()));
            }
        } else {
            if c == '\'' {
                in_literal = true;
            }
            out.push(c);
        }
    }
    if in_literal {
        return Err(reject("unterminated string literal"));
    }
    Ok(out)
}
