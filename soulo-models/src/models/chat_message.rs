//! Chat message entity model.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use soulo_core::constants::roles;
use soulo_core::error::{SouloError, SouloResult};

use crate::timestamp;

/// A user or assistant message within a thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub thread_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Entries cited by an assistant answer.
    pub reference_entries: Option<serde_json::Value>,
    /// Complexity/plan analysis attached to an assistant answer.
    pub analysis: Option<serde_json::Value>,
}

impl ChatMessage {
    /// Create a new message. Only `user` and `assistant` roles are persisted.
    pub fn new(thread_id: &str, role: &str, content: &str) -> SouloResult<Self> {
        if !roles::PERSISTED.contains(&role) {
            return Err(SouloError::InvalidInput(format!("role '{role}' cannot be stored")));
        }
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            reference_entries: None,
            analysis: None,
        })
    }

    pub fn is_user(&self) -> bool {
        self.role == roles::USER
    }

    /// Create a ChatMessage from a PostgREST row.
    pub fn from_backend_map(map: &serde_json::Value) -> SouloResult<Self> {
        let id = map
            .get("id")
            .and_then(crate::models::journal_entry::json_id)
            .ok_or_else(|| SouloError::Serialization("chat message row without id".into()))?;
        let json_field = |key: &str| {
            map.get(key).and_then(|v| match v {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => serde_json::from_str(s).ok(),
                other => Some(other.clone()),
            })
        };
        Ok(Self {
            id,
            thread_id: map.get("thread_id").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            role: map
                .get("role")
                .and_then(|v| v.as_str())
                .unwrap_or(roles::USER)
                .to_string(),
            content: map.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            created_at: map
                .get("created_at")
                .and_then(|v| v.as_str())
                .and_then(timestamp::parse)
                .unwrap_or_default(),
            reference_entries: json_field("reference_entries"),
            analysis: json_field("analysis"),
        })
    }

    /// Serialize to a PostgREST insert body.
    pub fn to_backend_map(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "thread_id": self.thread_id,
            "role": self.role,
            "content": self.content,
            "created_at": timestamp::to_string(&self.created_at),
            "reference_entries": self.reference_entries,
            "analysis": self.analysis,
        })
    }

    /// Construct a ChatMessage from a database row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created_at: String = row.get("created_at")?;
        let references: Option<String> = row.get("reference_entries")?;
        let analysis: Option<String> = row.get("analysis")?;
        Ok(Self {
            id: row.get("id")?,
            thread_id: row.get("thread_id")?,
            role: row.get("role")?,
            content: row.get("content")?,
            created_at: timestamp::parse(&created_at).unwrap_or_default(),
            reference_entries: references.and_then(|s| serde_json::from_str(&s).ok()),
            analysis: analysis.and_then(|s| serde_json::from_str(&s).ok()),
        })
    }

    /// Insert this message.
    pub fn save(&self, conn: &Connection) -> SouloResult<()> {
        let references = self
            .reference_entries
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let analysis = self.analysis.as_ref().map(serde_json::to_string).transpose()?;

        conn.execute(
            "INSERT OR REPLACE INTO chat_messages
                (id, thread_id, role, content, created_at, reference_entries, analysis)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.id,
                self.thread_id,
                self.role,
                self.content,
                timestamp::to_string(&self.created_at),
                references,
                analysis,
            ],
        )
        .map_err(|e| SouloError::Database(e.to_string()))?;
        Ok(())
    }
}
