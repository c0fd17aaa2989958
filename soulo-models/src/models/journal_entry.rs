//! Journal entry entity model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use soulo_core::error::{SouloError, SouloResult};

use crate::{embedding, timestamp};

/// A single voice or text journal entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    pub id: String,
    pub user_id: String,
    /// Refined text shown to the user and used for retrieval.
    pub content: String,
    /// Raw speech-to-text output, when the entry was recorded.
    pub transcript: Option<String>,
    pub created_at: DateTime<Utc>,
    pub duration_secs: Option<f64>,
    pub audio_url: Option<String>,
    /// Document sentiment score in [-1, 1].
    pub sentiment: Option<f64>,
    pub sentiment_magnitude: Option<f64>,
    /// Emotion name to intensity in [0, 1].
    #[serde(default)]
    pub emotions: BTreeMap<String, f64>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default, skip_serializing)]
    pub embedding: Option<Vec<f32>>,
}

/// An entry returned by a search, with its similarity when known.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub entry: JournalEntry,
    /// Cosine similarity to the query; `None` for SQL or recency results.
    pub similarity: Option<f32>,
}

impl ScoredEntry {
    pub fn new(entry: JournalEntry, similarity: Option<f32>) -> Self {
        Self { entry, similarity }
    }
}

impl JournalEntry {
    /// Create a new entry with a fresh UUID and the current time.
    pub fn new(user_id: &str, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            transcript: None,
            created_at: Utc::now(),
            duration_secs: None,
            audio_url: None,
            sentiment: None,
            sentiment_magnitude: None,
            emotions: BTreeMap::new(),
            themes: Vec::new(),
            embedding: None,
        }
    }

    /// Create a JournalEntry from a PostgREST row.
    ///
    /// `emotions`/`themes` may arrive as JSON or as JSON-encoded text;
    /// `embedding` as an array or pgvector text.
    pub fn from_backend_map(map: &serde_json::Value) -> SouloResult<Self> {
        let id = map
            .get("id")
            .and_then(json_id)
            .ok_or_else(|| SouloError::Serialization("journal entry row without id".into()))?;

        let created_at = map
            .get("created_at")
            .and_then(|v| v.as_str())
            .and_then(timestamp::parse)
            .unwrap_or_default();

        let emotions = map
            .get("emotions")
            .map(decode_json_field::<BTreeMap<String, f64>>)
            .unwrap_or_default();
        let themes = map
            .get("themes")
            .map(decode_json_field::<Vec<String>>)
            .unwrap_or_default();

        Ok(Self {
            id,
            user_id: map
                .get("user_id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            content: map
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            transcript: map.get("transcript").and_then(|v| v.as_str()).map(String::from),
            created_at,
            duration_secs: map.get("duration_secs").and_then(|v| v.as_f64()),
            audio_url: map.get("audio_url").and_then(|v| v.as_str()).map(String::from),
            sentiment: map.get("sentiment").and_then(|v| v.as_f64()),
            sentiment_magnitude: map.get("sentiment_magnitude").and_then(|v| v.as_f64()),
            emotions,
            themes,
            embedding: map.get("embedding").and_then(embedding::from_json),
        })
    }

    /// Serialize to a PostgREST insert body (embedding as a JSON array).
    pub fn to_backend_map(&self) -> serde_json::Value {
        let mut map = serde_json::json!({
            "id": self.id,
            "user_id": self.user_id,
            "content": self.content,
            "transcript": self.transcript,
            "created_at": timestamp::to_string(&self.created_at),
            "duration_secs": self.duration_secs,
            "audio_url": self.audio_url,
            "sentiment": self.sentiment,
            "sentiment_magnitude": self.sentiment_magnitude,
            "emotions": self.emotions,
            "themes": self.themes,
        });
        if let Some(vector) = &self.embedding {
            map["embedding"] = serde_json::json!(vector);
        }
        map
    }

    /// Construct a JournalEntry from a database row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created_at: String = row.get("created_at")?;
        let emotions: String = row.get("emotions")?;
        let themes: String = row.get("themes")?;
        let blob: Option<Vec<u8>> = row.get("embedding")?;

        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            content: row.get("content")?,
            transcript: row.get("transcript")?,
            created_at: timestamp::parse(&created_at).unwrap_or_default(),
            duration_secs: row.get("duration_secs")?,
            audio_url: row.get("audio_url")?,
            sentiment: row.get("sentiment")?,
            sentiment_magnitude: row.get("sentiment_magnitude")?,
            emotions: serde_json::from_str(&emotions).unwrap_or_default(),
            themes: serde_json::from_str(&themes).unwrap_or_default(),
            embedding: blob.and_then(|b| embedding::decode(&b).ok()),
        })
    }

    /// Find an entry by id.
    pub fn find_by_id(conn: &Connection, id: &str) -> SouloResult<Option<Self>> {
        match conn.query_row(
            "SELECT * FROM journal_entries WHERE id = ?1",
            [id],
            Self::from_row,
        ) {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SouloError::Database(e.to_string())),
        }
    }

    /// Insert or replace this entry.
    pub fn save(&self, conn: &Connection) -> SouloResult<()> {
        let emotions = serde_json::to_string(&self.emotions)?;
        let themes = serde_json::to_string(&self.themes)?;
        let blob = self.embedding.as_deref().map(embedding::encode);

        conn.execute(
            "INSERT OR REPLACE INTO journal_entries (
                id, user_id, content, transcript, created_at, duration_secs,
                audio_url, sentiment, sentiment_magnitude, emotions, themes, embedding
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                self.id,
                self.user_id,
                self.content,
                self.transcript,
                timestamp::to_string(&self.created_at),
                self.duration_secs,
                self.audio_url,
                self.sentiment,
                self.sentiment_magnitude,
                emotions,
                themes,
                blob,
            ],
        )
        .map_err(|e| SouloError::Database(e.to_string()))?;
        Ok(())
    }

    /// Store only the embedding for an existing entry.
    pub fn update_embedding(conn: &Connection, id: &str, vector: &[f32]) -> SouloResult<bool> {
        let changed = conn
            .execute(
                "UPDATE journal_entries SET embedding = ?1 WHERE id = ?2",
                params![embedding::encode(vector), id],
            )
            .map_err(|e| SouloError::Database(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Delete an entry by id.
    pub fn delete(conn: &Connection, id: &str) -> SouloResult<bool> {
        let changed = conn
            .execute("DELETE FROM journal_entries WHERE id = ?1", [id])
            .map_err(|e| SouloError::Database(e.to_string()))?;
        Ok(changed > 0)
    }

    /// The text used for embeddings and prompts.
    pub fn text(&self) -> &str {
        if self.content.trim().is_empty() {
            self.transcript.as_deref().unwrap_or("")
        } else {
            &self.content
        }
    }

    /// Emotions sorted by intensity, strongest first.
    pub fn top_emotions(&self, n: usize) -> Vec<(&str, f64)> {
        let mut list: Vec<(&str, f64)> =
            self.emotions.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        list.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        list.truncate(n);
        list
    }

    /// Human-readable sentiment label for the entry's score.
    pub fn sentiment_label(&self) -> &'static str {
        sentiment_label(self.sentiment)
    }
}

/// Human-readable label for a sentiment score in [-1, 1].
pub fn sentiment_label(score: Option<f64>) -> &'static str {
    match score {
        Some(s) if s >= 0.25 => "positive",
        Some(s) if s <= -0.25 => "negative",
        Some(_) => "neutral",
        None => "unknown",
    }
}

/// Ids arrive as strings from PostgREST but may be numeric in SQL results.
pub fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decode_json_field<T: serde::de::DeserializeOwned + Default>(value: &serde_json::Value) -> T {
    match value {
        serde_json::Value::String(text) => serde_json::from_str(text).unwrap_or_default(),
        serde_json::Value::Null => T::default(),
        other => serde_json::from_value(other.clone()).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn sample() -> JournalEntry {
        let mut entry = JournalEntry::new("user-1", "Walked by the river, felt calm.");
        entry.sentiment = Some(0.6);
        entry.emotions.insert("calm".into(), 0.8);
        entry.emotions.insert("joy".into(), 0.4);
        entry.themes = vec!["nature".into()];
        entry.embedding = Some(vec![0.1, 0.2, 0.3]);
        entry
    }

    #[test]
    fn test_entry_from_backend_map() {
        let json = serde_json::json!({
            "id": "e1",
            "user_id": "u1",
            "content": "Hello",
            "created_at": "2024-05-01T08:30:00+00:00",
            "sentiment": -0.4,
            "emotions": "{\"sadness\": 0.7}",
            "themes": ["work", "sleep"],
            "embedding": "[0.5,0.25]"
        });
        let entry = JournalEntry::from_backend_map(&json).unwrap();
        assert_eq!(entry.id, "e1");
        assert_eq!(entry.emotions.get("sadness"), Some(&0.7));
        assert_eq!(entry.themes.len(), 2);
        assert_eq!(entry.embedding, Some(vec![0.5, 0.25]));
        assert_eq!(entry.sentiment_label(), "negative");
    }

    #[test]
    fn test_entry_without_id_is_rejected() {
        let json = serde_json::json!({ "content": "x" });
        assert!(JournalEntry::from_backend_map(&json).is_err());
    }

    #[test]
    fn test_save_and_find() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        let entry = sample();
        entry.save(&conn).unwrap();

        let loaded = JournalEntry::find_by_id(&conn, &entry.id).unwrap().unwrap();
        assert_eq!(loaded.content, entry.content);
        assert_eq!(loaded.emotions, entry.emotions);
        assert_eq!(loaded.embedding, entry.embedding);
        assert!(JournalEntry::find_by_id(&conn, "missing").unwrap().is_none());

        assert!(JournalEntry::delete(&conn, &entry.id).unwrap());
        assert!(!JournalEntry::delete(&conn, &entry.id).unwrap());
    }

    #[test]
    fn test_top_emotions_and_text() {
        let mut entry = sample();
        assert_eq!(entry.top_emotions(1), vec![("calm", 0.8)]);
        entry.content = "  ".into();
        entry.transcript = Some("raw words".into());
        assert_eq!(entry.text(), "raw words");
    }

    #[test]
    fn test_embedding_not_serialized() {
        let value = serde_json::to_value(sample()).unwrap();
        assert!(value.get("embedding").is_none());
        assert!(sample().to_backend_map().get("embedding").is_some());
    }
}
