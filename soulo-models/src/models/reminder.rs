//! Journal reminder entity model.
//!
//! Reminders are daily local-time triggers. Only the schedule is modelled;
//! delivering the notification is up to the client platform.

use chrono::{Duration, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use soulo_core::constants::reminders::{DEFAULT_BODY, DEFAULT_TITLE};
use soulo_core::error::{SouloError, SouloResult};

use crate::timestamp;

/// A daily reminder at a fixed `HH:MM` local time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reminder {
    pub id: Option<i64>,
    pub time: String,
    pub title: String,
    pub body: String,
    pub enabled: bool,
    pub created_at: String,
}

impl Reminder {
    /// Create an enabled reminder, validating the time and applying the
    /// default title/body when none are given.
    pub fn new(time: &str, title: Option<&str>, body: Option<&str>) -> SouloResult<Self> {
        let parsed = parse_time(time)?;
        Ok(Self {
            id: None,
            time: parsed.format("%H:%M").to_string(),
            title: title.filter(|t| !t.trim().is_empty()).unwrap_or(DEFAULT_TITLE).to_string(),
            body: body.filter(|b| !b.trim().is_empty()).unwrap_or(DEFAULT_BODY).to_string(),
            enabled: true,
            created_at: timestamp::now_string(),
        })
    }

    /// The reminder's time of day.
    pub fn time_of_day(&self) -> SouloResult<NaiveTime> {
        parse_time(&self.time)
    }

    /// Next trigger strictly after `now`: today at the reminder time if that
    /// is still ahead, otherwise the same time tomorrow.
    pub fn next_occurrence(&self, now: NaiveDateTime) -> SouloResult<NaiveDateTime> {
        let today = now.date().and_time(self.time_of_day()?);
        if today > now {
            Ok(today)
        } else {
            Ok(today + Duration::days(1))
        }
    }

    /// Construct a Reminder from a database row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get("id")?),
            time: row.get("time")?,
            title: row.get("title")?,
            body: row.get("body")?,
            enabled: row.get("enabled")?,
            created_at: row.get("created_at")?,
        })
    }

    /// Save or update this reminder in the database.
    pub fn save(&mut self, conn: &Connection) -> SouloResult<i64> {
        match self.id {
            Some(id) => {
                conn.execute(
                    "UPDATE reminders SET time = ?1, title = ?2, body = ?3, enabled = ?4 WHERE id = ?5",
                    params![self.time, self.title, self.body, self.enabled, id],
                )
                .map_err(|e| SouloError::Database(e.to_string()))?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO reminders (time, title, body, enabled, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![self.time, self.title, self.body, self.enabled, self.created_at],
                )
                .map_err(|e| SouloError::Database(e.to_string()))?;
                let id = conn.last_insert_rowid();
                self.id = Some(id);
                Ok(id)
            }
        }
    }

    /// Load all reminders ordered by time of day.
    pub fn load_all(conn: &Connection) -> SouloResult<Vec<Self>> {
        let mut stmt = conn
            .prepare("SELECT * FROM reminders ORDER BY time ASC, id ASC")
            .map_err(|e| SouloError::Database(e.to_string()))?;

        let reminders = stmt
            .query_map([], Self::from_row)
            .map_err(|e| SouloError::Database(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(reminders)
    }

    /// Enable or disable a reminder.
    pub fn set_enabled(conn: &Connection, id: i64, enabled: bool) -> SouloResult<bool> {
        let changed = conn
            .execute("UPDATE reminders SET enabled = ?1 WHERE id = ?2", params![enabled, id])
            .map_err(|e| SouloError::Database(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Delete a reminder by ID.
    pub fn delete(conn: &Connection, id: i64) -> SouloResult<bool> {
        let changed = conn
            .execute("DELETE FROM reminders WHERE id = ?1", [id])
            .map_err(|e| SouloError::Database(e.to_string()))?;
        Ok(changed > 0)
    }
}

/// Parse an `HH:MM` (24-hour) time.
pub fn parse_time(value: &str) -> SouloResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| SouloError::InvalidInput(format!("invalid reminder time '{value}', expected HH:MM")))
}
