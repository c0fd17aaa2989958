//! Journal reminder service.
//!
//! Manages the daily reminder schedule kept in the local database and
//! computes when the next reminder is due. Delivering notifications is left
//! to the client platform.

use chrono::NaiveDateTime;
use tracing::info;

use soulo_core::error::{SouloError, SouloResult};
use soulo_models::{Database, Reminder};

use crate::event_bus::{AppEvent, EventBus};
use crate::service::{Service, ServiceState, StateCell};

/// Service for the journal reminder schedule.
pub struct ReminderService {
    state: StateCell,
    database: Database,
    event_bus: EventBus,
}

impl ReminderService {
    /// Create a new ReminderService.
    pub fn new(database: Database, event_bus: EventBus) -> Self {
        Self {
            state: StateCell::new(),
            database,
            event_bus,
        }
    }

    /// All reminders ordered by time of day.
    pub fn list(&self) -> SouloResult<Vec<Reminder>> {
        let conn = self.database.conn()?;
        Reminder::load_all(&conn)
    }

    /// Add an enabled reminder at `HH:MM`.
    pub fn add(&self, time: &str, title: Option<&str>, body: Option<&str>) -> SouloResult<Reminder> {
        let mut reminder = Reminder::new(time, title, body)?;
        let conn = self.database.conn()?;
        reminder.save(&conn)?;
        info!("added reminder at {}", reminder.time);
        self.notify_changed()?;
        Ok(reminder)
    }

    /// Enable or disable a reminder.
    pub fn set_enabled(&self, id: i64, enabled: bool) -> SouloResult<()> {
        let conn = self.database.conn()?;
        if !Reminder::set_enabled(&conn, id, enabled)? {
            return Err(SouloError::InvalidInput(format!("no reminder with id {id}")));
        }
        self.notify_changed()
    }

    /// Remove a reminder.
    pub fn remove(&self, id: i64) -> SouloResult<()> {
        let conn = self.database.conn()?;
        if !Reminder::delete(&conn, id)? {
            return Err(SouloError::InvalidInput(format!("no reminder with id {id}")));
        }
        info!("removed reminder {id}");
        self.notify_changed()
    }

    /// The enabled reminder that fires first after `now`, with its trigger
    /// time.
    pub fn next_due(&self, now: NaiveDateTime) -> SouloResult<Option<(Reminder, NaiveDateTime)>> {
        next_due_among(self.list()?, now)
    }

    fn notify_changed(&self) -> SouloResult<()> {
        let count = self.list()?.len();
        self.event_bus.emit(AppEvent::RemindersChanged { count });
        Ok(())
    }
}

/// Earliest next occurrence among enabled reminders.
pub fn next_due_among(
    reminders: Vec<Reminder>,
    now: NaiveDateTime,
) -> SouloResult<Option<(Reminder, NaiveDateTime)>> {
    let mut best: Option<(Reminder, NaiveDateTime)> = None;
    for reminder in reminders.into_iter().filter(|r| r.enabled) {
        let at = reminder.next_occurrence(now)?;
        if best.as_ref().map_or(true, |(_, current)| at < *current) {
            best = Some((reminder, at));
        }
    }
    Ok(best)
}

impl Service for ReminderService {
    fn name(&self) -> &str { "reminders" }
    fn state(&self) -> ServiceState { self.state.get() }
    fn init(&self) -> SouloResult<()> {
        let enabled = self.list()?.iter().filter(|r| r.enabled).count();
        self.state.set(ServiceState::Running);
        info!("reminder service initialized ({enabled} enabled)");
        Ok(())
    }
    fn shutdown(&self) -> SouloResult<()> {
        self.state.set(ServiceState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn create_service() -> ReminderService {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let config = soulo_core::config::DatabaseConfig::default();
        let db = Database::init(&path, &config).unwrap();
        std::mem::forget(dir);
        ReminderService::new(db, EventBus::new(16))
    }

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_seeded_reminder_is_disabled() {
        let svc = create_service();
        svc.init().unwrap();
        let all = svc.list().unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].enabled);
        assert!(svc.next_due(at(10, 12, 0)).unwrap().is_none());
    }

    #[test]
    fn test_next_due_picks_earliest_enabled() {
        let svc = create_service();
        svc.add("21:30", None, None).unwrap();
        let morning = svc.add("07:15", Some("Morning pages"), None).unwrap();

        let (next, when) = svc.next_due(at(10, 12, 0)).unwrap().unwrap();
        assert_eq!(next.time, "21:30");
        assert_eq!(when, at(10, 21, 30));

        let (next, when) = svc.next_due(at(10, 22, 0)).unwrap().unwrap();
        assert_eq!(next.title, "Morning pages");
        assert_eq!(when, at(11, 7, 15));

        svc.set_enabled(morning.id.unwrap(), false).unwrap();
        let (next, when) = svc.next_due(at(10, 22, 0)).unwrap().unwrap();
        assert_eq!(next.time, "21:30");
        assert_eq!(when, at(11, 21, 30));
    }

    #[test]
    fn test_add_validates_and_remove() {
        let svc = create_service();
        assert!(svc.add("25:00", None, None).is_err());
        let r = svc.add("8:05", None, None).unwrap();
        assert_eq!(r.time, "08:05");
        assert_eq!(r.title, "Journal Reminder");

        let mut rx = svc.event_bus.subscribe();
        svc.remove(r.id.unwrap()).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), AppEvent::RemindersChanged { count: 1 }));
        assert!(svc.remove(r.id.unwrap()).is_err());
    }
}
