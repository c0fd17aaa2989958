//! RFC 3339 timestamp helpers shared by the models.
//!
//! Timestamps are written in one canonical form (UTC, millisecond precision,
//! `Z` suffix) so that string comparison in SQL matches chronological order.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Format a timestamp in the canonical stored form.
pub fn to_string(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The current time in the canonical stored form.
pub fn now_string() -> String {
    to_string(&Utc::now())
}

/// Parse a timestamp as produced by SQLite, PostgREST, or clients.
///
/// Accepts RFC 3339, naive `YYYY-MM-DD[T ]HH:MM:SS[.f]` (assumed UTC), and
/// bare dates (midnight UTC).
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    // Postgres text output: "2024-03-05 10:00:00.123+00"
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_canonical_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        assert_eq!(to_string(&ts), "2024-03-05T10:00:00.000Z");
    }

    #[test]
    fn test_parse_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        assert_eq!(parse("2024-03-05T10:00:00Z"), Some(expected));
        assert_eq!(parse("2024-03-05T12:00:00+02:00"), Some(expected));
        assert_eq!(parse("2024-03-05T10:00:00.000"), Some(expected));
        assert_eq!(parse("2024-03-05 10:00:00+00"), Some(expected));
        assert_eq!(
            parse("2024-03-05"),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap())
        );
        assert_eq!(parse("yesterday"), None);
        assert_eq!(parse(""), None);
    }
}
