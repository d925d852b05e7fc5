use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::EngineError;

/// Canonical form for every persisted instant: RFC 3339 UTC with whole
/// seconds and a `Z` suffix, e.g. `2025-01-06T14:00:00Z`. Rows written this
/// way compare correctly both as strings and through SQLite `datetime()`.
pub fn fmt_utc(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_utc(raw: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| EngineError::Invalid(format!("Invalid timestamp: {raw}")))
}

pub fn parse_zone(name: &str) -> Result<Tz, EngineError> {
    name.parse::<Tz>()
        .map_err(|_| EngineError::Config(format!("unknown time zone {name}")))
}

pub fn parse_local_date(raw: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| EngineError::Invalid(format!("Invalid date: {raw}")))
}

/// Parses a zone-less local timestamp as sent by clients, with or without
/// seconds (`2025-01-06T09:00` or `2025-01-06T09:00:00`).
pub fn parse_local_start(raw: &str) -> Result<NaiveDateTime, EngineError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .map_err(|_| EngineError::Invalid(format!("Invalid start time: {raw}")))
}

/// Maps a local wall-clock time into the absolute timeline. Returns `None`
/// for wall-clock times a DST jump skips over; ambiguous times resolve to
/// the earlier instant.
pub fn local_to_utc(local: NaiveDateTime, zone: Tz) -> Option<DateTime<Utc>> {
    zone.from_local_datetime(&local)
        .earliest()
        .map(|zoned| zoned.with_timezone(&Utc))
}

pub fn slot_label(local: DateTime<Tz>) -> String {
    local.format("%-I:%M %p").to_string()
}

/// Human-facing label, e.g. `Mon, Jan 6 - 9:00 AM`.
pub fn format_local(instant: DateTime<Utc>, zone: Tz) -> String {
    instant
        .with_timezone(&zone)
        .format("%a, %b %-d - %-I:%M %p")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    #[test]
    fn fmt_utc_is_whole_second_zulu() {
        let instant = Utc.with_ymd_and_hms(2025, 1, 6, 14, 0, 0).unwrap();
        assert_eq!(fmt_utc(instant), "2025-01-06T14:00:00Z");
        assert_eq!(parse_utc("2025-01-06T14:00:00Z").unwrap(), instant);
    }

    #[test]
    fn local_start_accepts_both_precisions() {
        let with_secs = parse_local_start("2025-01-06T09:00:00").unwrap();
        let without = parse_local_start("2025-01-06T09:00").unwrap();
        assert_eq!(with_secs, without);
        assert!(parse_local_start("tomorrow at nine").is_err());
    }

    #[test]
    fn format_local_renders_business_zone() {
        let instant = Utc.with_ymd_and_hms(2025, 1, 6, 14, 0, 0).unwrap();
        assert_eq!(format_local(instant, New_York), "Mon, Jan 6 - 9:00 AM");
    }

    #[test]
    fn dst_gap_times_are_unrepresentable() {
        // 2:30 AM does not exist on the US spring-forward date.
        let gap = parse_local_start("2025-03-09T02:30").unwrap();
        assert!(local_to_utc(gap, New_York).is_none());
    }
}
