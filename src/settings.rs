use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::{error::EngineError, models::SettingsRow, timeutil::parse_zone};

pub const DEFAULT_TIME_ZONE: &str = "America/New_York";

const WEEKDAY_NAMES: [(&str, usize); 7] = [
    ("Monday", 0),
    ("Tuesday", 1),
    ("Wednesday", 2),
    ("Thursday", 3),
    ("Friday", 4),
    ("Saturday", 5),
    ("Sunday", 6),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoursRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Weekly working-hours table, validated once at load instead of at every
/// slot computation. Closed days are simply empty.
#[derive(Debug, Clone, Default)]
pub struct WorkingHours {
    days: [Vec<HoursRange>; 7],
}

#[derive(Debug, Deserialize)]
struct RawRange {
    start: String,
    end: String,
}

impl WorkingHours {
    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        let parsed: BTreeMap<String, Vec<RawRange>> = serde_json::from_str(raw)
            .map_err(|err| EngineError::Config(format!("working hours: {err}")))?;

        let mut days: [Vec<HoursRange>; 7] = Default::default();
        for (day, ranges) in parsed {
            let index = weekday_index(&day)
                .ok_or_else(|| EngineError::Config(format!("working hours: unknown day {day}")))?;
            let mut parsed_ranges = Vec::with_capacity(ranges.len());
            for range in ranges {
                let start = parse_wall_time(&range.start)?;
                let end = parse_wall_time(&range.end)?;
                if start >= end {
                    return Err(EngineError::Config(format!(
                        "working hours: {day} interval {}-{} is empty or inverted",
                        range.start, range.end
                    )));
                }
                parsed_ranges.push(HoursRange { start, end });
            }
            parsed_ranges.sort_by_key(|range| range.start);
            for pair in parsed_ranges.windows(2) {
                if pair[1].start < pair[0].end {
                    return Err(EngineError::Config(format!(
                        "working hours: {day} intervals overlap"
                    )));
                }
            }
            days[index] = parsed_ranges;
        }
        Ok(Self { days })
    }

    pub fn for_weekday(&self, weekday: Weekday) -> &[HoursRange] {
        &self.days[weekday.num_days_from_monday() as usize]
    }
}

fn weekday_index(name: &str) -> Option<usize> {
    WEEKDAY_NAMES
        .iter()
        .find(|(day, _)| *day == name)
        .map(|(_, index)| *index)
}

fn parse_wall_time(raw: &str) -> Result<NaiveTime, EngineError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|_| EngineError::Config(format!("working hours: bad time {raw}")))
}

#[derive(Debug, Clone)]
pub struct BusinessSettings {
    pub time_zone: Tz,
    pub buffer_minutes: i64,
    pub late_grace_minutes: i64,
    pub reschedule_min_hours: i64,
    pub deposit_cents_default: i64,
    pub working_hours: WorkingHours,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub policy_text: Option<String>,
}

impl Default for BusinessSettings {
    fn default() -> Self {
        Self {
            time_zone: chrono_tz::America::New_York,
            buffer_minutes: 0,
            late_grace_minutes: 15,
            reschedule_min_hours: 72,
            deposit_cents_default: 2000,
            working_hours: WorkingHours::default(),
            address: None,
            phone: None,
            policy_text: None,
        }
    }
}

impl BusinessSettings {
    fn from_row(row: SettingsRow) -> Result<Self, EngineError> {
        Ok(Self {
            time_zone: parse_zone(&row.time_zone)?,
            buffer_minutes: row.buffer_minutes,
            late_grace_minutes: row.late_grace_minutes,
            reschedule_min_hours: row.reschedule_min_hours,
            deposit_cents_default: row.deposit_cents_default,
            working_hours: WorkingHours::from_json(&row.working_hours_json)?,
            address: row.address,
            phone: row.phone,
            policy_text: row.policy_text,
        })
    }
}

pub async fn load_settings(pool: &SqlitePool) -> Result<BusinessSettings, EngineError> {
    let row = sqlx::query_as::<_, SettingsRow>("SELECT * FROM business_settings LIMIT 1")
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => BusinessSettings::from_row(row),
        None => Ok(BusinessSettings::default()),
    }
}

/// Working-hours resolver: the open intervals for a calendar date in the
/// business time zone, empty when closed.
pub fn resolve_working_hours<'a>(
    date: NaiveDate,
    settings: &'a BusinessSettings,
) -> &'a [HoursRange] {
    settings.working_hours.for_weekday(date.weekday())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_table() {
        let hours = WorkingHours::from_json(
            r#"{"Monday":[{"start":"09:00","end":"12:00"},{"start":"13:00","end":"17:00"}]}"#,
        )
        .unwrap();
        let monday = hours.for_weekday(Weekday::Mon);
        assert_eq!(monday.len(), 2);
        assert_eq!(monday[0].start, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert!(hours.for_weekday(Weekday::Sun).is_empty());
    }

    #[test]
    fn rejects_unknown_day() {
        assert!(WorkingHours::from_json(r#"{"Funday":[]}"#).is_err());
    }

    #[test]
    fn rejects_inverted_interval() {
        let result =
            WorkingHours::from_json(r#"{"Monday":[{"start":"12:00","end":"09:00"}]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_overlapping_intervals() {
        let result = WorkingHours::from_json(
            r#"{"Monday":[{"start":"09:00","end":"12:00"},{"start":"11:00","end":"14:00"}]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn resolves_by_weekday_of_date() {
        let hours =
            WorkingHours::from_json(r#"{"Monday":[{"start":"09:00","end":"12:00"}]}"#).unwrap();
        let settings = BusinessSettings {
            working_hours: hours,
            ..BusinessSettings::default()
        };
        // 2099-01-05 is a Monday, 2099-01-06 a Tuesday.
        let monday = NaiveDate::from_ymd_opt(2099, 1, 5).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2099, 1, 6).unwrap();
        assert_eq!(resolve_working_hours(monday, &settings).len(), 1);
        assert!(resolve_working_hours(tuesday, &settings).is_empty());
    }
}
