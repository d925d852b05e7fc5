use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::{
    settings::HoursRange,
    timeutil::{fmt_utc, local_to_utc, slot_label},
};

/// Cursor step when walking an open interval.
pub const SLOT_STEP_MINUTES: i64 = 15;

/// An absolute span the chair is not free for, before buffering.
#[derive(Debug, Clone, Copy)]
pub struct BusyWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Slot {
    pub start_time_utc: String,
    pub start_time_local: String,
    pub label: String,
}

/// Enumerates bookable start times for one calendar date.
///
/// Walks each open interval in 15-minute steps; a candidate survives when it
/// fits inside the interval, its buffered window is disjoint from every
/// buffered busy window (half-open intersection), and its local start is not
/// before local now. Output order is cursor order, so it is deterministic and
/// chronological. Wall-clock times skipped by a DST jump are dropped.
pub fn generate_slots(
    date: NaiveDate,
    zone: Tz,
    hours: &[HoursRange],
    duration_minutes: i64,
    buffer_minutes: i64,
    busy: &[BusyWindow],
    now: DateTime<Utc>,
) -> Vec<Slot> {
    let duration = Duration::minutes(duration_minutes);
    let buffer = Duration::minutes(buffer_minutes);
    let step = Duration::minutes(SLOT_STEP_MINUTES);
    let now_local = now.with_timezone(&zone).naive_local();

    let mut slots = Vec::new();
    for range in hours {
        let range_end = date.and_time(range.end);
        let mut cursor = date.and_time(range.start);

        while cursor + duration <= range_end {
            let local_start = cursor;
            cursor += step;

            if local_start < now_local {
                continue;
            }
            let Some(start_utc) = local_to_utc(local_start, zone) else {
                continue;
            };
            let Some(end_utc) = local_to_utc(local_start + duration + buffer, zone) else {
                continue;
            };

            let overlaps = busy
                .iter()
                .any(|window| start_utc < window.end + buffer && end_utc > window.start);
            if overlaps {
                continue;
            }

            let local = start_utc.with_timezone(&zone);
            slots.push(Slot {
                start_time_utc: fmt_utc(start_utc),
                start_time_local: local.to_rfc3339(),
                label: slot_label(local),
            });
        }
    }
    slots
}
