use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::duration::{elapsed_ms, parse_timestamp};
use crate::model::ResetEntry;

/// One resolved streak taken from the reset history.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StreakSpan {
    pub started_at: DateTime<Utc>,
    pub reset_at: DateTime<Utc>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct StreakTargets {
    pub last: Option<StreakSpan>,
    pub record: Option<StreakSpan>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ResetStats {
    pub reset_count: usize,
    pub total_tracked_ms: Option<i64>,
    pub average_between_resets_ms: Option<i64>,
    pub max_between_resets_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum RecordStatus {
    NoRecord,
    BelowRecord { record_ms: i64 },
    NewRecord,
}

/// Valid entries of a reset history, in insertion order.
pub fn valid_spans(history: &[ResetEntry]) -> impl Iterator<Item = StreakSpan> + '_ {
    history.iter().filter_map(|entry| {
        let (started_at, reset_at) = entry.interval()?;
        Some(StreakSpan {
            started_at,
            reset_at,
            duration_ms: elapsed_ms(started_at, reset_at),
        })
    })
}

/// The most recently reset streak and the longest one. Ties keep the entry
/// seen first.
pub fn streak_targets(history: &[ResetEntry]) -> StreakTargets {
    valid_spans(history).fold(StreakTargets::default(), |mut targets, span| {
        if targets.last.map_or(true, |last| span.reset_at > last.reset_at) {
            targets.last = Some(span);
        }
        if targets
            .record
            .map_or(true, |record| span.duration_ms > record.duration_ms)
        {
            targets.record = Some(span);
        }
        targets
    })
}

/// Aggregate statistics over the reset history plus the open streak.
///
/// Average and maximum cover resolved streaks only. The total adds the open
/// streak and is unavailable when `started_at` does not parse.
pub fn reset_stats(started_at: &str, history: &[ResetEntry], now: DateTime<Utc>) -> ResetStats {
    let durations: Vec<i64> = valid_spans(history).map(|span| span.duration_ms).collect();
    let resolved: i64 = durations.iter().sum();
    let reset_count = durations.len();

    ResetStats {
        reset_count,
        total_tracked_ms: parse_timestamp(started_at).map(|start| resolved + elapsed_ms(start, now)),
        average_between_resets_ms: (reset_count > 0).then(|| resolved / reset_count as i64),
        max_between_resets_ms: durations.iter().copied().max(),
    }
}

/// Compare the open streak with the record. Matching the record exactly is
/// not a new record.
pub fn record_status(elapsed_ms: i64, targets: &StreakTargets) -> RecordStatus {
    match targets.record {
        None => RecordStatus::NoRecord,
        Some(record) if elapsed_ms > record.duration_ms => RecordStatus::NewRecord,
        Some(record) => RecordStatus::BelowRecord {
            record_ms: record.duration_ms,
        },
    }
}

/// Valid resets grouped by the local date of `reset_at`, newest first within a day.
pub fn resets_by_day<Tz: TimeZone>(
    history: &[ResetEntry],
    tz: &Tz,
) -> BTreeMap<NaiveDate, Vec<StreakSpan>> {
    let mut grouped: BTreeMap<NaiveDate, Vec<StreakSpan>> = BTreeMap::new();
    for span in valid_spans(history) {
        let day = span.reset_at.with_timezone(tz).date_naive();
        grouped.entry(day).or_default().push(span);
    }
    for spans in grouped.values_mut() {
        spans.sort_by(|a, b| b.reset_at.cmp(&a.reset_at));
    }
    grouped
}
