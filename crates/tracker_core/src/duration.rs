use std::fmt;

use chrono::{
    DateTime, Datelike, Months, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};

pub const MS_PER_SECOND: i64 = 1_000;
pub const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Parse a persisted timestamp. Accepts RFC 3339 (what the store writes) and
/// bare `YYYY-MM-DD` dates, which are read as UTC midnight.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Canonical persisted form: RFC 3339 in UTC with millisecond precision.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Milliseconds from `from` to `to`, clamped at zero.
pub fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    to.signed_duration_since(from).num_milliseconds().max(0)
}

/// Calendar units in ascending magnitude, so `Ord` compares unit size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeUnit {
    Minutes,
    Hours,
    Days,
    Months,
    Years,
}

impl TimeUnit {
    pub fn label(self, value: i64) -> &'static str {
        let singular = value == 1;
        match (self, singular) {
            (TimeUnit::Minutes, true) => "minute",
            (TimeUnit::Minutes, false) => "minutes",
            (TimeUnit::Hours, true) => "hour",
            (TimeUnit::Hours, false) => "hours",
            (TimeUnit::Days, true) => "day",
            (TimeUnit::Days, false) => "days",
            (TimeUnit::Months, true) => "month",
            (TimeUnit::Months, false) => "months",
            (TimeUnit::Years, true) => "year",
            (TimeUnit::Years, false) => "years",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreakdownEntry {
    pub value: i64,
    pub unit: TimeUnit,
}

impl BreakdownEntry {
    fn new(value: i64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }
}

impl fmt::Display for BreakdownEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.label(self.value))
    }
}

/// Split `now - started_at` into three calendar-aware units, coarsest first.
///
/// The span is measured on the wall clock of `now`'s time zone: whole months
/// are counted by stepping the start forward month by month (clamping to the
/// last day of short months), and the leftover is split into days, hours and
/// minutes. The leading unit is years, months or days depending on how long
/// the span is. A `now` earlier than `started_at` counts as zero.
pub fn breakdown<Tz: TimeZone>(started_at: DateTime<Utc>, now: &DateTime<Tz>) -> Vec<BreakdownEntry> {
    let start = started_at.with_timezone(&now.timezone()).naive_local();
    let end = now.naive_local();
    if end <= start {
        return vec![
            BreakdownEntry::new(0, TimeUnit::Days),
            BreakdownEntry::new(0, TimeUnit::Hours),
            BreakdownEntry::new(0, TimeUnit::Minutes),
        ];
    }

    let (months, cursor) = whole_months_between(start, end);
    let remainder = end - cursor;
    let days = remainder.num_days();
    let hours = remainder.num_hours() % 24;
    let minutes = remainder.num_minutes() % 60;
    let years = i64::from(months / 12);
    let months = i64::from(months % 12);

    if years > 0 {
        vec![
            BreakdownEntry::new(years, TimeUnit::Years),
            BreakdownEntry::new(months, TimeUnit::Months),
            BreakdownEntry::new(days, TimeUnit::Days),
        ]
    } else if months > 0 {
        vec![
            BreakdownEntry::new(months, TimeUnit::Months),
            BreakdownEntry::new(days, TimeUnit::Days),
            BreakdownEntry::new(hours, TimeUnit::Hours),
        ]
    } else {
        vec![
            BreakdownEntry::new(days, TimeUnit::Days),
            BreakdownEntry::new(hours, TimeUnit::Hours),
            BreakdownEntry::new(minutes, TimeUnit::Minutes),
        ]
    }
}

/// Breakdown of a persisted start timestamp; `None` when it does not parse.
pub fn elapsed_breakdown<Tz: TimeZone>(
    started_at: &str,
    now: &DateTime<Tz>,
) -> Option<Vec<BreakdownEntry>> {
    parse_timestamp(started_at).map(|start| breakdown(start, now))
}

fn whole_months_between(start: NaiveDateTime, end: NaiveDateTime) -> (u32, NaiveDateTime) {
    let estimate = (end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32;
    let mut months = estimate.max(0) as u32;
    while months > 0 {
        match start.checked_add_months(Months::new(months)) {
            Some(cursor) if cursor <= end => return (months, cursor),
            _ => months -= 1,
        }
    }
    (0, start)
}

/// Compact label over fixed-length units (`d`, `h`, `m`), e.g. `"3d 4h"`.
///
/// Starts at the first non-zero unit, keeps at most `max_units` entries and
/// drops trailing zeros. A zero span renders as `"0m"`.
pub fn format_elapsed_duration_label(duration_ms: i64, max_units: usize) -> String {
    let duration_ms = duration_ms.max(0);
    let parts = [
        (duration_ms / MS_PER_DAY, "d"),
        ((duration_ms % MS_PER_DAY) / MS_PER_HOUR, "h"),
        ((duration_ms % MS_PER_HOUR) / MS_PER_MINUTE, "m"),
    ];

    let Some(first) = parts.iter().position(|(value, _)| *value > 0) else {
        return "0m".to_string();
    };
    let mut selected: Vec<&(i64, &str)> = parts[first..].iter().take(max_units.max(1)).collect();
    while selected.len() > 1 && selected.last().map_or(false, |(value, _)| *value == 0) {
        selected.pop();
    }
    selected
        .iter()
        .map(|(value, suffix)| format!("{value}{suffix}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Coarse remaining-time label such as `"2d 5h"`, `"3h 10m"` or `"<1m"`.
pub fn format_time_left(duration_ms: i64) -> String {
    let duration_ms = duration_ms.max(0);
    let days = duration_ms / MS_PER_DAY;
    let hours = (duration_ms % MS_PER_DAY) / MS_PER_HOUR;
    let minutes = (duration_ms % MS_PER_HOUR) / MS_PER_MINUTE;

    if days > 0 {
        if hours > 0 {
            format!("{days}d {hours}h")
        } else {
            format!("{days}d")
        }
    } else if hours > 0 {
        if minutes > 0 {
            format!("{hours}h {minutes}m")
        } else {
            format!("{hours}h")
        }
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        "<1m".to_string()
    }
}

/// Whole local calendar days between the start date and `now`'s date.
pub fn days_tracked<Tz: TimeZone>(started_at: &str, now: &DateTime<Tz>) -> Option<i64> {
    let start = parse_timestamp(started_at)?.with_timezone(&now.timezone());
    let days = now
        .date_naive()
        .signed_duration_since(start.date_naive())
        .num_days();
    Some(days.max(0))
}
