use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::duration::{days_tracked, format_time_left, parse_timestamp, MS_PER_MINUTE};
use crate::model::{DoseDecreaseTracker, DoseUnit};

/// Doses closer together than this are one dosing occasion.
pub const DOSE_GROUP_WINDOW_MS: i64 = 10 * MS_PER_MINUTE;

/// Pacing predictions need this many calendar days of history.
pub const MIN_TRACKED_DAYS_FOR_PREDICTION: i64 = 3;

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct DoseAmount {
    pub value: f64,
    pub unit: DoseUnit,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DoseCountdown {
    pub text: String,
    pub is_overdue: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NextDosePrediction {
    pub predicted_at: DateTime<Utc>,
    pub countdown: DoseCountdown,
}

pub fn convert_amount(value: f64, from: DoseUnit, to: DoseUnit) -> f64 {
    match (from, to) {
        (DoseUnit::Mg, DoseUnit::G) => value / 1000.0,
        (DoseUnit::G, DoseUnit::Mg) => value * 1000.0,
        _ => value,
    }
}

/// Log entries with a parsable timestamp and a positive finite amount,
/// converted to the tracker's unit.
fn usable_doses(item: &DoseDecreaseTracker) -> impl Iterator<Item = (DateTime<Utc>, f64)> + '_ {
    let unit = item.current_usage_unit;
    item.dose_logs.iter().filter_map(move |entry| {
        if !entry.value.is_finite() || entry.value <= 0.0 {
            return None;
        }
        let at = parse_timestamp(&entry.at)?;
        Some((at, convert_amount(entry.value, entry.unit, unit)))
    })
}

/// Sum of the doses logged on `now`'s local calendar day.
pub fn todays_dose_total<Tz: TimeZone>(item: &DoseDecreaseTracker, now: &DateTime<Tz>) -> DoseAmount {
    let tz = now.timezone();
    let today = now.date_naive();
    let value: f64 = usable_doses(item)
        .filter(|(at, _)| at.with_timezone(&tz).date_naive() == today)
        .map(|(_, value)| value)
        .sum();
    DoseAmount {
        value,
        unit: item.current_usage_unit,
    }
}

/// Per-day totals from the first logged day through today, zero-filled.
pub fn daily_dose_totals<Tz: TimeZone>(item: &DoseDecreaseTracker, now: &DateTime<Tz>) -> Vec<DailyTotal> {
    let tz = now.timezone();
    let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (at, value) in usable_doses(item) {
        *totals.entry(at.with_timezone(&tz).date_naive()).or_default() += value;
    }

    let (Some(first), Some(last)) = (
        totals.keys().next().copied(),
        totals.keys().next_back().copied(),
    ) else {
        return Vec::new();
    };
    let end = last.max(now.date_naive());

    first
        .iter_days()
        .take_while(|day| *day <= end)
        .map(|date| DailyTotal {
            date,
            value: totals.get(&date).copied().unwrap_or(0.0),
        })
        .collect()
}

/// Seven-day window ending `week_index` weeks before the newest day. Empty
/// past `max_week_index`.
pub fn week_page(totals: &[DailyTotal], week_index: usize) -> &[DailyTotal] {
    if totals.is_empty() || week_index > max_week_index(totals.len()) {
        return &[];
    }
    let end = totals.len() - 1 - week_index * 7;
    let start = end.saturating_sub(6);
    &totals[start..=end]
}

pub fn max_week_index(total_days: usize) -> usize {
    total_days.saturating_sub(1) / 7
}

pub fn page_average(page: &[DailyTotal]) -> f64 {
    if page.is_empty() {
        return 0.0;
    }
    page.iter().map(|day| day.value).sum::<f64>() / page.len() as f64
}

/// Start times of dosing occasions, ascending. Entries less than
/// `DOSE_GROUP_WINDOW_MS` after the previous entry join its occasion.
pub fn grouped_dose_times(item: &DoseDecreaseTracker) -> Vec<DateTime<Utc>> {
    let mut times: Vec<DateTime<Utc>> = usable_doses(item).map(|(at, _)| at).collect();
    times.sort();

    let mut groups = Vec::new();
    let mut previous: Option<DateTime<Utc>> = None;
    for at in times {
        let joins = previous.map_or(false, |prev| {
            at.signed_duration_since(prev).num_milliseconds() < DOSE_GROUP_WINDOW_MS
        });
        if !joins {
            groups.push(at);
        }
        previous = Some(at);
    }
    groups
}

/// Mean gap between consecutive dosing occasions.
pub fn average_pause_ms(item: &DoseDecreaseTracker) -> Option<i64> {
    let groups = grouped_dose_times(item);
    if groups.len() < 2 {
        return None;
    }
    let first = groups[0];
    let last = groups[groups.len() - 1];
    let span = last.signed_duration_since(first).num_milliseconds();
    Some(span / (groups.len() as i64 - 1))
}

pub fn last_dose_grouped(item: &DoseDecreaseTracker) -> Option<DateTime<Utc>> {
    grouped_dose_times(item).last().copied()
}

pub fn format_duration_with_overdue(predicted_at: DateTime<Utc>, now: DateTime<Utc>) -> DoseCountdown {
    let delta = now.signed_duration_since(predicted_at).num_milliseconds();
    if delta > 0 {
        DoseCountdown {
            text: format!("overdue by {}", format_time_left(delta)),
            is_overdue: true,
        }
    } else {
        DoseCountdown {
            text: format!("in {}", format_time_left(-delta)),
            is_overdue: false,
        }
    }
}

/// Predicted next dose: the last occasion plus the average pause. Offered
/// once the tracker has `MIN_TRACKED_DAYS_FOR_PREDICTION` days of history.
pub fn next_dose_prediction<Tz: TimeZone>(
    item: &DoseDecreaseTracker,
    now: &DateTime<Tz>,
) -> Option<NextDosePrediction> {
    let tracked = days_tracked(&item.base.started_at, now)?;
    if tracked < MIN_TRACKED_DAYS_FOR_PREDICTION {
        return None;
    }
    let pause = average_pause_ms(item)?;
    let last = last_dose_grouped(item)?;
    let predicted_at = last + Duration::milliseconds(pause);
    Some(NextDosePrediction {
        predicted_at,
        countdown: format_duration_with_overdue(predicted_at, now.with_timezone(&Utc)),
    })
}
