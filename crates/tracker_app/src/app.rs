use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use tracing::{debug, info};
use tracker_core::{
    dose::{next_dose_prediction, todays_dose_total},
    duration::{
        elapsed_breakdown, elapsed_ms, format_elapsed_duration_label, format_time_left,
        parse_timestamp,
    },
    notifications::{MemoryNotificationService, ScheduleOutcome},
    progress::cold_turkey_progress,
    streak::{record_status, reset_stats, streak_targets, RecordStatus},
    TrackedItem, TrackerStore,
};

const DEFAULT_STORE_FILE: &str = "tracked_items.json";
const DEFAULT_LABEL_UNITS: usize = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub(crate) store_path: PathBuf,
    pub(crate) label_units: usize,
    pub(crate) notifications: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_lookup(|key| std::env::var(key).ok()))
    }

    /// Build a config from `lookup`, keeping the default for any value that
    /// is missing or does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(path) = lookup("TRACKER_STORE_PATH") {
            let path = path.trim();
            if !path.is_empty() {
                config.store_path = PathBuf::from(path);
            }
        }
        if let Some(units) = lookup("TRACKER_LABEL_UNITS") {
            if let Ok(value) = units.trim().parse::<usize>() {
                if value > 0 {
                    config.label_units = value;
                }
            }
        }
        if let Some(flag) = lookup("TRACKER_NOTIFICATIONS") {
            match flag.trim().to_ascii_lowercase().as_str() {
                "on" | "true" | "1" | "yes" => config.notifications = true,
                "off" | "false" | "0" | "no" => config.notifications = false,
                other => debug!(value = other, "ignoring unrecognised TRACKER_NOTIFICATIONS"),
            }
        }
        config
    }

    pub fn store_path(&self) -> &PathBuf {
        &self.store_path
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(DEFAULT_STORE_FILE),
            label_units: DEFAULT_LABEL_UNITS,
            notifications: true,
        }
    }
}

pub fn run(config: AppConfig) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_with_output(&config, &Local::now(), &mut out)?;
    Ok(())
}

/// What a report run saw. The milestone notifications are scheduled into an
/// in-process service that is dropped with the run, so they are a preview of
/// what a platform service would hold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub trackers: usize,
    pub previewed_notifications: usize,
}

/// Open the store, preview the milestone notifications it implies and write
/// one summary line per tracker to `out`.
pub fn run_with_output<Tz: TimeZone>(
    config: &AppConfig,
    now: &DateTime<Tz>,
    out: &mut impl Write,
) -> Result<ReportSummary> {
    let utc_now = now.with_timezone(&Utc);
    let service = Arc::new(MemoryNotificationService::new(config.notifications));
    let store = TrackerStore::builder()
        .storage_path(&config.store_path)
        .with_notification_service(Box::new(Arc::clone(&service)))
        .with_clock(move || utc_now)
        .build()
        .with_context(|| format!("failed to open store at {}", config.store_path.display()))?;

    let not_permitted = store
        .resync_notifications()
        .iter()
        .filter(|(_, outcome)| *outcome == ScheduleOutcome::NotPermitted)
        .count();
    let items = store.items();
    let summary = ReportSummary {
        trackers: items.len(),
        previewed_notifications: service.pending().len(),
    };
    info!(
        trackers = summary.trackers,
        previewed = summary.previewed_notifications,
        not_permitted,
        "dry run: milestone notifications previewed in memory, nothing delivered"
    );

    for item in &items {
        writeln!(out, "{}", summarize_item(item, now, config.label_units))?;
    }
    Ok(summary)
}

/// One line describing where a tracker stands at `now`.
pub fn summarize_item<Tz: TimeZone>(item: &TrackedItem, now: &DateTime<Tz>, label_units: usize) -> String {
    let utc_now = now.with_timezone(&Utc);
    let kind = match item {
        TrackedItem::ColdTurkey(_) => "cold turkey",
        TrackedItem::DoseDecrease(_) => "dose",
    };
    let mut parts = vec![format!("{} [{kind}]", item.name())];

    match elapsed_breakdown(item.started_at(), now) {
        Some(entries) => parts.push(
            entries
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        None => parts.push("start unavailable".to_string()),
    }

    if let Some(progress) = cold_turkey_progress(item.started_at(), utc_now) {
        match (progress.next, progress.time_left_ms()) {
            (Some(next), Some(left)) => parts.push(format!(
                "next {} in {} ({:.0}%)",
                next.label,
                format_time_left(left),
                progress.fraction() * 100.0
            )),
            _ => parts.push("all milestones reached".to_string()),
        }
    }

    let targets = streak_targets(item.reset_history());
    if let Some(start) = parse_timestamp(item.started_at()) {
        let open = elapsed_ms(start, utc_now);
        match record_status(open, &targets) {
            RecordStatus::NoRecord => {}
            RecordStatus::NewRecord => parts.push("new record".to_string()),
            RecordStatus::BelowRecord { record_ms } => parts.push(format!(
                "record {}",
                format_elapsed_duration_label(record_ms, label_units)
            )),
        }
    }
    let stats = reset_stats(item.started_at(), item.reset_history(), utc_now);
    if stats.reset_count > 0 {
        parts.push(format!("resets: {}", stats.reset_count));
    }

    if let Some(dose) = item.as_dose() {
        let today = todays_dose_total(dose, now);
        parts.push(format!(
            "today {} / {} {}",
            trim_amount(today.value),
            trim_amount(dose.current_usage_value),
            today.unit
        ));
        if let Some(prediction) = next_dose_prediction(dose, now) {
            parts.push(format!("next dose {}", prediction.countdown.text));
        }
    }

    parts.join(" | ")
}

fn trim_amount(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    let text = format!("{rounded:.3}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset};
    use std::collections::HashMap;
    use tracker_core::milestones::MILESTONES;
    use tracker_core::model::DoseUnit;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2025, 7, 20, 12, 0, 0)
            .unwrap()
    }

    #[test]
    fn config_defaults() {
        let config = AppConfig::from_lookup(|_| None);
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.store_path(), &PathBuf::from("tracked_items.json"));
    }

    #[test]
    fn config_reads_values_and_ignores_garbage() {
        let config = AppConfig::from_lookup(lookup(&[
            ("TRACKER_STORE_PATH", " /tmp/items.json "),
            ("TRACKER_LABEL_UNITS", "3"),
            ("TRACKER_NOTIFICATIONS", "OFF"),
        ]));
        assert_eq!(config.store_path, PathBuf::from("/tmp/items.json"));
        assert_eq!(config.label_units, 3);
        assert!(!config.notifications);

        let config = AppConfig::from_lookup(lookup(&[
            ("TRACKER_LABEL_UNITS", "0"),
            ("TRACKER_NOTIFICATIONS", "maybe"),
        ]));
        assert_eq!(config.label_units, DEFAULT_LABEL_UNITS);
        assert!(config.notifications);
    }

    #[test]
    fn cold_turkey_summary() {
        let started = now().with_timezone(&Utc) - Duration::days(10);
        let item = TrackedItem::cold_turkey("a", "Smoking", started).unwrap();
        let line = summarize_item(&item, &now(), 2);
        assert!(line.starts_with("Smoking [cold turkey] | 10 days, 0 hours, 0 minutes"), "{line}");
        assert!(line.contains("next 2 weeks in 4d (71%)"), "{line}");
        assert!(!line.contains("record"));
    }

    #[test]
    fn summary_reports_record_below_current() {
        let mut item = TrackedItem::cold_turkey("a", "Sugar", now().with_timezone(&Utc) - Duration::days(5)).unwrap();
        item.reset(now().with_timezone(&Utc) - Duration::hours(2)).unwrap();
        let line = summarize_item(&item, &now(), 2);
        assert!(line.contains("record 4d 22h"), "{line}");
        assert!(line.contains("resets: 1"), "{line}");
    }

    #[test]
    fn dose_summary_includes_todays_total() {
        let started = now().with_timezone(&Utc) - Duration::days(1);
        let mut item =
            TrackedItem::dose_decrease("d", "Caffeine", started, 0.4, DoseUnit::G, None).unwrap();
        item.as_dose_mut()
            .unwrap()
            .log_dose(now().with_timezone(&Utc) - Duration::hours(1), 0.15, None)
            .unwrap();
        let line = summarize_item(&item, &now(), 2);
        assert!(line.contains("today 0.15 / 0.4 g"), "{line}");
        assert!(!line.contains("next dose"), "{line}");
    }

    #[test]
    fn report_writes_one_line_per_tracker() {
        let temp = tempfile::tempdir().unwrap();
        let config = AppConfig {
            store_path: temp.path().join("tracked_items.json"),
            ..AppConfig::default()
        };
        let mut out = Vec::new();
        let summary = run_with_output(&config, &now(), &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(summary, ReportSummary::default());

        let store = TrackerStore::builder()
            .storage_path(&config.store_path)
            .build()
            .unwrap();
        store
            .add_item(TrackedItem::cold_turkey("a", "Smoking", now().with_timezone(&Utc)).unwrap())
            .unwrap();
        store
            .add_item(TrackedItem::cold_turkey("b", "Vaping", now().with_timezone(&Utc)).unwrap())
            .unwrap();

        let summary = run_with_output(&config, &now(), &mut out).unwrap();
        assert_eq!(summary.trackers, 2);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().next().unwrap().starts_with("Smoking"));
    }

    #[test]
    fn notification_preview_follows_the_permission_switch() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("tracked_items.json");
        let store = TrackerStore::builder().storage_path(&path).build().unwrap();
        store
            .add_item(TrackedItem::cold_turkey("a", "Smoking", now().with_timezone(&Utc) - Duration::days(10)).unwrap())
            .unwrap();

        let granted = AppConfig {
            store_path: path.clone(),
            ..AppConfig::default()
        };
        let summary = run_with_output(&granted, &now(), &mut Vec::<u8>::new()).unwrap();
        assert_eq!(summary.trackers, 1);
        assert_eq!(summary.previewed_notifications, MILESTONES.len() - 3);

        let denied = AppConfig {
            notifications: false,
            ..granted
        };
        let summary = run_with_output(&denied, &now(), &mut Vec::<u8>::new()).unwrap();
        assert_eq!(summary.previewed_notifications, 0);
    }
}
