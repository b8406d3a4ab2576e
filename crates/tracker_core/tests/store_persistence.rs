use std::fs;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::tempdir;
use tracker_core::{
    dose::todays_dose_total,
    milestones::MILESTONES,
    model::DoseUnit,
    notifications::{milestone_identifier, MemoryNotificationService},
    progress::cold_turkey_progress,
    streak::reset_stats,
    TrackedItem, TrackerStore,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 3, 18, 30, 0).unwrap()
}

fn open(path: &std::path::Path, service: &Arc<MemoryNotificationService>) -> TrackerStore {
    TrackerStore::builder()
        .storage_path(path)
        .with_notification_service(Box::new(Arc::clone(service)))
        .with_clock(now)
        .build()
        .expect("open store")
}

#[test]
fn trackers_survive_a_restart() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("state").join("tracked_items.json");
    let service = Arc::new(MemoryNotificationService::new(true));

    {
        let store = open(&path, &service);
        assert!(store.items().is_empty(), "missing file loads as empty");
        store
            .add_item(TrackedItem::cold_turkey("smoke", "Smoking", now() - Duration::days(10)).unwrap())
            .expect("add cold turkey");
        store
            .add_item(
                TrackedItem::dose_decrease("caf", "Caffeine", now() - Duration::days(5), 0.4, DoseUnit::G, Some(0.1))
                    .unwrap(),
            )
            .expect("add dose tracker");
        store.log_dose("caf", 0.2, None).expect("log dose");
        store.reorder_items(&["caf", "smoke"]).expect("reorder");
    }

    assert!(path.exists());
    assert!(!temp.path().join("state").join("tracked_items.json.tmp").exists());

    let reopened = open(&path, &service);
    let items = reopened.items();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id(), "caf");
    assert_eq!(items[0].as_dose().unwrap().dose_logs.len(), 1);

    let progress = cold_turkey_progress(items[1].started_at(), now()).unwrap();
    assert_eq!(progress.next.map(|m| m.label), Some("2 weeks"));
}

#[test]
fn legacy_records_load_with_defaults() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("tracked_items.json");
    fs::write(
        &path,
        r#"[
            {"type":"coldTurkey","id":"1","name":"Alcohol","startedAt":"2025-10-01T00:00:00.000Z"},
            {"type":"coldTurkey","id":"2","name":"Corrupt","startedAt":"last tuesday"}
        ]"#,
    )
    .expect("write fixture");

    let service = Arc::new(MemoryNotificationService::new(true));
    let store = open(&path, &service);
    let items = store.items();
    assert!(items.iter().all(|item| item.reset_history().is_empty()));

    let stats = reset_stats(items[1].started_at(), items[1].reset_history(), now());
    assert_eq!(stats.total_tracked_ms, None);
    assert!(cold_turkey_progress(items[1].started_at(), now()).is_none());

    let outcomes = store.resync_notifications();
    assert_eq!(outcomes.len(), 2);
    assert!(service
        .pending_identifiers()
        .iter()
        .all(|id| id.starts_with("milestone_1_")));
}

#[test]
fn corrupt_store_is_reported() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("tracked_items.json");
    fs::write(&path, "{ not json").expect("write fixture");
    let result = TrackerStore::builder().storage_path(&path).build();
    assert!(result.is_err());
}

#[test]
fn notifications_follow_the_tracker_lifecycle() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("tracked_items.json");
    let service = Arc::new(MemoryNotificationService::new(true));
    let store = open(&path, &service);

    store
        .add_item(TrackedItem::cold_turkey("a", "Vaping", now() - Duration::days(2)).unwrap())
        .unwrap();
    let day_one = milestone_identifier("a", MILESTONES[0].duration_ms);
    assert!(!service.pending_identifiers().contains(&day_one));

    store.rename("a", "Vape").unwrap();
    assert!(service.pending().iter().all(|request| request.body.contains("Vape")));

    store.reset("a").unwrap();
    assert!(service.pending_identifiers().contains(&day_one));
    assert_eq!(service.pending().len(), MILESTONES.len());

    let item = store.get("a").unwrap();
    let stats = reset_stats(item.started_at(), item.reset_history(), now());
    assert_eq!(stats.reset_count, 1);
    assert_eq!(stats.max_between_resets_ms, Some(2 * 86_400_000));

    store.remove_item("a").unwrap();
    assert!(service.pending().is_empty());
    assert!(store.get("a").is_none());
    assert!(store.remove_item("a").is_err());
}

#[test]
fn notification_failures_do_not_block_mutations() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("tracked_items.json");
    let service = Arc::new(MemoryNotificationService::new(true));
    let store = open(&path, &service);

    service.set_failing(true);
    store
        .add_item(TrackedItem::cold_turkey("a", "Sugar", now()).unwrap())
        .expect("mutation succeeds while notifications fail");
    store.reset("a").expect("reset succeeds");
    store.reset("a").expect_err("second reset at the same instant is refused");
    store.remove_item("a").expect("removal succeeds");
    service.set_failing(false);
    assert!(service.pending().is_empty());
}

#[test]
fn null_dose_amounts_do_not_block_the_load() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("tracked_items.json");
    fs::write(
        &path,
        r#"[
            {"type":"coldTurkey","id":"1","name":"Alcohol","startedAt":"2025-10-01T00:00:00.000Z"},
            {"type":"slowLoweringTheDosage","id":"2","name":"Caffeine",
             "startedAt":"2025-10-20T00:00:00.000Z","currentUsageValue":400,"currentUsageUnit":"mg",
             "doseLogs":[
                {"at":"2025-11-03T08:00:00.000Z","value":null,"unit":"mg"},
                {"at":"2025-11-03T09:00:00.000Z","value":120,"unit":"mg"}
             ]}
        ]"#,
    )
    .expect("write fixture");

    let service = Arc::new(MemoryNotificationService::new(true));
    let store = open(&path, &service);
    let items = store.items();
    assert_eq!(items.len(), 2);

    let dose = items[1].as_dose().unwrap();
    assert!(dose.dose_logs[0].value.is_nan());
    assert_eq!(todays_dose_total(dose, &now()).value, 120.0);

    store.log_dose("2", 30.0, None).expect("store stays writable");
    let reopened = open(&path, &service);
    assert_eq!(reopened.get("2").unwrap().as_dose().unwrap().dose_logs.len(), 3);
}

#[test]
fn failed_writes_leave_memory_unchanged() {
    let temp = tempdir().expect("tempdir");
    let state = temp.path().join("state");
    let path = state.join("tracked_items.json");
    let service = Arc::new(MemoryNotificationService::new(true));
    let store = open(&path, &service);
    store
        .add_item(TrackedItem::cold_turkey("a", "Smoking", now()).unwrap())
        .unwrap();
    store
        .add_item(TrackedItem::cold_turkey("b", "Vaping", now()).unwrap())
        .unwrap();
    let pending_before = service.pending_identifiers();

    fs::remove_dir_all(&state).unwrap();
    fs::write(&state, "not a directory").unwrap();

    let added = store.add_item(TrackedItem::cold_turkey("c", "Sugar", now()).unwrap());
    assert!(added.is_err());
    assert!(store.rename("a", "Cigarettes").is_err());
    assert!(store.remove_item("b").is_err());
    assert!(store.reorder_items(&["b", "a"]).is_err());

    let ids: Vec<String> = store.items().iter().map(|i| i.id().to_string()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(store.get("a").unwrap().name(), "Smoking");
    assert_eq!(service.pending_identifiers(), pending_before);

    fs::remove_file(&state).unwrap();
    store
        .add_item(TrackedItem::cold_turkey("c", "Sugar", now()).unwrap())
        .unwrap();
    let reopened = open(&path, &service);
    assert_eq!(reopened.items().len(), 3);
    assert_eq!(reopened.get("a").unwrap().name(), "Smoking");
}
