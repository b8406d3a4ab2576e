use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, instrument};

use crate::error::TrackerError;
use crate::model::{DoseLogEntry, TrackedItem};
use crate::notifications::{MilestoneScheduler, NotificationService, ScheduleOutcome};

pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Owns the tracked items. Every mutation replaces a whole item by id,
/// persists the full collection and keeps milestone notifications in step.
pub struct TrackerStore {
    storage_path: Option<PathBuf>,
    items: RwLock<Vec<TrackedItem>>,
    scheduler: Option<MilestoneScheduler>,
    clock: Clock,
}

pub struct TrackerStoreBuilder {
    storage_path: Option<PathBuf>,
    notification_service: Option<Box<dyn NotificationService>>,
    clock: Option<Clock>,
}

impl TrackerStoreBuilder {
    pub fn new() -> Self {
        Self {
            storage_path: None,
            notification_service: None,
            clock: None,
        }
    }

    pub fn storage_path(mut self, path: impl AsRef<Path>) -> Self {
        self.storage_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_notification_service(mut self, service: Box<dyn NotificationService>) -> Self {
        self.notification_service = Some(service);
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    pub fn build(self) -> Result<TrackerStore> {
        let store = TrackerStore {
            storage_path: self.storage_path,
            items: RwLock::new(Vec::new()),
            scheduler: self.notification_service.map(MilestoneScheduler::new),
            clock: self.clock.unwrap_or_else(|| Box::new(Utc::now) as Clock),
        };
        store.reload()?;
        Ok(store)
    }
}

impl Default for TrackerStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerStore {
    pub fn builder() -> TrackerStoreBuilder {
        TrackerStoreBuilder::new()
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    pub fn items(&self) -> Vec<TrackedItem> {
        self.items.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<TrackedItem> {
        self.items.read().iter().find(|item| item.id() == id).cloned()
    }

    /// Replace the in-memory collection with the persisted snapshot. A missing
    /// file is an empty collection.
    pub fn reload(&self) -> Result<()> {
        let loaded = match &self.storage_path {
            Some(path) => load_items(path)?,
            None => Vec::new(),
        };
        info!(count = loaded.len(), "loaded tracked items");
        *self.items.write() = loaded;
        Ok(())
    }

    #[instrument(skip(self, item), fields(tracker_id = %item.id()))]
    pub fn add_item(&self, item: TrackedItem) -> Result<()> {
        {
            let mut items = self.items.write();
            if items.iter().any(|existing| existing.id() == item.id()) {
                return Err(TrackerError::DuplicateTracker(item.id().to_string()).into());
            }
            let mut next = items.clone();
            next.push(item.clone());
            self.commit(&mut items, next)?;
        }
        info!("added tracker");
        self.schedule_for(&item);
        Ok(())
    }

    /// Replace the item with the same id. Notifications are rebuilt when the
    /// start or the name changed.
    #[instrument(skip(self, item), fields(tracker_id = %item.id()))]
    pub fn update_item(&self, item: TrackedItem) -> Result<()> {
        let reschedule = {
            let mut items = self.items.write();
            let mut next = items.clone();
            let slot = next
                .iter_mut()
                .find(|existing| existing.id() == item.id())
                .ok_or_else(|| TrackerError::TrackerNotFound(item.id().to_string()))?;
            let reschedule = slot.started_at() != item.started_at() || slot.name() != item.name();
            *slot = item.clone();
            self.commit(&mut items, next)?;
            reschedule
        };
        info!(reschedule, "updated tracker");
        if reschedule {
            self.schedule_for(&item);
        }
        Ok(())
    }

    /// Apply `change` to a copy of the item and store the result.
    pub fn modify<T>(
        &self,
        id: &str,
        change: impl FnOnce(&mut TrackedItem) -> Result<T, TrackerError>,
    ) -> Result<T> {
        let mut item = self
            .get(id)
            .ok_or_else(|| TrackerError::TrackerNotFound(id.to_string()))?;
        let output = change(&mut item)?;
        self.update_item(item)?;
        Ok(output)
    }

    pub fn rename(&self, id: &str, name: &str) -> Result<()> {
        self.modify(id, |item| item.rename(name))
    }

    /// End the current streak now and restart the anchor.
    pub fn reset(&self, id: &str) -> Result<()> {
        let now = self.now();
        self.modify(id, |item| item.reset(now))
    }

    pub fn log_dose(&self, id: &str, value: f64, note: Option<String>) -> Result<DoseLogEntry> {
        let now = self.now();
        self.modify(id, |item| {
            item.as_dose_mut()?.log_dose(now, value, note).cloned()
        })
    }

    pub fn edit_dose(&self, id: &str, at: &str, value: f64) -> Result<()> {
        self.modify(id, |item| item.as_dose_mut()?.edit_dose(at, value))
    }

    pub fn delete_dose(&self, id: &str, at: &str) -> Result<DoseLogEntry> {
        self.modify(id, |item| item.as_dose_mut()?.delete_dose(at))
    }

    #[instrument(skip(self))]
    pub fn remove_item(&self, id: &str) -> Result<TrackedItem> {
        let removed = {
            let mut items = self.items.write();
            let index = items
                .iter()
                .position(|item| item.id() == id)
                .ok_or_else(|| TrackerError::TrackerNotFound(id.to_string()))?;
            let mut next = items.clone();
            let removed = next.remove(index);
            self.commit(&mut items, next)?;
            removed
        };
        info!("removed tracker");
        if let Some(scheduler) = &self.scheduler {
            scheduler.cancel(id);
        }
        Ok(removed)
    }

    /// Reorder by id. Listed ids come first in the given order; unlisted
    /// items keep their relative order after them; unknown ids are ignored.
    #[instrument(skip(self))]
    pub fn reorder_items(&self, ids: &[&str]) -> Result<()> {
        let mut items = self.items.write();
        let mut remaining = items.clone();
        let mut ordered = Vec::with_capacity(remaining.len());
        for id in ids {
            if let Some(index) = remaining.iter().position(|item| item.id() == *id) {
                ordered.push(remaining.remove(index));
            }
        }
        ordered.append(&mut remaining);
        self.commit(&mut items, ordered)
    }

    /// Rebuild notifications for every tracker, e.g. after an app restart.
    pub fn resync_notifications(&self) -> Vec<(String, ScheduleOutcome)> {
        self.items()
            .iter()
            .filter_map(|item| Some((item.id().to_string(), self.schedule_for(item)?)))
            .collect()
    }

    fn schedule_for(&self, item: &TrackedItem) -> Option<ScheduleOutcome> {
        let scheduler = self.scheduler.as_ref()?;
        Some(scheduler.schedule(item.id(), item.name(), item.started_at(), self.now()))
    }

    /// Persist `next` and only then make it the in-memory collection, so a
    /// failed write leaves both untouched.
    fn commit(&self, items: &mut Vec<TrackedItem>, next: Vec<TrackedItem>) -> Result<()> {
        self.persist(&next)?;
        *items = next;
        Ok(())
    }

    fn persist(&self, items: &[TrackedItem]) -> Result<()> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };
        write_atomically(path, &serde_json::to_vec_pretty(items)?)
            .with_context(|| format!("failed to persist tracked items to {}", path.display()))
    }
}

fn load_items(path: &Path) -> Result<Vec<TrackedItem>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Write to a sibling file, then rename over the target so readers see the
/// old snapshot or the new one.
fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    let mut file = File::create(&staging)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&staging, path)?;
    Ok(())
}
