use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::duration::parse_timestamp;
use crate::milestones::{self, MILESTONES};

pub const MILESTONE_TITLE: &str = "Milestone Achieved! 🎉";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("notification service failed: {0}")]
pub struct NotificationError(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledNotification {
    pub identifier: String,
    pub trigger_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRequest {
    pub identifier: String,
    pub title: String,
    pub body: String,
    pub trigger_at: DateTime<Utc>,
    pub tracker_id: String,
    pub kind: String,
}

/// Platform notification adapters implement this trait.
pub trait NotificationService: Send + Sync {
    fn list_scheduled(&self) -> Result<Vec<ScheduledNotification>, NotificationError>;
    fn schedule_at(&self, request: NotificationRequest) -> Result<(), NotificationError>;
    fn cancel(&self, identifier: &str) -> Result<(), NotificationError>;
    /// Check permission, asking the user if it has not been decided yet.
    fn ensure_permission(&self) -> Result<bool, NotificationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled { count: usize },
    NotPermitted,
    InvalidStart,
    Failed,
}

pub fn milestone_identifier(tracker_id: &str, duration_ms: i64) -> String {
    format!("milestone_{tracker_id}_{duration_ms}")
}

/// Whether `identifier` is a milestone notification of `tracker_id`. The part
/// after the tracker prefix must be a bare duration, so tracker `1` never
/// claims tracker `1_2`'s notifications.
pub fn is_milestone_identifier_for(identifier: &str, tracker_id: &str) -> bool {
    identifier
        .strip_prefix("milestone_")
        .and_then(|rest| rest.strip_prefix(tracker_id))
        .and_then(|rest| rest.strip_prefix('_'))
        .map_or(false, |digits| {
            !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
        })
}

fn milestone_body(tracker_name: &str, index: usize) -> String {
    let milestone = &MILESTONES[index];
    let mut body = format!(
        "You've achieved the {} milestone for {}!",
        milestone.label, tracker_name
    );
    match milestones::following(index) {
        Some(next) => body.push_str(&format!(" Next up: {}. Keep going!", next.label)),
        None => body.push_str(" You've reached the final milestone!"),
    }
    body
}

/// Keeps one pending notification per upcoming milestone of a tracker.
pub struct MilestoneScheduler {
    service: Box<dyn NotificationService>,
}

impl MilestoneScheduler {
    pub fn new(service: Box<dyn NotificationService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &dyn NotificationService {
        self.service.as_ref()
    }

    /// Remove every pending milestone notification of `tracker_id`. Failures
    /// are logged and end the sweep; returns how many were cancelled.
    pub fn cancel(&self, tracker_id: &str) -> usize {
        let scheduled = match self.service.list_scheduled() {
            Ok(scheduled) => scheduled,
            Err(err) => {
                warn!(tracker_id, %err, "unable to list scheduled notifications");
                return 0;
            }
        };

        let mut cancelled = 0;
        for notification in scheduled
            .iter()
            .filter(|n| is_milestone_identifier_for(&n.identifier, tracker_id))
        {
            if let Err(err) = self.service.cancel(&notification.identifier) {
                warn!(tracker_id, identifier = %notification.identifier, %err, "unable to cancel notification");
                return cancelled;
            }
            cancelled += 1;
        }
        debug!(tracker_id, cancelled, "cleared milestone notifications");
        cancelled
    }

    /// Replace the tracker's pending notifications with one per milestone
    /// still ahead of `now`.
    pub fn schedule(
        &self,
        tracker_id: &str,
        tracker_name: &str,
        started_at: &str,
        now: DateTime<Utc>,
    ) -> ScheduleOutcome {
        self.cancel(tracker_id);

        match self.service.ensure_permission() {
            Ok(true) => {}
            Ok(false) => {
                debug!(tracker_id, "notification permission not granted");
                return ScheduleOutcome::NotPermitted;
            }
            Err(err) => {
                warn!(tracker_id, %err, "unable to query notification permission");
                return ScheduleOutcome::Failed;
            }
        }

        let Some(start) = parse_timestamp(started_at) else {
            warn!(tracker_id, started_at, "skipping notifications for unparsable start");
            return ScheduleOutcome::InvalidStart;
        };

        let mut count = 0;
        for (index, milestone) in MILESTONES.iter().enumerate() {
            let trigger_at = start + Duration::milliseconds(milestone.duration_ms);
            if trigger_at <= now {
                continue;
            }
            let request = NotificationRequest {
                identifier: milestone_identifier(tracker_id, milestone.duration_ms),
                title: MILESTONE_TITLE.to_string(),
                body: milestone_body(tracker_name, index),
                trigger_at,
                tracker_id: tracker_id.to_string(),
                kind: "milestone".to_string(),
            };
            if let Err(err) = self.service.schedule_at(request) {
                warn!(tracker_id, milestone = milestone.label, %err, "unable to schedule notification");
                return ScheduleOutcome::Failed;
            }
            count += 1;
        }
        debug!(tracker_id, count, "scheduled milestone notifications");
        ScheduleOutcome::Scheduled { count }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    pending: BTreeMap<String, NotificationRequest>,
    denied: bool,
    failing: bool,
}

/// In-process notification service that keeps pending requests in memory.
#[derive(Debug, Default)]
pub struct MemoryNotificationService {
    state: Mutex<MemoryState>,
}

impl MemoryNotificationService {
    pub fn new(permission_granted: bool) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                denied: !permission_granted,
                ..MemoryState::default()
            }),
        }
    }

    pub fn set_permission(&self, granted: bool) {
        self.state.lock().denied = !granted;
    }

    /// Make every subsequent call fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    pub fn pending(&self) -> Vec<NotificationRequest> {
        self.state.lock().pending.values().cloned().collect()
    }

    pub fn pending_identifiers(&self) -> Vec<String> {
        self.state.lock().pending.keys().cloned().collect()
    }

    fn check(state: &MemoryState) -> Result<(), NotificationError> {
        if state.failing {
            return Err(NotificationError("service unavailable".into()));
        }
        Ok(())
    }
}

impl NotificationService for MemoryNotificationService {
    fn list_scheduled(&self) -> Result<Vec<ScheduledNotification>, NotificationError> {
        let state = self.state.lock();
        Self::check(&state)?;
        Ok(state
            .pending
            .values()
            .map(|request| ScheduledNotification {
                identifier: request.identifier.clone(),
                trigger_at: request.trigger_at,
            })
            .collect())
    }

    fn schedule_at(&self, request: NotificationRequest) -> Result<(), NotificationError> {
        let mut state = self.state.lock();
        Self::check(&state)?;
        state.pending.insert(request.identifier.clone(), request);
        Ok(())
    }

    fn cancel(&self, identifier: &str) -> Result<(), NotificationError> {
        let mut state = self.state.lock();
        Self::check(&state)?;
        state.pending.remove(identifier);
        Ok(())
    }

    fn ensure_permission(&self) -> Result<bool, NotificationError> {
        let state = self.state.lock();
        Self::check(&state)?;
        Ok(!state.denied)
    }
}

impl<T: NotificationService + ?Sized> NotificationService for std::sync::Arc<T> {
    fn list_scheduled(&self) -> Result<Vec<ScheduledNotification>, NotificationError> {
        (**self).list_scheduled()
    }

    fn schedule_at(&self, request: NotificationRequest) -> Result<(), NotificationError> {
        (**self).schedule_at(request)
    }

    fn cancel(&self, identifier: &str) -> Result<(), NotificationError> {
        (**self).cancel(identifier)
    }

    fn ensure_permission(&self) -> Result<bool, NotificationError> {
        (**self).ensure_permission()
    }
}
