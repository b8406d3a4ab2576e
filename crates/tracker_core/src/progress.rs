use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::duration::{elapsed_ms, parse_timestamp};
use crate::milestones::{Milestone, MILESTONES};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColdTurkeyProgress {
    pub elapsed_ms: i64,
    pub achieved: Vec<Milestone>,
    pub next: Option<Milestone>,
    pub progress_to_next: f64,
}

impl ColdTurkeyProgress {
    /// Fraction for progress bars; a completed ladder reports 1.0.
    pub fn fraction(&self) -> f64 {
        match self.next {
            Some(_) => self.progress_to_next,
            None => 1.0,
        }
    }

    /// Remaining time until the next milestone, if one is left.
    pub fn time_left_ms(&self) -> Option<i64> {
        self.next
            .map(|next| (next.duration_ms - self.elapsed_ms).max(0))
    }

    pub fn is_complete(&self) -> bool {
        self.next.is_none()
    }
}

/// Milestone progress for a tracker anchored at `started_at`.
/// `None` when the timestamp does not parse.
pub fn cold_turkey_progress(started_at: &str, now: DateTime<Utc>) -> Option<ColdTurkeyProgress> {
    let start = parse_timestamp(started_at)?;
    Some(progress_for_elapsed(&MILESTONES, elapsed_ms(start, now)))
}

/// Partition `table` at the first milestone still ahead of `elapsed_ms`.
/// A milestone exactly reached counts as achieved.
pub fn progress_for_elapsed(table: &[Milestone], elapsed_ms: i64) -> ColdTurkeyProgress {
    let elapsed_ms = elapsed_ms.max(0);
    let split = table.partition_point(|milestone| milestone.duration_ms <= elapsed_ms);
    let next = table.get(split).copied();
    let progress_to_next = next
        .map(|milestone| (elapsed_ms as f64 / milestone.duration_ms as f64).clamp(0.0, 1.0))
        .unwrap_or(1.0);

    ColdTurkeyProgress {
        elapsed_ms,
        achieved: table[..split].to_vec(),
        next,
        progress_to_next,
    }
}
