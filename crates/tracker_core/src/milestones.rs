use serde::Serialize;

use crate::duration::MS_PER_DAY;

/// Visual tier of a milestone badge.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MilestoneTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Milestone {
    pub label: &'static str,
    pub duration_ms: i64,
    pub tier: MilestoneTier,
}

impl Milestone {
    const fn days(label: &'static str, days: i64, tier: MilestoneTier) -> Self {
        Self {
            label,
            duration_ms: days * MS_PER_DAY,
            tier,
        }
    }

    /// Key recorded in a tracker's `notifiedMilestones`.
    pub fn key(&self) -> String {
        self.duration_ms.to_string()
    }
}

/// Cold-turkey milestone ladder, ascending by duration.
pub const MILESTONES: [Milestone; 10] = [
    Milestone::days("1 day", 1, MilestoneTier::Bronze),
    Milestone::days("3 days", 3, MilestoneTier::Bronze),
    Milestone::days("1 week", 7, MilestoneTier::Silver),
    Milestone::days("2 weeks", 14, MilestoneTier::Silver),
    Milestone::days("1 month", 30, MilestoneTier::Gold),
    Milestone::days("3 months", 90, MilestoneTier::Gold),
    Milestone::days("6 months", 180, MilestoneTier::Platinum),
    Milestone::days("1 year", 365, MilestoneTier::Platinum),
    Milestone::days("2 years", 730, MilestoneTier::Diamond),
    Milestone::days("5 years", 1825, MilestoneTier::Diamond),
];

/// The milestone following `index`, if any.
pub fn following(index: usize) -> Option<&'static Milestone> {
    MILESTONES.get(index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_strictly_ascending() {
        assert!(MILESTONES
            .windows(2)
            .all(|pair| pair[0].duration_ms < pair[1].duration_ms));
        assert!(MILESTONES.iter().all(|milestone| milestone.duration_ms > 0));
    }

    #[test]
    fn tiers_never_step_down() {
        assert!(MILESTONES.windows(2).all(|pair| pair[0].tier <= pair[1].tier));
    }

    #[test]
    fn keys_are_durations() {
        assert_eq!(MILESTONES[0].key(), "86400000");
        assert_eq!(following(0).map(|m| m.label), Some("3 days"));
        assert!(following(MILESTONES.len() - 1).is_none());
    }
}
