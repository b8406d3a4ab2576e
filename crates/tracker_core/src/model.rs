use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::duration::{format_timestamp, parse_timestamp};
use crate::error::TrackerError;
use crate::milestones::Milestone;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TrackerKind {
    ColdTurkey,
    DoseDecrease,
}

/// A user-created tracker as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum TrackedItem {
    #[serde(rename = "coldTurkey")]
    ColdTurkey(ColdTurkeyTracker),
    #[serde(rename = "slowLoweringTheDosage")]
    DoseDecrease(DoseDecreaseTracker),
}

/// Fields shared by every tracker kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerBase {
    pub id: String,
    pub name: String,
    /// Anchor instant elapsed time is measured from. Kept verbatim so a
    /// corrupt value degrades to "unavailable" instead of failing the load.
    pub started_at: String,
    #[serde(default)]
    pub notified_milestones: BTreeSet<String>,
    #[serde(default)]
    pub reset_history: Vec<ResetEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResetEntry {
    pub started_at: String,
    pub reset_at: String,
}

impl ResetEntry {
    /// Both instants, when they parse and the reset is strictly after the start.
    pub fn interval(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = parse_timestamp(&self.started_at)?;
        let reset = parse_timestamp(&self.reset_at)?;
        (reset > start).then_some((start, reset))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColdTurkeyTracker {
    #[serde(flatten)]
    pub base: TrackerBase,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DoseUnit {
    Mg,
    G,
}

impl fmt::Display for DoseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoseUnit::Mg => f.write_str("mg"),
            DoseUnit::G => f.write_str("g"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoseLogEntry {
    /// Timestamp of the dose; doubles as the entry's key for edits and deletes.
    pub at: String,
    #[serde(default = "missing_amount", deserialize_with = "lenient_amount")]
    pub value: f64,
    pub unit: DoseUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoseDecreaseTracker {
    #[serde(flatten)]
    pub base: TrackerBase,
    #[serde(default = "missing_amount", deserialize_with = "lenient_amount")]
    pub current_usage_value: f64,
    pub current_usage_unit: DoseUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_dose: Option<f64>,
    #[serde(default)]
    pub dose_logs: Vec<DoseLogEntry>,
}

fn missing_amount() -> f64 {
    f64::NAN
}

/// JSON has no NaN or infinity; writers emit `null` for them. Read that back
/// as NaN so the aggregates skip the entry instead of the load failing.
fn lenient_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

fn validate_name(name: &str) -> Result<String, TrackerError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::EmptyName);
    }
    Ok(trimmed.to_string())
}

fn validate_amount(value: f64) -> Result<f64, TrackerError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(TrackerError::InvalidAmount(value))
    }
}

impl TrackerBase {
    fn new(id: impl Into<String>, name: &str, started_at: DateTime<Utc>) -> Result<Self, TrackerError> {
        Ok(Self {
            id: id.into(),
            name: validate_name(name)?,
            started_at: format_timestamp(started_at),
            notified_milestones: BTreeSet::new(),
            reset_history: Vec::new(),
        })
    }
}

impl TrackedItem {
    pub fn cold_turkey(
        id: impl Into<String>,
        name: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Self, TrackerError> {
        Ok(TrackedItem::ColdTurkey(ColdTurkeyTracker {
            base: TrackerBase::new(id, name, started_at)?,
        }))
    }

    pub fn dose_decrease(
        id: impl Into<String>,
        name: &str,
        started_at: DateTime<Utc>,
        usage_value: f64,
        usage_unit: DoseUnit,
        default_dose: Option<f64>,
    ) -> Result<Self, TrackerError> {
        Ok(TrackedItem::DoseDecrease(DoseDecreaseTracker {
            base: TrackerBase::new(id, name, started_at)?,
            current_usage_value: validate_amount(usage_value)?,
            current_usage_unit: usage_unit,
            default_dose: default_dose.map(validate_amount).transpose()?,
            dose_logs: Vec::new(),
        }))
    }

    pub fn base(&self) -> &TrackerBase {
        match self {
            TrackedItem::ColdTurkey(item) => &item.base,
            TrackedItem::DoseDecrease(item) => &item.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut TrackerBase {
        match self {
            TrackedItem::ColdTurkey(item) => &mut item.base,
            TrackedItem::DoseDecrease(item) => &mut item.base,
        }
    }

    pub fn kind(&self) -> TrackerKind {
        match self {
            TrackedItem::ColdTurkey(_) => TrackerKind::ColdTurkey,
            TrackedItem::DoseDecrease(_) => TrackerKind::DoseDecrease,
        }
    }

    pub fn id(&self) -> &str {
        &self.base().id
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn started_at(&self) -> &str {
        &self.base().started_at
    }

    pub fn reset_history(&self) -> &[ResetEntry] {
        &self.base().reset_history
    }

    pub fn as_dose(&self) -> Option<&DoseDecreaseTracker> {
        match self {
            TrackedItem::DoseDecrease(item) => Some(item),
            TrackedItem::ColdTurkey(_) => None,
        }
    }

    pub fn as_dose_mut(&mut self) -> Result<&mut DoseDecreaseTracker, TrackerError> {
        match self {
            TrackedItem::DoseDecrease(item) => Ok(item),
            TrackedItem::ColdTurkey(item) => Err(TrackerError::NotADoseTracker(item.base.id.clone())),
        }
    }

    pub fn rename(&mut self, name: &str) -> Result<(), TrackerError> {
        self.base_mut().name = validate_name(name)?;
        Ok(())
    }

    /// End the current streak at `now`: snapshot it into the reset history and
    /// move the anchor to `now`.
    pub fn reset(&mut self, now: DateTime<Utc>) -> Result<(), TrackerError> {
        let reset_at = format_timestamp(now);
        let base = self.base_mut();
        if base.reset_history.iter().any(|entry| entry.reset_at == reset_at) {
            return Err(TrackerError::DuplicateReset(reset_at));
        }
        let previous = std::mem::replace(&mut base.started_at, reset_at.clone());
        base.reset_history.push(ResetEntry {
            started_at: previous,
            reset_at,
        });
        Ok(())
    }

    /// Record that `milestone` has been surfaced. Returns false if it already was.
    pub fn mark_notified(&mut self, milestone: &Milestone) -> bool {
        self.base_mut().notified_milestones.insert(milestone.key())
    }
}

impl DoseDecreaseTracker {
    /// Append a dose in the tracker's unit.
    pub fn log_dose(
        &mut self,
        at: DateTime<Utc>,
        value: f64,
        note: Option<String>,
    ) -> Result<&DoseLogEntry, TrackerError> {
        let value = validate_amount(value)?;
        let at = format_timestamp(at);
        if self.dose_logs.iter().any(|entry| entry.at == at) {
            return Err(TrackerError::DuplicateDose(at));
        }
        self.dose_logs.push(DoseLogEntry {
            at,
            value,
            unit: self.current_usage_unit,
            note,
        });
        Ok(&self.dose_logs[self.dose_logs.len() - 1])
    }

    /// Change the amount of the entry keyed by `at`; the entry takes the
    /// tracker's current unit.
    pub fn edit_dose(&mut self, at: &str, value: f64) -> Result<(), TrackerError> {
        let value = validate_amount(value)?;
        let unit = self.current_usage_unit;
        let entry = self
            .dose_logs
            .iter_mut()
            .find(|entry| entry.at == at)
            .ok_or_else(|| TrackerError::DoseNotFound(at.to_string()))?;
        entry.value = value;
        entry.unit = unit;
        Ok(())
    }

    pub fn delete_dose(&mut self, at: &str) -> Result<DoseLogEntry, TrackerError> {
        let index = self
            .dose_logs
            .iter()
            .position(|entry| entry.at == at)
            .ok_or_else(|| TrackerError::DoseNotFound(at.to_string()))?;
        Ok(self.dose_logs.remove(index))
    }

    pub fn set_usage_value(&mut self, value: f64) -> Result<(), TrackerError> {
        self.current_usage_value = validate_amount(value)?;
        Ok(())
    }

    pub fn set_default_dose(&mut self, value: Option<f64>) -> Result<(), TrackerError> {
        self.default_dose = value.map(validate_amount).transpose()?;
        Ok(())
    }

    /// Pending input plus the default dose, for the quick-add button.
    pub fn quick_add(&self, pending: f64) -> Option<f64> {
        let base = if pending.is_finite() { pending } else { 0.0 };
        self.default_dose.map(|dose| base + dose)
    }
}
