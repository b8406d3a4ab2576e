use thiserror::Error;

/// Refusals raised by tracker mutations. Read-side projections never fail;
/// they report unavailable values instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackerError {
    #[error("tracker name must not be empty")]
    EmptyName,
    #[error("tracker `{0}` already exists")]
    DuplicateTracker(String),
    #[error("tracker `{0}` not found")]
    TrackerNotFound(String),
    #[error("tracker `{0}` does not log doses")]
    NotADoseTracker(String),
    #[error("dose amount must be a positive finite number, got {0}")]
    InvalidAmount(f64),
    #[error("a dose is already logged at {0}")]
    DuplicateDose(String),
    #[error("no dose logged at {0}")]
    DoseNotFound(String),
    #[error("a reset is already recorded at {0}")]
    DuplicateReset(String),
}
