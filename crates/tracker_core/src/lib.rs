pub mod dose;
pub mod duration;
pub mod error;
pub mod milestones;
pub mod model;
pub mod notifications;
pub mod progress;
pub mod store;
pub mod streak;

pub use crate::error::TrackerError;
pub use crate::model::{TrackedItem, TrackerKind};
pub use crate::store::{TrackerStore, TrackerStoreBuilder};
