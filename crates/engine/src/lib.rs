//! Change detection and durable state: which badges are new, what has been seen.

pub mod detector;
pub mod snapshot;
pub mod universes;

pub use detector::{ChangeDetector, FirstSightPolicy};
pub use snapshot::{SnapshotError, SnapshotStore};
