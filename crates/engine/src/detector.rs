//! Change detector: computes which fetched badges have never been seen.
//!
//! The snapshot is the only memory: a badge is new exactly when its id is not
//! yet recorded under its universe. Detected badges are written into the
//! snapshot immediately, so running the same listing through `diff` twice
//! reports them once.

use badgewatch_common::types::{Badge, Snapshot, UniverseRecord};

/// What to do with the badges of a universe that has no snapshot entry yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstSightPolicy {
    /// Report every badge as new.
    #[default]
    Notify,
    /// Record the badges silently. Useful when adding many universes at once.
    Seed,
}

/// Pure, synchronous snapshot diff.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    first_sight: FirstSightPolicy,
}

impl ChangeDetector {
    pub fn new(first_sight: FirstSightPolicy) -> Self {
        Self { first_sight }
    }

    pub fn first_sight(&self) -> FirstSightPolicy {
        self.first_sight
    }

    /// Return the badges of `fetched` whose id is not recorded for `universe_id`,
    /// and record them.
    ///
    /// An empty listing for an unknown universe leaves the snapshot untouched,
    /// so a universe whose fetch failed outright is treated as unknown next time.
    pub fn diff(&self, universe_id: &str, fetched: Vec<Badge>, snapshot: &mut Snapshot) -> Vec<Badge> {
        if let Some(record) = snapshot.universes.get_mut(universe_id) {
            let new_badges = record.absorb(fetched);
            if !new_badges.is_empty() {
                tracing::info!(universe_id, new = new_badges.len(), "New badges detected");
            }
            return new_badges;
        }

        if fetched.is_empty() {
            return Vec::new();
        }

        let mut record = UniverseRecord::default();
        let recorded = record.absorb(fetched);
        snapshot.universes.insert(universe_id.to_string(), record);

        match self.first_sight {
            FirstSightPolicy::Notify => {
                tracing::info!(
                    universe_id,
                    new = recorded.len(),
                    "First sight of universe, all badges are new"
                );
                recorded
            }
            FirstSightPolicy::Seed => {
                tracing::info!(
                    universe_id,
                    seeded = recorded.len(),
                    "First sight of universe, badges recorded without notification"
                );
                Vec::new()
            }
        }
    }
}
