use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use badgewatch_catalog::CatalogClient;
use badgewatch_common::types::{Snapshot, UniverseId};
use badgewatch_engine::universes::load_universe_ids;
use badgewatch_engine::{ChangeDetector, SnapshotStore};
use badgewatch_notifier::WebhookDispatcher;

/// Default cap on universes fetched at the same time.
pub const DEFAULT_MAX_CONCURRENT: usize = 50;

/// Counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub universes: usize,
    /// Universes whose listing walk stopped on a failure.
    pub incomplete_fetches: usize,
    /// Universe tasks that panicked or were cancelled.
    pub failed_tasks: usize,
    pub new_badges: usize,
    pub batches_delivered: u64,
    pub batches_dropped: u64,
}

/// What one universe task reports back.
struct UniverseOutcome {
    new_badges: usize,
    complete: bool,
}

/// Runs collection passes: fetch every universe, diff against the snapshot,
/// notify, persist.
pub struct BadgePoller {
    catalog: CatalogClient,
    detector: ChangeDetector,
    dispatcher: Arc<WebhookDispatcher>,
    store: SnapshotStore,
    universes_path: PathBuf,
    max_concurrent: usize,
}

impl BadgePoller {
    pub fn new(
        catalog: CatalogClient,
        dispatcher: Arc<WebhookDispatcher>,
        store: SnapshotStore,
        universes_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            detector: ChangeDetector::default(),
            dispatcher,
            store,
            universes_path: universes_path.into(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }

    pub fn with_detector(mut self, detector: ChangeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn dispatcher(&self) -> &Arc<WebhookDispatcher> {
        &self.dispatcher
    }

    /// Run one full pass.
    ///
    /// Failing universes are logged and skipped. The snapshot is saved after
    /// pending notifications are drained; a failed save is returned as an
    /// error once that has happened.
    pub async fn run_once(&self) -> anyhow::Result<RunSummary> {
        let run_id = Uuid::new_v4();
        self.pass()
            .instrument(tracing::info_span!("pass", %run_id))
            .await
    }

    async fn pass(&self) -> anyhow::Result<RunSummary> {
        let universe_ids = load_universe_ids(&self.universes_path).await?;
        let snapshot = Arc::new(Mutex::new(self.store.load().await));
        let stats_before = self.dispatcher.stats();

        let mut summary = RunSummary {
            universes: universe_ids.len(),
            ..Default::default()
        };

        tracing::info!(
            universes = universe_ids.len(),
            max_concurrent = self.max_concurrent,
            "Pass started"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for universe_id in universe_ids {
            let permit = semaphore.clone().acquire_owned().await?;
            let catalog = self.catalog.clone();
            let detector = self.detector.clone();
            let dispatcher = self.dispatcher.clone();
            let snapshot = snapshot.clone();

            tasks.spawn(
                async move {
                    let _permit = permit;
                    process_universe(universe_id, &catalog, &detector, &dispatcher, &snapshot).await
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    summary.new_badges += outcome.new_badges;
                    if !outcome.complete {
                        summary.incomplete_fetches += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Universe task failed");
                    summary.failed_tasks += 1;
                }
            }
        }

        self.dispatcher.drain().await;

        let stats_after = self.dispatcher.stats();
        summary.batches_delivered = stats_after.batches_delivered - stats_before.batches_delivered;
        summary.batches_dropped = stats_after.batches_dropped - stats_before.batches_dropped;

        let snapshot: Snapshot = snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::error!(
                path = %self.store.path().display(),
                error = %e,
                "Failed to persist snapshot"
            );
            return Err(e.into());
        }

        tracing::info!(
            universes = summary.universes,
            incomplete_fetches = summary.incomplete_fetches,
            failed_tasks = summary.failed_tasks,
            new_badges = summary.new_badges,
            batches_delivered = summary.batches_delivered,
            batches_dropped = summary.batches_dropped,
            "Pass complete"
        );
        Ok(summary)
    }
}

/// Fetch, diff and enqueue one universe.
async fn process_universe(
    universe_id: UniverseId,
    catalog: &CatalogClient,
    detector: &ChangeDetector,
    dispatcher: &WebhookDispatcher,
    snapshot: &Mutex<Snapshot>,
) -> UniverseOutcome {
    let listing = catalog.fetch_all_badges(&universe_id).await;
    let complete = listing.complete;

    let new_badges = {
        let mut snapshot = snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        detector.diff(&universe_id, listing.badges, &mut snapshot)
    };

    for badge in &new_badges {
        let thumbnail = catalog.thumbnail_url(&badge.id).await;
        dispatcher.enqueue(badge, &thumbnail).await;
    }

    UniverseOutcome {
        new_badges: new_badges.len(),
        complete,
    }
}
