//! Webhook dispatcher: dedupes, batches and delivers badge notifications.
//!
//! Collection tasks call [`WebhookDispatcher::enqueue`] concurrently. The pending
//! queue and the set of already-staged badge ids sit behind one mutex that is
//! only held for the in-memory mutation; network I/O always happens after the
//! lock is released.
//!
//! Batching: once 10 embeds are pending, the enqueue that filled the batch
//! takes it and sends it. Whatever is left is sent by [`WebhookDispatcher::drain`]
//! at the end of a pass. `N` staged embeds therefore go out in `ceil(N / 10)`
//! messages, each in enqueue order.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use badgewatch_common::http::HttpTransport;
use badgewatch_common::retry::{RetryOutcome, RetryPolicy};
use badgewatch_common::types::{Badge, BadgeId};

use crate::embed::{self, Embed, EmbedStyle};
use crate::secondary::ItemNotifier;

/// Maximum embeds per webhook message.
pub const MAX_EMBEDS_PER_MESSAGE: usize = 10;

/// Default cap on secondary notifications in flight at once.
pub const DEFAULT_SECONDARY_CONCURRENCY: usize = 5;

/// Result of offering a badge to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Staged,
    /// Already staged earlier in this process run.
    Duplicate,
    /// The dispatcher is draining for shutdown.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherPhase {
    Idle,
    Accumulating,
    Flushing,
    Draining,
}

/// What happened to one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Delivered { size: usize },
    Dropped { size: usize, reason: String },
}

/// Delivery counters since the dispatcher was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub batches_delivered: u64,
    pub batches_dropped: u64,
    pub embeds_delivered: u64,
    pub embeds_dropped: u64,
}

#[derive(Default)]
struct Pending {
    queue: VecDeque<Embed>,
    staged: HashSet<BadgeId>,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    batches_delivered: AtomicU64,
    batches_dropped: AtomicU64,
    embeds_delivered: AtomicU64,
    embeds_dropped: AtomicU64,
}

/// Owns the outbound webhook state for one process run.
pub struct WebhookDispatcher {
    transport: Arc<dyn HttpTransport>,
    webhook_url: String,
    mention: String,
    style: EmbedStyle,
    policy: RetryPolicy,
    batch_size: usize,
    pending: Mutex<Pending>,
    secondary: Option<Arc<dyn ItemNotifier>>,
    secondary_tasks: std::sync::Mutex<JoinSet<()>>,
    secondary_permits: Arc<Semaphore>,
    in_flight: AtomicUsize,
    counters: Counters,
}

impl WebhookDispatcher {
    pub fn new(transport: Arc<dyn HttpTransport>, webhook_url: impl Into<String>) -> Self {
        Self {
            transport,
            webhook_url: webhook_url.into(),
            mention: String::new(),
            style: EmbedStyle::default(),
            policy: RetryPolicy::WEBHOOK,
            batch_size: MAX_EMBEDS_PER_MESSAGE,
            pending: Mutex::new(Pending::default()),
            secondary: None,
            secondary_tasks: std::sync::Mutex::new(JoinSet::new()),
            secondary_permits: Arc::new(Semaphore::new(DEFAULT_SECONDARY_CONCURRENCY)),
            in_flight: AtomicUsize::new(0),
            counters: Counters::default(),
        }
    }

    /// Role/recipient tag sent as the `content` of every batch.
    pub fn with_mention(mut self, mention: impl Into<String>) -> Self {
        self.mention = mention.into();
        self
    }

    pub fn with_style(mut self, style: EmbedStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Batch size, clamped to `1..=MAX_EMBEDS_PER_MESSAGE`.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_EMBEDS_PER_MESSAGE);
        self
    }

    pub fn with_secondary(mut self, notifier: Arc<dyn ItemNotifier>) -> Self {
        self.secondary = Some(notifier);
        self
    }

    /// Secondary notifications allowed in flight at once (at least 1).
    pub fn with_secondary_concurrency(mut self, limit: usize) -> Self {
        self.secondary_permits = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    /// Stage a notification for `badge` unless its id was staged before.
    ///
    /// Sends a batch inline when this call fills one.
    pub async fn enqueue(&self, badge: &Badge, thumbnail_url: &str) -> EnqueueOutcome {
        let embed = embed::render(badge, thumbnail_url, &self.style);

        let ready = {
            let mut pending = self.pending.lock().await;
            if pending.closed {
                tracing::warn!(badge_id = %badge.id, "Dispatcher closed, badge not staged");
                return EnqueueOutcome::Closed;
            }
            if !pending.staged.insert(badge.id.clone()) {
                tracing::debug!(badge_id = %badge.id, "Badge already staged, skipping");
                return EnqueueOutcome::Duplicate;
            }
            pending.queue.push_back(embed.clone());
            if pending.queue.len() >= self.batch_size {
                Some(self.take_batch(&mut pending))
            } else {
                None
            }
        };

        self.spawn_secondary(badge, embed);

        if let Some(batch) = ready {
            self.send_batch(batch).await;
        }
        EnqueueOutcome::Staged
    }

    /// Send up to one batch of pending embeds. `None` when nothing was pending.
    pub async fn flush(&self) -> Option<BatchOutcome> {
        let batch = {
            let mut pending = self.pending.lock().await;
            if pending.queue.is_empty() {
                return None;
            }
            self.take_batch(&mut pending)
        };
        Some(self.send_batch(batch).await)
    }

    /// Flush until nothing is pending.
    pub async fn drain(&self) -> Vec<BatchOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.flush().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Stop accepting badges, deliver everything pending and wait for
    /// outstanding secondary notifications. Must be the last call.
    pub async fn close(&self) -> DispatchStats {
        self.pending.lock().await.closed = true;
        self.drain().await;

        let mut tasks = std::mem::take(&mut *self.lock_secondary_tasks());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Secondary notification task failed");
            }
        }

        let stats = self.stats();
        tracing::info!(
            batches_delivered = stats.batches_delivered,
            batches_dropped = stats.batches_dropped,
            embeds_delivered = stats.embeds_delivered,
            embeds_dropped = stats.embeds_dropped,
            "Dispatcher closed"
        );
        stats
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.queue.len()
    }

    pub async fn phase(&self) -> DispatcherPhase {
        let pending = self.pending.lock().await;
        if pending.closed {
            DispatcherPhase::Draining
        } else if self.in_flight.load(Ordering::Acquire) > 0 {
            DispatcherPhase::Flushing
        } else if !pending.queue.is_empty() {
            DispatcherPhase::Accumulating
        } else {
            DispatcherPhase::Idle
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            batches_delivered: self.counters.batches_delivered.load(Ordering::Relaxed),
            batches_dropped: self.counters.batches_dropped.load(Ordering::Relaxed),
            embeds_delivered: self.counters.embeds_delivered.load(Ordering::Relaxed),
            embeds_dropped: self.counters.embeds_dropped.load(Ordering::Relaxed),
        }
    }

    fn take_batch(&self, pending: &mut Pending) -> Vec<Embed> {
        let size = pending.queue.len().min(self.batch_size);
        pending.queue.drain(..size).collect()
    }

    async fn send_batch(&self, batch: Vec<Embed>) -> BatchOutcome {
        let size = batch.len();
        let payload = serde_json::json!({
            "content": self.mention,
            "embeds": batch,
            "attachments": [],
        });

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let outcome = self
            .policy
            .run("webhook", || self.transport.post_json(&self.webhook_url, &payload))
            .await;
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        match outcome {
            RetryOutcome::Completed(_) => {
                self.counters.batches_delivered.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .embeds_delivered
                    .fetch_add(size as u64, Ordering::Relaxed);
                tracing::info!(size, "Webhook batch delivered");
                BatchOutcome::Delivered { size }
            }
            RetryOutcome::Rejected(response) => {
                let reason = format!("rejected with status {}", response.status);
                tracing::error!(
                    size,
                    status = response.status,
                    body = response.body_excerpt(),
                    "Webhook rejected batch, dropping it"
                );
                self.record_drop(size);
                BatchOutcome::Dropped { size, reason }
            }
            RetryOutcome::Exhausted {
                attempts,
                last_failure,
            } => {
                tracing::error!(
                    size,
                    attempts,
                    last_failure = %last_failure,
                    "Webhook retries exhausted, dropping batch"
                );
                self.record_drop(size);
                BatchOutcome::Dropped {
                    size,
                    reason: format!("gave up after {attempts} attempts: {last_failure}"),
                }
            }
        }
    }

    fn record_drop(&self, size: usize) {
        self.counters.batches_dropped.fetch_add(1, Ordering::Relaxed);
        self.counters
            .embeds_dropped
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    fn spawn_secondary(&self, badge: &Badge, embed: Embed) {
        let Some(notifier) = self.secondary.clone() else {
            return;
        };
        let badge = badge.clone();
        let permits = self.secondary_permits.clone();

        let mut tasks = self.lock_secondary_tasks();
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                tracing::warn!(error = %e, "Secondary notification task failed");
            }
        }
        tasks.spawn(async move {
            // The semaphore is never closed.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if let Err(e) = notifier.notify(&badge, &embed).await {
                tracing::warn!(
                    channel = notifier.name(),
                    badge_id = %badge.id,
                    error = %e,
                    "Secondary notification failed"
                );
            }
        });
    }

    /// Secondary tasks spawned and not yet reaped.
    pub fn secondary_backlog(&self) -> usize {
        self.lock_secondary_tasks().len()
    }

    fn lock_secondary_tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        // A poisoned lock only means a spawn panicked; the set itself is intact.
        self.secondary_tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use badgewatch_common::http::HttpResponse;
    use badgewatch_common::testing::{Method, ScriptedTransport, status};
    use tokio::time::{Duration, Instant};

    const HOOK: &str = "http://discord/api/webhooks/primary";

    fn dispatcher(transport: ScriptedTransport) -> (WebhookDispatcher, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        (WebhookDispatcher::new(transport.clone(), HOOK), transport)
    }

    fn ok_hook() -> ScriptedTransport {
        ScriptedTransport::new().on_post("/webhooks/primary", vec![status(204)])
    }

    fn titles(body: &serde_json::Value) -> Vec<String> {
        body["embeds"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["title"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_enqueue_stages_once() {
        let (dispatcher, _) = dispatcher(ok_hook());
        let badge = Badge::new(1, "one");

        assert_eq!(dispatcher.enqueue(&badge, "").await, EnqueueOutcome::Staged);
        assert_eq!(dispatcher.enqueue(&badge, "").await, EnqueueOutcome::Duplicate);
        assert_eq!(dispatcher.pending_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_duplicate_enqueue_stages_once() {
        let (dispatcher, _) = dispatcher(ok_hook());
        let dispatcher = Arc::new(dispatcher);

        let mut tasks = JoinSet::new();
        for _ in 0..16 {
            let dispatcher = dispatcher.clone();
            tasks.spawn(async move { dispatcher.enqueue(&Badge::new(77, "same"), "").await });
        }
        let mut staged = 0;
        while let Some(outcome) = tasks.join_next().await {
            if outcome.unwrap() == EnqueueOutcome::Staged {
                staged += 1;
            }
        }
        assert_eq!(staged, 1);
        assert_eq!(dispatcher.pending_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_of_ten_in_order() {
        let (dispatcher, transport) = dispatcher(ok_hook());

        for i in 0..23u64 {
            dispatcher.enqueue(&Badge::new(i, format!("b{i}")), "").await;
        }
        // Two full batches went out while enqueueing.
        assert_eq!(transport.count(Method::Post, "/webhooks/primary"), 2);
        assert_eq!(dispatcher.pending_len().await, 3);

        let outcomes = dispatcher.drain().await;
        assert_eq!(outcomes, vec![BatchOutcome::Delivered { size: 3 }]);

        let posted = transport.posted("/webhooks/primary");
        assert_eq!(posted.len(), 3);
        let sizes: Vec<_> = posted.iter().map(|b| titles(b).len()).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
        let all: Vec<String> = posted.iter().flat_map(titles).collect();
        let expected: Vec<String> = (0..23).map(|i| format!("b{i}")).collect();
        assert_eq!(all, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_shape() {
        let transport = Arc::new(ok_hook());
        let dispatcher = WebhookDispatcher::new(transport.clone(), HOOK).with_mention("<@&42>");
        dispatcher.enqueue(&Badge::new(1, "one"), "").await;
        dispatcher.flush().await;

        let posted = transport.posted("/webhooks/primary");
        assert_eq!(posted[0]["content"], "<@&42>");
        assert_eq!(posted[0]["attachments"], serde_json::json!([]));
        assert_eq!(titles(&posted[0]), vec!["one"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_empty_is_noop() {
        let (dispatcher, transport) = dispatcher(ok_hook());
        assert_eq!(dispatcher.flush().await, None);
        assert!(transport.requests().is_empty());
        assert_eq!(dispatcher.phase().await, DispatcherPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_batch_waits_then_delivers() {
        let (dispatcher, transport) = dispatcher(ScriptedTransport::new().on_post(
            "/webhooks/primary",
            vec![
                Ok(HttpResponse::new(429, r#"{"message":"rate limited","retry_after":2}"#)),
                status(204),
            ],
        ));
        dispatcher.enqueue(&Badge::new(1, "one"), "").await;

        let start = Instant::now();
        let outcome = dispatcher.flush().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(outcome, Some(BatchOutcome::Delivered { size: 1 }));
        assert_eq!(transport.count(Method::Post, "/webhooks/primary"), 2);
        assert_eq!(dispatcher.stats().batches_delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_retry_after_is_capped_then_delivers() {
        let (dispatcher, transport) = dispatcher(ScriptedTransport::new().on_post(
            "/webhooks/primary",
            vec![
                Ok(HttpResponse::new(429, r#"{"retry_after":1e20}"#)),
                status(204),
            ],
        ));
        dispatcher.enqueue(&Badge::new(1, "one"), "").await;

        let start = Instant::now();
        let outcome = dispatcher.flush().await;
        assert_eq!(outcome, Some(BatchOutcome::Delivered { size: 1 }));
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(transport.count(Method::Post, "/webhooks/primary"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_dropped_after_budget() {
        let (dispatcher, transport) = dispatcher(
            ScriptedTransport::new().on_post("/webhooks/primary", vec![status(502)]),
        );
        dispatcher.enqueue(&Badge::new(1, "one"), "").await;

        let outcome = dispatcher.flush().await.unwrap();
        assert!(matches!(outcome, BatchOutcome::Dropped { size: 1, .. }));
        assert_eq!(transport.count(Method::Post, "/webhooks/primary"), 5);
        assert_eq!(dispatcher.stats().embeds_dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_drops_without_retry() {
        let (dispatcher, transport) = dispatcher(
            ScriptedTransport::new().on_post("/webhooks/primary", vec![status(400)]),
        );
        dispatcher.enqueue(&Badge::new(1, "one"), "").await;
        let outcome = dispatcher.flush().await.unwrap();
        assert!(matches!(outcome, BatchOutcome::Dropped { .. }));
        assert_eq!(transport.count(Method::Post, "/webhooks/primary"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_drains_and_refuses_more() {
        let (dispatcher, transport) = dispatcher(ok_hook());
        dispatcher.enqueue(&Badge::new(1, "one"), "").await;
        dispatcher.enqueue(&Badge::new(2, "two"), "").await;

        let stats = dispatcher.close().await;
        assert_eq!(stats.batches_delivered, 1);
        assert_eq!(stats.embeds_delivered, 2);
        assert_eq!(transport.count(Method::Post, "/webhooks/primary"), 1);

        assert_eq!(
            dispatcher.enqueue(&Badge::new(3, "three"), "").await,
            EnqueueOutcome::Closed
        );
        assert_eq!(dispatcher.phase().await, DispatcherPhase::Draining);
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_accumulating() {
        let (dispatcher, _) = dispatcher(ok_hook());
        dispatcher.enqueue(&Badge::new(1, "one"), "").await;
        assert_eq!(dispatcher.phase().await, DispatcherPhase::Accumulating);
    }

    struct Quiet;

    #[async_trait::async_trait]
    impl ItemNotifier for Quiet {
        async fn notify(&self, _badge: &Badge, _embed: &Embed) -> Result<(), crate::secondary::NotifyError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "quiet"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_secondary_tasks_are_reaped() {
        let (dispatcher, _) = dispatcher(ok_hook());
        let dispatcher = dispatcher.with_secondary(Arc::new(Quiet));

        for i in 0..5u64 {
            dispatcher.enqueue(&Badge::new(i, "x"), "").await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        // Only the task spawned by the last enqueue can still be held.
        assert!(dispatcher.secondary_backlog() <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_size_is_clamped() {
        let (dispatcher, transport) = dispatcher(ok_hook());
        let dispatcher = dispatcher.with_batch_size(50);
        for i in 0..10u64 {
            dispatcher.enqueue(&Badge::new(i, "x"), "").await;
        }
        assert_eq!(transport.count(Method::Post, "/webhooks/primary"), 1);
    }
}
