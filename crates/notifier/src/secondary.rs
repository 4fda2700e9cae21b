//! Secondary per-badge channel.
//!
//! Besides the batched primary webhook, each new badge can be announced on its
//! own through an [`ItemNotifier`]. Delivery is best effort: the dispatcher runs
//! it on a separate task and only logs failures.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use badgewatch_common::http::HttpTransport;
use badgewatch_common::retry::{RetryOutcome, RetryPolicy};
use badgewatch_common::types::Badge;

use crate::embed::Embed;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("rejected with status {0}")]
    Rejected(u16),

    #[error("gave up after {attempts} attempts: {last_failure}")]
    Exhausted { attempts: u32, last_failure: String },
}

/// Sends a single-item notification.
#[async_trait]
pub trait ItemNotifier: Send + Sync {
    async fn notify(&self, badge: &Badge, embed: &Embed) -> Result<(), NotifyError>;

    /// Human-readable name for logs.
    fn name(&self) -> &'static str;
}

/// Posts one embed per message to a second webhook.
pub struct SecondaryWebhook {
    transport: Arc<dyn HttpTransport>,
    webhook_url: String,
    policy: RetryPolicy,
}

impl SecondaryWebhook {
    pub fn new(transport: Arc<dyn HttpTransport>, webhook_url: impl Into<String>) -> Self {
        Self {
            transport,
            webhook_url: webhook_url.into(),
            policy: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::WEBHOOK
            },
        }
    }
}

#[async_trait]
impl ItemNotifier for SecondaryWebhook {
    async fn notify(&self, _badge: &Badge, embed: &Embed) -> Result<(), NotifyError> {
        let payload = serde_json::json!({ "embeds": [embed] });
        let outcome = self
            .policy
            .run("secondary_webhook", || {
                self.transport.post_json(&self.webhook_url, &payload)
            })
            .await;

        match outcome {
            RetryOutcome::Completed(_) => Ok(()),
            RetryOutcome::Rejected(response) => Err(NotifyError::Rejected(response.status)),
            RetryOutcome::Exhausted {
                attempts,
                last_failure,
            } => Err(NotifyError::Exhausted {
                attempts,
                last_failure,
            }),
        }
    }

    fn name(&self) -> &'static str {
        "secondary_webhook"
    }
}
