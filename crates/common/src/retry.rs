//! Bounded retry with exponential backoff for outbound HTTP calls.
//!
//! One policy object drives every call site that talks to a rate-limited
//! service: catalog pages, thumbnail lookups and webhook batches.
//!
//! - `429`: wait for the provider's retry-after hint (or a fallback), then retry
//! - `5xx` / transport errors: wait `base_delay * 2^(attempt-1)`, then retry
//! - other non-2xx: returned immediately as [`RetryOutcome::Rejected`]
//!
//! Every attempt counts against `max_attempts`, rate-limited ones included.

use std::future::Future;
use std::time::Duration;

use crate::http::{HttpResponse, TransportError};

/// Where a rate-limited response carries its retry-after hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAfterSource {
    /// `Retry-After` header only.
    Header,
    /// JSON body field `retry_after`, falling back to the header.
    JsonBody,
}

/// Configuration for bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay after the first failed attempt; doubles on every further failure.
    pub base_delay: Duration,

    /// Cap for the exponential delay.
    pub max_delay: Duration,

    /// Wait used for a 429 that carries no usable hint.
    pub rate_limit_fallback: Duration,

    /// Cap for provider-supplied retry-after hints.
    pub max_rate_limit_wait: Duration,

    pub retry_after: RetryAfterSource,
}

impl RetryPolicy {
    /// Catalog and thumbnail GETs.
    pub const CATALOG: Self = Self {
        max_attempts: 5,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        rate_limit_fallback: Duration::from_secs(5),
        max_rate_limit_wait: Duration::from_secs(60),
        retry_after: RetryAfterSource::Header,
    };

    /// Webhook POSTs.
    pub const WEBHOOK: Self = Self {
        max_attempts: 5,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        rate_limit_fallback: Duration::from_secs(5),
        max_rate_limit_wait: Duration::from_secs(60),
        retry_after: RetryAfterSource::JsonBody,
    };

    /// Backoff delay after the given failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// How long to wait after a 429.
    pub fn rate_limit_wait(&self, response: &HttpResponse) -> Duration {
        let hint = match self.retry_after {
            RetryAfterSource::Header => response.retry_after_header(),
            RetryAfterSource::JsonBody => response
                .retry_after_body()
                .or_else(|| response.retry_after_header()),
        };
        hint.unwrap_or(self.rate_limit_fallback)
            .min(self.max_rate_limit_wait)
    }

    /// Run `operation` until it yields a 2xx, a non-retryable status, or the
    /// attempt budget runs out. `label` names the call in log lines.
    pub async fn run<F, Fut>(&self, label: &str, mut operation: F) -> RetryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<HttpResponse, TransportError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let (wait, failure) = match operation().await {
                Ok(response) if response.is_success() => {
                    return RetryOutcome::Completed(response);
                }
                Ok(response) if response.is_rate_limited() => {
                    let wait = self.rate_limit_wait(&response);
                    (wait, "rate limited (429)".to_string())
                }
                Ok(response) if response.is_server_error() => (
                    self.delay_for_attempt(attempt),
                    format!("server error ({})", response.status),
                ),
                Ok(response) => return RetryOutcome::Rejected(response),
                Err(e) => (self.delay_for_attempt(attempt), e.to_string()),
            };

            if attempt >= max_attempts {
                return RetryOutcome::Exhausted {
                    attempts: attempt,
                    last_failure: failure,
                };
            }

            tracing::warn!(
                call = label,
                attempt,
                max_attempts,
                wait_ms = wait.as_millis() as u64,
                failure = %failure,
                "Request failed, retrying"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::CATALOG
    }
}

/// Final result of a retried call.
#[derive(Debug)]
pub enum RetryOutcome {
    /// A 2xx response.
    Completed(HttpResponse),

    /// A status that is not worth retrying (4xx other than 429, 1xx, 3xx).
    Rejected(HttpResponse),

    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last_failure: String },
}

impl RetryOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RetryOutcome::Completed(_))
    }
}
