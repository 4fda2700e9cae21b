use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;

use badgewatch_common::http::HttpTransport;
use badgewatch_common::retry::{RetryOutcome, RetryPolicy};

/// Why a GET produced no data.
///
/// Callers treat every variant as "nothing more available"; the variants exist
/// so logs and run summaries can tell a failing upstream from an empty one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error("request rejected with status {status}")]
    Rejected { status: u16 },

    #[error("gave up after {attempts} attempts: {last_failure}")]
    Exhausted { attempts: u32, last_failure: String },

    #[error("malformed JSON body: {0}")]
    Malformed(String),
}

/// JSON GET client with bounded retry and backoff.
#[derive(Clone)]
pub struct BackoffClient {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl BackoffClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_policy(transport, RetryPolicy::CATALOG)
    }

    pub fn with_policy(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET `url` and decode the body as `T`.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchFailure> {
        let outcome = self.policy.run(url, || self.transport.get(url)).await;

        match outcome {
            RetryOutcome::Completed(response) => {
                serde_json::from_str(&response.body).map_err(|e| {
                    tracing::warn!(url, error = %e, "Catalog returned malformed JSON");
                    FetchFailure::Malformed(e.to_string())
                })
            }
            RetryOutcome::Rejected(response) => {
                tracing::warn!(
                    url,
                    status = response.status,
                    body = response.body_excerpt(),
                    "Catalog request rejected, treating as no data"
                );
                Err(FetchFailure::Rejected {
                    status: response.status,
                })
            }
            RetryOutcome::Exhausted {
                attempts,
                last_failure,
            } => {
                tracing::error!(
                    url,
                    attempts,
                    last_failure = %last_failure,
                    "Catalog retries exhausted, treating as no data"
                );
                Err(FetchFailure::Exhausted {
                    attempts,
                    last_failure,
                })
            }
        }
    }
}
