//! HTTP transport seam.
//!
//! Catalog polling and webhook delivery both go through [`HttpTransport`], so the
//! retry policy sees one response shape regardless of the concrete client and
//! tests can swap in a scripted transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use thiserror::Error;

use crate::error::AppError;

/// Failures that happen before an HTTP status is available.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Raw `Retry-After` header, if the server sent one.
    pub retry_after: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// `Retry-After` header interpreted as (possibly fractional) seconds.
    pub fn retry_after_header(&self) -> Option<Duration> {
        parse_seconds(self.retry_after.as_deref()?.trim())
    }

    /// `retry_after` field of a JSON body, as sent by Discord-style webhooks.
    pub fn retry_after_body(&self) -> Option<Duration> {
        let value: serde_json::Value = serde_json::from_str(&self.body).ok()?;
        match value.get("retry_after")? {
            serde_json::Value::Number(n) => n.as_f64().and_then(seconds),
            serde_json::Value::String(s) => parse_seconds(s.trim()),
            _ => None,
        }
    }

    /// Body excerpt for log lines.
    pub fn body_excerpt(&self) -> &str {
        let end = self
            .body
            .char_indices()
            .nth(200)
            .map(|(i, _)| i)
            .unwrap_or(self.body.len());
        &self.body[..end]
    }
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    raw.parse::<f64>().ok().and_then(seconds)
}

/// Non-negative seconds as a `Duration`. Values too large to represent
/// saturate; callers cap the wait anyway.
fn seconds(value: f64) -> Option<Duration> {
    if value.is_finite() && value >= 0.0 {
        Some(Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX))
    } else {
        None
    }
}

/// Minimal HTTP surface used by the pipeline.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport. The timeout applies to each request on its own.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("badgewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Http(e.to_string()))?;
        Ok(Self { client })
    }

    async fn read(response: reqwest::Response) -> Result<HttpResponse, TransportError> {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self.client.get(url).send().await?;
        Self::read(response).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, TransportError> {
        let response = self.client.post(url).json(body).send().await?;
        Self::read(response).await
    }
}
