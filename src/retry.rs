//! Bounded exponential backoff for provider calls.
//!
//! Every outbound HTTP call (embedding or generation) goes through
//! [`with_retry`]. Failures are classified before retrying:
//!
//! | Failure | Class |
//! |---------|-------|
//! | HTTP 429, HTTP 5xx | transient → retry |
//! | network / timeout | transient → retry |
//! | other HTTP 4xx | permanent → fail immediately |
//! | malformed response body | permanent → fail immediately |
//!
//! Delays double from `base_delay` per attempt, capped at `base × 2^5`.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::warn;

/// Retry budget for one provider.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` means a single try.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before the given retry (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(5);
        self.base_delay * (1u32 << exp)
    }
}

/// Outcome of one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    Transient(String),
    Permanent(String),
}

impl CallError {
    pub fn message(&self) -> &str {
        match self {
            CallError::Transient(m) | CallError::Permanent(m) => m,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode, body: &str, service: &str) -> Self {
        let msg = format!("{} API error {}: {}", service, status, body);
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            CallError::Transient(msg)
        } else {
            CallError::Permanent(msg)
        }
    }

    /// Classify a transport-level failure.
    pub fn from_reqwest(err: reqwest::Error, service: &str) -> Self {
        let msg = format!("{} request failed: {}", service, err);
        if err.is_decode() || err.is_builder() {
            CallError::Permanent(msg)
        } else {
            CallError::Transient(msg)
        }
    }
}

/// POST a JSON body once and decode a JSON reply, classifying any failure.
pub async fn post_json(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    service: &str,
) -> Result<serde_json::Value, CallError> {
    let mut request = client.post(url).json(body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request
        .send()
        .await
        .map_err(|e| CallError::from_reqwest(e, service))?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(CallError::from_status(status, &text, service));
    }
    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| CallError::from_reqwest(e, service))
}

/// Run `op` until it succeeds, fails permanently, or the budget is spent.
///
/// Returns the last error on exhaustion.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err @ CallError::Permanent(_)) => return Err(err),
            Err(err) if attempt >= policy.max_retries => return Err(err),
            Err(err) => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    call = label,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = err.message(),
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
