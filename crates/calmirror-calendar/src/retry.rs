//! Retry utilities for Calendar API requests with exponential backoff.
//!
//! Retried: timeouts, connection failures, 5xx, 408 and 429.
//! Not retried: other 4xx responses (bad requests, not found, auth failures).
//!
//! Requests that are not idempotent (inserts) are only retried when the
//! server cannot have acted on them: connection failures and 429.

use std::future::Future;
use std::time::Duration;

use reqwest::{Response, StatusCode};

use calmirror_core::RetrySettings;

/// Longest `Retry-After` the client is willing to honour.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries (doubles each attempt)
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether repeating a request that may have reached the server is safe
    pub idempotent: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_retries,
            settings.initial_delay_ms,
            settings.max_delay_ms,
        )
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            idempotent: true,
        }
    }

    /// Same limits, for a request that must not run twice.
    pub fn non_idempotent(&self) -> Self {
        Self {
            idempotent: false,
            ..self.clone()
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = (self.initial_delay.as_millis() as u64).saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetry,
}

/// Check if a transport error is retryable
pub fn is_retryable_error(error: &reqwest::Error) -> RetryDecision {
    if error.is_timeout() || error.is_connect() {
        tracing::debug!("Transport error, will retry: {}", error);
        return RetryDecision::Retry;
    }

    if error.is_request() {
        return RetryDecision::NoRetry;
    }

    match error.status() {
        Some(status) => is_retryable_status(status),
        None => RetryDecision::NoRetry,
    }
}

/// Check if a status code is retryable
pub fn is_retryable_status(status: StatusCode) -> RetryDecision {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        tracing::debug!("Retryable status {}", status);
        return RetryDecision::Retry;
    }

    RetryDecision::NoRetry
}

/// Whether a retry could repeat a side effect the server already applied.
fn may_duplicate(config: &RetryConfig, status: Option<StatusCode>, timed_out: bool) -> bool {
    if config.idempotent {
        return false;
    }
    match status {
        Some(status) => status != StatusCode::TOO_MANY_REQUESTS,
        None => timed_out,
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// Execute an HTTP request with retry logic.
///
/// Returns the first non-retryable response (including error statuses, which
/// the caller maps), the last retryable response once attempts run out, or
/// the last transport error.
pub async fn with_retry<F, Fut>(config: &RetryConfig, operation: F) -> Result<Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut attempt = 0;

    loop {
        let outcome = operation().await;
        let exhausted = attempt >= config.max_retries;

        let wait = match outcome {
            Ok(response) => {
                let status = response.status();
                if exhausted
                    || is_retryable_status(status) == RetryDecision::NoRetry
                    || may_duplicate(config, Some(status), false)
                {
                    if attempt > 0 {
                        tracing::info!("Request finished with {} after {} retries", status, attempt);
                    }
                    return Ok(response);
                }
                tracing::warn!(
                    "Request returned retryable status {}, attempt {} of {}",
                    status,
                    attempt + 1,
                    config.max_retries + 1
                );
                retry_after(&response).unwrap_or_else(|| config.delay_for_attempt(attempt))
            }
            Err(e) => {
                if exhausted
                    || is_retryable_error(&e) == RetryDecision::NoRetry
                    || may_duplicate(config, None, e.is_timeout())
                {
                    if exhausted {
                        tracing::error!("All {} attempts failed: {}", config.max_retries + 1, e);
                    }
                    return Err(e);
                }
                tracing::warn!(
                    "Retryable error on attempt {} of {}: {}",
                    attempt + 1,
                    config.max_retries + 1,
                    e
                );
                config.delay_for_attempt(attempt)
            }
        };

        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}
