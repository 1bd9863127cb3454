//! Retry with exponential backoff for calendar calls.
//!
//! This policy is independent of the model fallback policy. Every attempt is
//! bounded by a call timeout; a timeout counts as a transient failure.

use crate::error::CalendarError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry settings for calendar calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the delay (0.2 = ±20%).
    pub jitter_factor: f64,
    /// Per-attempt timeout, in milliseconds.
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 32_000,
            jitter_factor: 0.2,
            call_timeout_ms: 15_000,
        }
    }
}

impl RetryPolicy {
    /// Disables jitter, making delays deterministic.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Per-attempt timeout.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Delay before retry number `retry` (0-based) after `error`.
    ///
    /// A provider `Retry-After` hint raises the delay but never past the cap.
    #[must_use]
    pub fn delay_for(&self, retry: u32, error: &CalendarError) -> Duration {
        let backoff = backoff_delay_ms(
            retry,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            rand::thread_rng().r#gen::<f64>(),
        );
        let hinted = match error {
            CalendarError::RateLimited {
                retry_after_secs: Some(secs),
            } => secs.saturating_mul(1000).min(self.max_delay_ms),
            _ => 0,
        };
        Duration::from_millis(backoff.max(hinted))
    }

    /// Runs `call` until it succeeds, fails permanently, or retries run out.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted, or the first
    /// non-retryable error.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, CalendarError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CalendarError>>,
    {
        let mut retry = 0;
        loop {
            let result = tokio::time::timeout(self.call_timeout(), call())
                .await
                .unwrap_or(Err(CalendarError::Timeout));

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry < self.max_retries => {
                    let delay = self.delay_for(retry, &e);
                    tracing::warn!(
                        operation,
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying calendar call"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exponential backoff with jitter: `base * 2^retry`, jittered by
/// `±jitter_factor`, capped at `max_delay_ms`. `random` is in `[0, 1)`.
#[must_use]
pub fn backoff_delay_ms(
    retry: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << retry.min(31));
    let capped = exponential.min(max_delay_ms);
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = ((capped as f64) * jitter).round().max(0.0) as u64;
    with_jitter.min(max_delay_ms)
}
