//! Retry with exponential backoff for transient provider faults.
//!
//! Transient errors (network resets, 5xx mapped to `RequestFailed`,
//! backend 429s, timeouts) are retried with a jittered exponential delay.
//! Non-transient errors surface to the caller unchanged on the first
//! attempt. The envelope: base 1s, factor 2, cap 60s, jitter ±25%, at most
//! 3 attempts.

use crate::error::{StudioError, StudioResult};
use crate::logging::{log_debug, log_warn};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy for LM requests.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied per retry.
    pub factor: f64,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
    /// Symmetric jitter fraction applied to each delay.
    pub jitter: f64,
    /// Timeout for each individual attempt.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.25,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.base_delay.as_secs_f64() * self.factor.powi(attempt.saturating_sub(1) as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        // jitter in [1 - j, 1 + j]
        let factor = 1.0 + self.jitter * (fastrand::f64() * 2.0 - 1.0);
        Duration::from_secs_f64((capped * factor).max(0.0))
    }
}

/// Run an operation under the retry policy.
///
/// Each attempt is bounded by `request_timeout`; an elapsed attempt counts
/// as a transient [`StudioError::Timeout`]. The last error is returned once
/// attempts are exhausted.
pub async fn execute_with_retry<F, Fut, T>(policy: &RetryPolicy, operation: F) -> StudioResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = StudioResult<T>>,
{
    let mut last_error: Option<StudioError> = None;

    for attempt in 1..=policy.max_attempts {
        log_debug!(
            attempt = attempt,
            max_attempts = policy.max_attempts,
            "Executing LM request attempt"
        );

        let outcome = match tokio::time::timeout(policy.request_timeout, operation()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(StudioError::timeout(policy.request_timeout.as_secs())),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(error) => {
                let retryable = error.is_retryable() && attempt < policy.max_attempts;
                if !retryable {
                    if attempt < policy.max_attempts {
                        // Non-transient: fail fast without burning attempts.
                        return Err(error);
                    }
                    last_error = Some(error);
                    break;
                }

                // Honor a backend-provided retry-after hint when it exceeds
                // our computed backoff.
                let mut delay = policy.delay_for(attempt);
                if let StudioError::RateLimited {
                    retry_after_seconds,
                } = &error
                {
                    let hinted = Duration::from_secs(*retry_after_seconds);
                    if hinted > delay {
                        delay = hinted.min(policy.max_delay);
                    }
                }

                log_warn!(
                    attempt = attempt,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "Transient LM failure, backing off"
                );
                last_error = Some(error);
                sleep(delay).await;
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| StudioError::request_failed("retry attempts exhausted", None)))
}
