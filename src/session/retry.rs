//! Bounded retry with exponential backoff for collaborator calls

use std::future::Future;
use std::time::{Duration, SystemTime};

use crate::service::{ServiceError, ServiceResult};

/// Retry policy for collaborator calls
///
/// Controls how many times a transient failure is attempted and how
/// long to wait between attempts using exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Base delay between attempts (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Add 0-25% jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps between attempts
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delays slept between consecutive attempts, without jitter
    ///
    /// Yields `max_attempts - 1` values since no delay follows the last attempt.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts.saturating_sub(1)).map(|attempt| self.base_for(attempt))
    }

    fn base_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Determine whether an HTTP status and response body indicate a recoverable error.
///
/// Recoverable errors are worth retrying: rate limits (429), server errors (5xx),
/// and certain transient network-level failures surfaced in the body text.
#[must_use]
pub fn is_recoverable(status: u16, body: &str) -> bool {
    if status == 429 {
        return true;
    }

    if (500..600).contains(&status) {
        return true;
    }

    let lower = body.to_lowercase();
    lower.contains("connection reset")
        || lower.contains("timed out")
        || lower.contains("dns error")
}

/// Compute the delay before the next attempt.
///
/// The delay follows exponential backoff: `min(base_delay * 2^attempt + jitter, max_delay)`.
/// Jitter is 0-25% of the computed delay, derived from `SystemTime` to avoid
/// pulling in a full random number generator.
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.base_for(attempt);
    if !policy.jitter {
        return base;
    }

    let jitter_nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    // Scale to 0-25% of the base delay
    let jitter_fraction = f64::from(jitter_nanos % 250) / 1000.0;
    let jitter = base.mul_f64(jitter_fraction);

    (base + jitter).min(policy.max_delay)
}

/// Run `call` under `policy`, bounding each attempt by `timeout`.
///
/// A timed out attempt counts as a transient failure. Fatal failures are
/// returned immediately; exhausting every attempt on transient failures
/// escalates to [`ServiceError::Fatal`].
///
/// # Errors
///
/// Returns the first fatal failure, or a fatal failure wrapping the last
/// transient reason once attempts run out.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    label: &str,
    mut call: F,
) -> ServiceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ServiceResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_reason = String::new();

    for attempt in 0..attempts {
        let outcome = tokio::time::timeout(timeout, call())
            .await
            .unwrap_or_else(|_| {
                Err(ServiceError::Transient(format!(
                    "{label} timed out after {}ms",
                    timeout.as_millis()
                )))
            });

        match outcome {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(label, attempt = attempt + 1, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(ServiceError::Transient(reason)) => {
                tracing::warn!(
                    label,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    reason = %reason,
                    "transient failure"
                );
                last_reason = reason;

                if attempt + 1 < attempts {
                    tokio::time::sleep(delay_for_attempt(policy, attempt)).await;
                }
            }
            Err(fatal) => return Err(fatal),
        }
    }

    Err(ServiceError::Fatal(format!(
        "{label} failed after {attempts} attempts: {last_reason}"
    )))
}
