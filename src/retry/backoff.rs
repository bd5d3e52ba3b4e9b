//! Backoff discipline: retry the same endpoint in place with jittered
//! exponential delays.
//!
//! Only transient faults (timeouts and unreusable connections) are retried.
//! Anything else is surfaced on first occurrence without touching the budget.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use super::{with_timeout, AttemptRecord, Fault, RetryError};
use crate::upstream::EndpointId;

/// Smallest delay between attempts.
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_millis(20);

/// Cap on the delay between attempts.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(20);

/// Fraction of the computed delay used as the jitter range.
pub const DEFAULT_JITTER: f64 = 0.5;

/// Exponential backoff bounds for the backoff discipline.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Jitter factor in `[0, 1]`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry `retry` (0-indexed) before jitter: `min * 2^retry`, capped.
    pub fn base_delay(&self, retry: u32) -> Duration {
        self.min_backoff
            .checked_mul(2u32.saturating_pow(retry))
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Jittered delay before retry `retry`, kept within `[min_backoff, max_backoff]`.
    pub fn delay_with<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }

        let base_ms = base.as_secs_f64() * 1000.0;
        let min_ms = self.min_backoff.as_secs_f64() * 1000.0;
        let max_ms = self.max_backoff.as_secs_f64() * 1000.0;
        let offset = base_ms * jitter;

        let low = (min_ms - base_ms).max(-offset);
        let high = (max_ms - base_ms).min(offset);
        let shift = if high > low {
            rng.gen_range(low..=high)
        } else {
            0.0
        };

        Duration::from_secs_f64((base_ms + shift).max(0.0) / 1000.0)
            .max(self.min_backoff)
            .min(self.max_backoff)
    }

    /// Jittered delay using the thread-local RNG.
    pub fn delay(&self, retry: u32) -> Duration {
        self.delay_with(retry, &mut rand::thread_rng())
    }
}

/// Drive `first` and, on transient faults, up to `budget` re-sends against
/// the same endpoint.
///
/// Every attempt, including `first`, is bounded by `timeout`. Failed attempts
/// are appended to `attempts`.
pub async fn retry_in_place<T, F, S, Fut>(
    policy: &BackoffPolicy,
    first: F,
    endpoint: &EndpointId,
    timeout: Duration,
    budget: u32,
    send: S,
    attempts: &mut Vec<AttemptRecord>,
) -> Result<T, RetryError>
where
    F: Future<Output = Result<T, Fault>>,
    S: Fn() -> Fut,
    Fut: Future<Output = Result<T, Fault>>,
{
    let mut result = with_timeout(first, timeout).await;
    let mut retries = 0;

    loop {
        let fault = match result {
            Ok(value) => return Ok(value),
            Err(fault) => fault,
        };

        attempts.push(AttemptRecord::new(endpoint.clone(), fault.kind));

        if !fault.kind.is_transient() {
            tracing::warn!(
                endpoint = %endpoint,
                attempt = retries + 1,
                kind = %fault.kind,
                error = %fault.message,
                "Non-retryable fault, not retrying"
            );
            return Err(RetryError::from_fault(endpoint.clone(), fault));
        }

        if retries >= budget {
            tracing::error!(
                endpoint = %endpoint,
                attempt = retries + 1,
                kind = %fault.kind,
                error = %fault.message,
                "Retry budget exhausted"
            );
            return Err(RetryError::RetryExhausted {
                retries: budget,
                last: fault,
            });
        }

        let delay = policy.delay(retries);
        tracing::debug!(
            endpoint = %endpoint,
            attempt = retries + 1,
            kind = %fault.kind,
            delay_ms = delay.as_millis() as u64,
            "Transient fault, backing off"
        );
        tokio::time::sleep(delay).await;

        retries += 1;
        result = with_timeout(send(), timeout).await;
    }
}
