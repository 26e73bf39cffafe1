//! Reusable retry policy.
//!
//! One policy type serves both retry shapes in the engine: in-process retries
//! around gateway calls (exponential backoff, sub-second base) and the
//! day-scale payment schedule (fixed interval, persisted between attempts as
//! a `next_retry_date` on the payment record).

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::Result;

/// A bounded retry schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Double the delay after each failed attempt.
    pub exponential: bool,
    /// Add 0-25% random jitter to each delay.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Exponential backoff with jitter, capped at 30 seconds.
    #[must_use]
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(30),
            exponential: true,
            jitter: true,
        }
    }

    /// Fixed interval between attempts, no jitter.
    #[must_use]
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: interval,
            max_delay: interval,
            exponential: false,
            jitter: false,
        }
    }

    /// Default shape for gateway calls: an initial call plus three retries,
    /// 500ms base delay.
    #[must_use]
    pub fn gateway_default() -> Self {
        Self::exponential(4, Duration::from_millis(500))
    }

    /// True once `attempts_made` attempts have been used up.
    #[must_use]
    pub fn is_exhausted(&self, attempts_made: u32) -> bool {
        attempts_made >= self.max_attempts
    }

    /// Delay before the retry following `attempt` (zero-based retry index).
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let delay_ms = if self.exponential {
            base_ms.saturating_mul(2_u64.saturating_pow(attempt))
        } else {
            base_ms
        };
        let delay_ms = delay_ms.min(max_ms);

        // Add jitter (0-25% of delay)
        let jitter = if self.jitter && delay_ms > 0 {
            fastrand::u64(0..=delay_ms / 4)
        } else {
            0
        };
        Duration::from_millis(delay_ms.saturating_add(jitter))
    }

    /// When the next attempt should run, or `None` once the schedule is
    /// spent. `attempts_made` counts attempts already recorded, so it is 1
    /// after the first failure.
    #[must_use]
    pub fn next_attempt_at(&self, now: DateTime<Utc>, attempts_made: u32) -> Option<DateTime<Utc>> {
        if self.is_exhausted(attempts_made) {
            return None;
        }
        let delay = self.backoff_delay(attempts_made.saturating_sub(1));
        Some(now + chrono::Duration::milliseconds(delay.as_millis() as i64))
    }

    /// Run `operation_fn`, retrying transient failures per this policy.
    ///
    /// Only errors whose `is_retryable()` is true are retried; the final
    /// error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, operation_fn: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts: u32 = 0;

        loop {
            match operation_fn().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempts += 1;
                    if !e.is_retryable() || self.is_exhausted(attempts) {
                        return Err(e);
                    }

                    let delay = self.backoff_delay(attempts - 1);
                    tracing::warn!(
                        target: "seatwise::retry",
                        operation = operation,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BillingError;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_backoff_ranges() {
        let policy = RetryPolicy::exponential(4, Duration::from_millis(500));

        // Ranges account for jitter
        let delay0 = policy.backoff_delay(0);
        assert!(delay0.as_millis() >= 500 && delay0.as_millis() <= 625);

        let delay1 = policy.backoff_delay(1);
        assert!(delay1.as_millis() >= 1000 && delay1.as_millis() <= 1250);

        let delay2 = policy.backoff_delay(2);
        assert!(delay2.as_millis() >= 2000 && delay2.as_millis() <= 2500);

        // Cap holds for large attempt numbers
        let delay_high = policy.backoff_delay(20);
        assert!(delay_high.as_millis() <= 30_000 + 30_000 / 4);
    }

    #[test]
    fn test_fixed_delay_is_deterministic() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(86_400));
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(86_400));
        assert_eq!(policy.backoff_delay(5), Duration::from_secs(86_400));
    }

    #[test]
    fn test_exhaustion_boundary() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
        assert!(!policy.is_exhausted(0));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }

    #[test]
    fn test_next_attempt_at_schedule() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(86_400));
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        let after_first = policy.next_attempt_at(now, 1).unwrap();
        assert_eq!(after_first, now + chrono::Duration::days(1));

        let after_second = policy.next_attempt_at(now, 2).unwrap();
        assert_eq!(after_second, now + chrono::Duration::days(1));

        assert!(policy.next_attempt_at(now, 3).is_none());
    }

    #[tokio::test]
    async fn test_run_retries_transient_errors() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            exponential: true,
            jitter: false,
        };
        let calls = AtomicU32::new(0);

        let result: Result<u32> = policy
            .run("flaky_op", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(BillingError::store_unavailable("flaky_op", "transient"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_caller_errors() {
        let policy = RetryPolicy::exponential(4, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .run("bad_request", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BillingError::invalid_argument("nope"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            exponential: false,
            jitter: false,
        };
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .run("always_down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BillingError::store_unavailable("always_down", "down"))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.error_code(), "store-unavailable");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
