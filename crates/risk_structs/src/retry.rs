//! Retry with bounded exponential backoff.
//!
//! Only transient storage failures are retried; every other taxonomy
//! variant is returned to the caller on the first attempt.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::CoreError;

/// Backoff configuration for transient storage failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on the delay between retries.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_factor: backoff_factor.max(1.0),
            max_attempts: max_attempts.max(1),
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        let scaled = current.as_secs_f64() * self.backoff_factor;
        Duration::from_secs_f64(scaled).min(self.max_delay)
    }
}

/// Runs `op`, retrying transient failures per `policy`.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted, or immediately for
/// non-transient errors.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut delay = policy.initial_delay;

    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    op = op_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
            }
            Err(err) => {
                debug!(op = op_name, attempt, error = %err, "giving up");
                return Err(err);
            }
        }
    }

    unreachable!("retry loop always returns within max_attempts")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(4), 2.0, 3)
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), "test", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CoreError::TransientStorage("flaky".into()))
            } else {
                Ok(7_u32)
            }
        })
        .await;

        assert_eq!(result.expect("should recover"), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), "test", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::Integrity("digest mismatch".into()))
        })
        .await;

        assert!(matches!(result, Err(CoreError::Integrity(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), "test", || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::TransientStorage("down".into()))
        })
        .await;

        assert!(matches!(result, Err(CoreError::TransientStorage(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = fast_policy();
        let mut delay = policy.initial_delay;
        for _ in 0..10 {
            delay = policy.next_delay(delay);
        }
        assert_eq!(delay, policy.max_delay);
    }
}
