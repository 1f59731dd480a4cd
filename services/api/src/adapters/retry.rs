//! services/api/src/adapters/retry.rs
//!
//! Bounded retry for establishing the database connection.
//!
//! Each attempt runs under its own timeout, attempts are separated by a fixed
//! delay, and only transient (`StoreError::Unavailable`) failures are retried.

use mri_core::StoreError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

/// How hard to try before reporting the store as unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the policy is
/// exhausted.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match timeout(policy.attempt_timeout, operation()).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    info!(attempt, "{} succeeded after retrying", what);
                }
                return Ok(value);
            }
            Ok(Err(e)) if !e.is_transient() => return Err(e),
            Ok(Err(e)) => {
                warn!(attempt, max_attempts = attempts, error = %e, "{} failed", what);
                last_error = e.to_string();
            }
            Err(_) => {
                warn!(
                    attempt,
                    max_attempts = attempts,
                    timeout_ms = policy.attempt_timeout.as_millis() as u64,
                    "{} timed out",
                    what
                );
                last_error = format!("timed out after {:?}", policy.attempt_timeout);
            }
        }

        if attempt < attempts {
            sleep(policy.delay).await;
        }
    }

    Err(StoreError::Unavailable(format!(
        "{} failed after {} attempts: {}",
        what, attempts, last_error
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_millis(200),
        }
    }

    /// An operation that fails transiently `failures` times, then succeeds.
    fn flaky(
        failures: u32,
        calls: Arc<AtomicU32>,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<&'static str, StoreError>> + Send>>
    {
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    Err(StoreError::Unavailable(format!("refused #{}", n)))
                } else {
                    Ok("connected")
                }
            })
        }
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_after_two_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry_with_backoff(&fast_policy(3), "connect", flaky(2, calls.clone())).await;
        assert_eq!(result.unwrap(), "connected");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_bound() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry_with_backoff(&fast_policy(3), "connect", flaky(5, calls.clone())).await;
        match result {
            Err(StoreError::Unavailable(message)) => {
                assert!(message.contains("after 3 attempts"));
                assert!(message.contains("refused #3"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), StoreError> = retry_with_backoff(&fast_policy(3), "connect", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Operation("bad credentials".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(StoreError::Operation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hung_attempts_time_out_and_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_millis(20),
        };
        let result: Result<(), StoreError> = retry_with_backoff(&policy, "connect", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        })
        .await;
        assert!(matches!(result, Err(StoreError::Unavailable(m)) if m.contains("timed out")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
