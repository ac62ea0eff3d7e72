//! Caller-level retry for operations that fail transiently
//!
//! The state waiter never retries a failed observation. Operations that can
//! collide with another in-flight operation on the same resource (the remote
//! API answers "busy") wrap their call in [`retry_with_timeout`] instead and
//! classify each failure themselves.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0 = first retry)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(32) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Classification of a failed attempt
#[derive(Debug)]
pub enum RetryError<E> {
    /// Worth trying again
    Retryable(E),
    /// Give up immediately
    Fatal(E),
}

/// Run `op` until it succeeds, fails fatally, or `timeout` is used up.
///
/// Unlike [`RetryConfig::max_attempts`], the budget here is time: attempts
/// continue with backoff as long as they can start before the deadline. When
/// the budget runs out the last retryable error is returned.
pub async fn retry_with_timeout<T, E, F, Fut>(
    config: &RetryConfig,
    timeout: Duration,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RetryError<E>>>,
    E: std::fmt::Display,
{
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(RetryError::Fatal(e)) => return Err(e),
            Err(RetryError::Retryable(e)) => {
                let delay = config.delay_for_attempt(attempt);
                if Instant::now() + delay >= deadline {
                    tracing::warn!(attempt, error = %e, "Retry budget exhausted");
                    return Err(e);
                }
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying operation"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(10)); // capped at max
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, CloudError> =
            retry_with_timeout(&RetryConfig::default(), Duration::from_secs(60), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(RetryError::Retryable(CloudError::LockError("busy".into())))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), CloudError> =
            retry_with_timeout(&RetryConfig::default(), Duration::from_secs(60), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RetryError::Fatal(CloudError::StateError("bad".into()))) }
            })
            .await;

        assert!(matches!(result, Err(CloudError::StateError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result: Result<(), CloudError> =
            retry_with_timeout(&RetryConfig::default(), Duration::from_secs(10), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(RetryError::Retryable(CloudError::LockError(format!("busy {n}")))) }
            })
            .await;

        // attempts at 0s, 1s, 3s and 7s; the next one would start at 15s
        match result {
            Err(CloudError::LockError(msg)) => assert_eq!(msg, "busy 3"),
            other => panic!("expected LockError, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
