use log::warn;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::{EmbeddingError, GenerationError, SearchError, VectorStoreError};

/// Errors that may succeed when the same request is sent again
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::Service(_) | EmbeddingError::Timeout(_))
    }
}

impl Retryable for GenerationError {
    fn is_retryable(&self) -> bool {
        // A blocked prompt is blocked again when resent unchanged
        matches!(self, GenerationError::Service(_) | GenerationError::Timeout(_))
    }
}

impl Retryable for SearchError {
    fn is_retryable(&self) -> bool {
        matches!(self, SearchError::Service(_) | SearchError::Timeout(_))
    }
}

impl Retryable for VectorStoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, VectorStoreError::Unavailable(_))
    }
}

/// Bounded exponential backoff for calls to external services
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A policy that never retries and never sleeps
    pub fn none() -> Self {
        RetryPolicy::new(1, Duration::ZERO)
    }

    /// Delay before the given retry (1-based), doubling up to 32x the base delay
    pub fn backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.saturating_sub(1).min(5) as u32;
        self.base_delay * (1 << capped)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, self.max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(20), Duration::from_millis(3200));
    }

    #[tokio::test]
    async fn test_retries_service_errors_until_success() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let result: Result<&str, GenerationError> = policy
            .run("generate", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(GenerationError::Service("503".into()))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_blocked_is_not_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(5, Duration::ZERO);

        let result: Result<(), GenerationError> = policy
            .run("generate", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GenerationError::Blocked {
                    reason: "SAFETY".into(),
                })
            })
            .await;

        assert!(matches!(result, Err(GenerationError::Blocked { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(2, Duration::ZERO);

        let result: Result<(), EmbeddingError> = policy
            .run("embed", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EmbeddingError::Timeout(Duration::from_secs(1)))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
