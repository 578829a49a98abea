//! Retry with exponential backoff
//!
//! One uniform policy for every backing store adapter: bounded retries with
//! exponentially growing, capped, jittered delays. Non-retryable errors
//! (configuration, unsupported backing store) short-circuit immediately.

use crate::errors::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff configuration for retrying failed adapter calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent one
    pub initial_delay: Duration,
    /// Upper bound for the per-retry delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        // Jitter to avoid synchronized retry storms.
        let jitter = rand::thread_rng().gen_range(0..=50);
        exp + Duration::from_millis(jitter)
    }
}

/// Run `operation` until it succeeds, the retries are exhausted, or it
/// fails with a non-retryable error. The final error is returned to the
/// caller either way.
pub async fn retry<T, F, Fut>(scope: &str, policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= policy.max_retries => return Err(e),
            Err(e) => {
                let delay = policy.delay_for_attempt(attempt);
                attempt += 1;
                warn!(
                    scope,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::KeyplaneError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let result = retry("test", &fast_policy(3), || async { Ok::<_, KeyplaneError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry("test", &fast_policy(5), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(KeyplaneError::cluster("transient"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_final_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry("test", &fast_policy(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(KeyplaneError::cluster("still down")) }
        })
        .await;
        assert!(result.is_err());
        // Initial attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry("test", &fast_policy(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(KeyplaneError::config("bad setup")) }
        })
        .await;
        assert!(matches!(result, Err(KeyplaneError::Config(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
