//! Automatic retry with exponential backoff.
//!
//! [`RetryExecutor`] wraps any async fallible call. Errors classified as
//! [`ErrorClass::Client`] abort immediately; transient ones are retried
//! after `base_delay * 2^(attempt-1)` until the attempt budget runs out,
//! at which point the last error is returned.
//!
//! The executor holds only its configuration, so one instance can be
//! cloned or shared across any number of concurrent callers.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

use aps_core::{Classify, ErrorClass, RetryConfig};
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// What happened during one [`RetryExecutor::execute_with_report`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryReport {
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Time spent sleeping between attempts
    pub total_delay: Duration,
}

/// Stateless retrying executor
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create executor
    #[inline]
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the attempt following `attempt` (1-indexed)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.config.base_delay().as_secs_f64() * 2f64.powi(exponent);
        let capped = base.min(self.config.max_delay().as_secs_f64());

        if self.config.jitter {
            // Equal jitter: keep at least half the computed delay.
            let factor = rand::rng().random_range(0.5..=1.0);
            Duration::from_secs_f64(capped * factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }

    /// Run `operation` until it succeeds, fails with a client error, or
    /// the attempt budget is spent
    ///
    /// # Errors
    /// Returns the client error as-is, or the last transient error once
    /// `max_retries` attempts have failed.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        self.execute_with_report(operation).await.0
    }

    /// Like [`RetryExecutor::execute`], also reporting attempts and delay
    pub async fn execute_with_report<T, E, F, Fut>(
        &self,
        mut operation: F,
    ) -> (Result<T, E>, RetryReport)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let max_attempts = self.config.max_retries.max(1);
        let mut report = RetryReport::default();

        loop {
            report.attempts += 1;
            let error = match operation().await {
                Ok(value) => {
                    if report.attempts > 1 {
                        tracing::debug!(attempts = report.attempts, "operation recovered after retry");
                    }
                    return (Ok(value), report);
                }
                Err(error) => error,
            };

            if error.class() == ErrorClass::Client {
                tracing::debug!(attempt = report.attempts, %error, "client error, not retrying");
                return (Err(error), report);
            }

            if report.attempts >= max_attempts {
                tracing::warn!(attempts = report.attempts, %error, "retries exhausted");
                return (Err(error), report);
            }

            let delay = self.delay_for_attempt(report.attempts);
            tracing::warn!(
                attempt = report.attempts,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                %error,
                "transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
            report.total_delay += delay;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aps_core::ServiceError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn executor() -> RetryExecutor {
        RetryExecutor::new(RetryConfig::default())
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let exec = executor();
        assert_eq!(exec.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(exec.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(exec.delay_for_attempt(3), Duration::from_millis(4000));
    }

    #[test]
    fn delay_capped_at_max() {
        let exec = executor();
        assert_eq!(exec.delay_for_attempt(20), Duration::from_secs(30));
    }

    #[test]
    fn jitter_keeps_delay_within_half_to_full() {
        let exec = RetryExecutor::new(RetryConfig::default().with_jitter(true));
        for _ in 0..50 {
            let d = exec.delay_for_attempt(2);
            assert!(d >= Duration::from_millis(1000) && d <= Duration::from_millis(2000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_uses_every_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let result: Result<(), ServiceError> = executor()
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::transient("connection reset"))
                }
            })
            .await;

        assert!(matches!(result, Err(ServiceError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_one_failure() {
        let calls = Arc::new(AtomicU32::new(0));

        let (result, report) = executor()
            .execute_with_report(|| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ServiceError::from_status(503, "unavailable"))
                    } else {
                        Ok("image-url")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "image-url");
        assert_eq!(report.attempts, 2);
        assert_eq!(report.total_delay, Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn client_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), ServiceError> = executor()
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ServiceError::from_status(422, "prompt rejected"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_still_attempts_once() {
        let exec = RetryExecutor::new(RetryConfig::with_retries(0));
        let (result, report) = exec
            .execute_with_report(|| async { Err::<(), _>(ServiceError::transient("down")) })
            .await;
        assert!(result.is_err());
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shared_across_tasks() {
        let exec = Arc::new(RetryExecutor::new(
            RetryConfig::default().with_base_delay(Duration::from_millis(1)),
        ));
        let mut handles = Vec::new();
        for i in 0..16u32 {
            let exec = Arc::clone(&exec);
            handles.push(tokio::spawn(async move {
                exec.execute(|| async move { Ok::<_, ServiceError>(i * 2) }).await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap().unwrap(), i as u32 * 2);
        }
    }
}
