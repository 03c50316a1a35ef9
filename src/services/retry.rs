//! Exponential backoff retry around a single typed unit of work.
//!
//! Only errors that classify themselves as transient are retried. The policy
//! is bounded both by attempt count and by a wall-clock ceiling; the ceiling
//! is checked before every attempt and before every sleep.

use std::{future::Future, time::Duration};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, warn};

/// Largest exponent applied to `base_delay`.
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Errors the retry controller can classify.
pub trait RetryableError: std::error::Error {
    /// True for the fixed set of transient infrastructure failures.
    fn is_transient(&self) -> bool;

    /// The failure surfaced when the time ceiling is hit before any attempt
    /// produced an error of its own.
    fn timed_out(limit: Duration) -> Self;
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts; `None` is unbounded (time-limited only).
    pub max_retries: Option<u32>,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Hard wall-clock ceiling across all attempts.
    pub max_total_time: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Some(20),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_total_time: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows `attempt` (zero-based).
    ///
    /// `min(base_delay * 2^min(attempt, 10), max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_BACKOFF_EXPONENT);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Execute `f` until it succeeds, fails with a non-transient error, or
    /// the attempt/time budget runs out. The last observed error is returned
    /// unchanged when the budget is exhausted.
    pub async fn run<F, Fut, T, E>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        let mut last_error: Option<E> = None;

        loop {
            if started.elapsed() >= self.max_total_time {
                error!(
                    operation,
                    attempt,
                    max_total_time = ?self.max_total_time,
                    "retry time budget exhausted"
                );
                return Err(last_error.unwrap_or_else(|| E::timed_out(self.max_total_time)));
            }

            if let Some(max) = self.max_retries {
                if attempt >= max {
                    error!(operation, attempt, max_retries = max, "retry attempts exhausted");
                    return Err(last_error.unwrap_or_else(|| E::timed_out(self.max_total_time)));
                }
            }

            let err = match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempts = attempt + 1, "succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            let elapsed = started.elapsed();
            if elapsed + delay >= self.max_total_time {
                error!(
                    operation,
                    error = %err,
                    elapsed = ?elapsed,
                    delay = ?delay,
                    "next retry would exceed time budget"
                );
                return Err(err);
            }

            warn!(
                operation,
                attempt = attempt + 1,
                max_retries = ?self.max_retries,
                delay = ?delay,
                elapsed = ?elapsed,
                error = %err,
                "transient failure, retrying"
            );
            sleep(delay).await;
            attempt += 1;
            last_error = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq)]
    enum TestError {
        #[error("deadlock (attempt {0})")]
        Deadlock(u32),
        #[error("syntax error")]
        Syntax,
        #[error("timed out")]
        TimedOut,
    }

    impl RetryableError for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Deadlock(_))
        }

        fn timed_out(_limit: Duration) -> Self {
            TestError::TimedOut
        }
    }

    fn policy(max_retries: Option<u32>, max_total_secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            max_total_time: Duration::from_secs(max_total_secs),
        }
    }

    #[test]
    fn delay_doubles_then_caps() {
        let policy = policy(None, 3600);
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn exponent_is_capped_at_ten() {
        let policy = RetryPolicy {
            max_retries: None,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_secs(3600),
            max_total_time: Duration::from_secs(3600),
        };
        assert_eq!(policy.delay_for(10), Duration::from_millis(1024));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1024));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(1024));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = policy(Some(5), 3600)
            .run("find_by_key", move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(TestError::Deadlock(n))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_attempts_reraise_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = policy(Some(3), 3600)
            .run("insert", move || {
                let counter = counter.clone();
                async move { Err(TestError::Deadlock(counter.fetch_add(1, Ordering::SeqCst))) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result, Err(TestError::Deadlock(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_attempts_stop_at_time_ceiling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();

        let result: Result<(), _> = policy(None, 10)
            .run("update", move || {
                let counter = counter.clone();
                async move { Err(TestError::Deadlock(counter.fetch_add(1, Ordering::SeqCst))) }
            })
            .await;

        // Sleeps of 1s, 2s, 4s; the next 4s sleep would cross the 10s ceiling.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result, Err(TestError::Deadlock(3)));
        assert!(started.elapsed() <= Duration::from_secs(10));
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();

        let result: Result<(), _> = policy(None, 3600)
            .run("insert", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Syntax)
                }
            })
            .await;

        assert_eq!(result, Err(TestError::Syntax));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_time_budget_fails_with_timeout() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = policy(None, 0)
            .run("insert", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert_eq!(result, Err(TestError::TimedOut));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
