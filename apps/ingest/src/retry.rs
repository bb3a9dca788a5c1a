//! Retry with doubling backoff and a per-attempt timeout.
//!
//! Every outbound call that retries goes through [`RetryPolicy`]. An
//! unanswered request counts as a failed attempt rather than hanging the
//! pipeline.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Wait before the first retry; doubled for each following retry.
    pub base_delay: Duration,
    /// Upper bound for a single attempt. Expiry cancels the attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum AttemptError<E> {
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(E),
}

#[derive(Debug, Error)]
#[error("gave up after {attempts} attempts: {last}")]
pub struct RetryExhausted<E: Debug + Display> {
    pub attempts: u32,
    pub last: AttemptError<E>,
}

impl RetryPolicy {
    /// Delay slept before the given zero-based attempt: 0 for the first,
    /// then `base`, `2 * base`, `4 * base`, ...
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `op` until it succeeds or attempts run out. `op` receives the
    /// zero-based attempt index.
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, RetryExhausted<E>>
    where
        E: Debug + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(label, |_| true, op).await
    }

    /// Like [`run`](Self::run), but an error for which `retryable` returns
    /// false ends the loop at once. Timeouts are always retried.
    pub async fn run_if<T, E, R, F, Fut>(
        &self,
        label: &str,
        retryable: R,
        mut op: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        E: Debug + Display,
        R: Fn(&E) -> bool,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last = AttemptError::Timeout(self.attempt_timeout);

        for attempt in 0..attempts {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                warn!(
                    "{label} attempt {attempt} failed ({last}), retrying after {}ms...",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(self.attempt_timeout, op(attempt)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if !retryable(&e) => {
                    return Err(RetryExhausted {
                        attempts: attempt + 1,
                        last: AttemptError::Failed(e),
                    })
                }
                Ok(Err(e)) => last = AttemptError::Failed(e),
                Err(_) => last = AttemptError::Timeout(self.attempt_timeout),
            }
        }

        Err(RetryExhausted { attempts, last })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(0), Duration::ZERO);
        assert_eq!(policy.delay_before(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_before(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_before(3), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<u32, _> = RetryPolicy::default()
            .run("test", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err("boom")
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_count_as_failed_attempts() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), RetryExhausted<&str>> = RetryPolicy::default()
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(120)).await;
                    Ok(())
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(matches!(err.last, AttemptError::Timeout(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 3 x 30s timeouts + 1s + 2s backoff
        assert_eq!(started.elapsed(), Duration::from_secs(93));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("nope") }
            })
            .await;
        assert!(matches!(result.unwrap_err().last, AttemptError::Failed("nope")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_stops_retrying() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), _> = RetryPolicy::default()
            .run_if(
                "test",
                |e: &u16| *e >= 500,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(400u16) }
                },
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(matches!(err.last, AttemptError::Failed(400)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_uses_every_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run_if(
                "test",
                |e: &u16| *e >= 500,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(503u16) }
                },
            )
            .await;

        assert_eq!(result.unwrap_err().attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
