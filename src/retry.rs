//! Retry with exponential backoff for transient upstream failures.
//!
//! Errors are classified by message: anything mentioning `503`,
//! `unavailable`, `overloaded` or `rate limit` (case-insensitive) is
//! transient and retried; everything else fails immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

const TRANSIENT_MARKERS: &[&str] = &["503", "unavailable", "overloaded", "rate limit"];

/// Whether an error message describes a failure expected to clear on retry.
pub fn is_transient_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Whether an error is transient, judged by its display message.
pub fn is_transient<E: Display + ?Sized>(err: &E) -> bool {
    is_transient_message(&err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first call. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1_000),
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_multiplier: u32) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_multiplier,
        }
    }

    /// Delay slept before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.saturating_pow(retry);
        self.initial_delay.saturating_mul(factor)
    }
}

/// Suspends the current task between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Run `operation` until it succeeds, fails permanently, or the attempt
/// budget runs out. Returns the last observed error on failure.
pub async fn invoke_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut operation: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_transient(&err) || attempt >= max_attempts {
                    return Err(err);
                }

                let delay = policy.delay_for(attempt - 1);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient upstream failure; backing off"
                );
                sleeper.sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, delay: Duration) {
            self.delays.lock().unwrap().push(delay);
        }
    }

    #[test]
    fn classifies_transient_markers() {
        assert!(is_transient_message("HTTP 503 Service Unavailable"));
        assert!(is_transient_message("The model is OVERLOADED. Please try again later."));
        assert!(is_transient_message("rate limited (Remote), retry after 60s"));
        assert!(is_transient_message("UNAVAILABLE"));
        assert!(!is_transient_message("invalid api key"));
        assert!(!is_transient_message("HTTP 400: Bad Request"));
    }

    #[test]
    fn delay_schedule_is_geometric() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4_000));
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<&str, String> =
            invoke_with_retry(&RetryPolicy::default(), &sleeper, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("HTTP 503: model overloaded".to_string())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let delays = sleeper.delays.lock().unwrap().clone();
        assert_eq!(
            delays,
            vec![Duration::from_millis(1_000), Duration::from_millis(2_000)]
        );
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), String> =
            invoke_with_retry(&RetryPolicy::default(), &sleeper, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("invalid api key".to_string()) }
            })
            .await;

        assert_eq!(result, Err("invalid api key".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), String> =
            invoke_with_retry(&RetryPolicy::default(), &sleeper, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("overloaded #{n}")) }
            })
            .await;

        assert_eq!(result, Err("overloaded #2".to_string()));
        assert_eq!(sleeper.delays.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy::new(0, Duration::from_millis(5), 2);

        let result: Result<(), String> =
            invoke_with_retry(&policy, &sleeper, || async { Err("503".to_string()) }).await;

        assert!(result.is_err());
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_sleeper_waits_on_the_timer() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_secs(4)).await;
        assert!(start.elapsed() >= Duration::from_secs(4));
    }
}
