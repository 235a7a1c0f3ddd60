use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Zero behaves as one.
    pub max_attempts: u32,
    /// Pause between two consecutive attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(1))
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` is spent.
///
/// `op` receives the 1-based attempt number. The last error is returned
/// unchanged once attempts are exhausted; no delay follows the final attempt.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, label: &str, op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(policy, label, |_| true, op).await
}

/// Like [`retry`], but an error for which `should_retry` is false is
/// returned at once.
pub async fn retry_if<T, E, F, Fut, P>(
    policy: RetryPolicy,
    label: &str,
    should_retry: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max || !should_retry(&e) => return Err(e),
            Err(e) => {
                warn!(
                    operation = %label,
                    attempt,
                    max,
                    error = %e,
                    retry_after_ms = policy.backoff.as_millis() as u64,
                    "attempt failed, retrying"
                );
                sleep(policy.backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<(), String> = retry(RetryPolicy::default(), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("boom".to_string()) }
        })
        .await;

        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two pauses between three attempts.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<(), String> = retry_if(
            RetryPolicy::default(),
            "test",
            |e: &String| e.starts_with("transient"),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent: bad input".to_string()) }
            },
        )
        .await;

        assert_eq!(result.unwrap_err(), "permanent: bad input");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_success() {
        let result: Result<u32, String> = retry(RetryPolicy::default(), "test", |attempt| async move {
            if attempt < 2 {
                Err(format!("attempt {attempt} failed"))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), &str> = retry(RetryPolicy::fixed(0, Duration::from_secs(1)), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("no") }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
