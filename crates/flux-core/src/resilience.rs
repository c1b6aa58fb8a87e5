//! Retry-with-backoff and per-call timeout wrappers.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Whether a failure is worth retrying. Callers pass a closure that
/// inspects their own error type (e.g. an HTTP status code or a
/// network-level failure kind) rather than this crate knowing about
/// every caller's error type.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// `min(base_delay * 2^attempt, max_delay) + uniform_jitter(0, 10%)`.
fn backoff_delay(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    let exp = base_delay.as_millis().saturating_mul(1u128 << attempt.min(20));
    let capped = exp.min(max_delay.as_millis());
    let jitter_ceiling = (capped / 10).max(1);
    let jitter = rand::thread_rng().gen_range(0..=jitter_ceiling);
    Duration::from_millis((capped + jitter) as u64)
}

/// Attempt count starts at 0; total attempts = `max_retries + 1`.
/// Non-retryable errors are rethrown immediately.
pub async fn retry_async<F, Fut, T, E>(
    mut f: F,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                let delay = backoff_delay(attempt, base_delay, max_delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("operation timed out after {seconds}s")]
pub struct TimeoutError {
    pub seconds: f64,
}

/// Minimum accepted seconds is 1.0.
pub async fn with_timeout_async<Fut, T>(fut: Fut, seconds: f64) -> Result<T, TimeoutError>
where
    Fut: Future<Output = T>,
{
    let seconds = seconds.max(1.0);
    match tokio::time::timeout(Duration::from_secs_f64(seconds), fut).await {
        Ok(v) => Ok(v),
        Err(_) => Err(TimeoutError { seconds }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);
    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, Flaky> = retry_async(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Flaky(true))
                } else {
                    Ok(42)
                }
            },
            5,
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, Flaky> = retry_async(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Flaky(false))
            },
            5,
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_fires_on_deadline() {
        let result = with_timeout_async(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                1
            },
            1.0,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn timeout_minimum_is_one_second() {
        let fut = with_timeout_async(async { 7 }, 0.1);
        assert_eq!(fut.await.unwrap(), 7);
    }
}
