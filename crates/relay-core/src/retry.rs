//! C2: exponential-backoff retry wrapper (§4.2).

use std::future::Future;
use std::time::Duration;

/// Repeatedly invoke `op` until it succeeds or `max_attempts` is exhausted.
///
/// On failure with attempts remaining, sleeps `delay * backoff^(attempt - 1)`
/// before retrying. Every failure class is retried identically — there is no
/// predicate distinguishing retriable from non-retriable errors; callers that
/// need a predicate filter before calling `retry`, and callers that need
/// jitter add it around `op` themselves (§4.2).
pub async fn retry<F, Fut, T, E>(
    mut op: F,
    max_attempts: u32,
    delay: Duration,
    backoff: f64,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_attempts {
                    return Err(err);
                }
                let sleep_for = delay.mul_f64(backoff.powi(attempt as i32 - 1));
                tracing::warn!(attempt, max_attempts, ?sleep_for, "retrying after failure");
                tokio::time::sleep(sleep_for).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            },
            3,
            Duration::from_millis(1),
            2.0,
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(7)
                }
            },
            5,
            Duration::from_millis(1),
            1.0,
        )
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn propagates_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("always fails")
            },
            3,
            Duration::from_millis(1),
            2.0,
        )
        .await;
        assert_eq!(result, Err("always fails"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
