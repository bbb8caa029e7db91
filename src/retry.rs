//! Bounded retry with backoff
//!
//! Every retry loop in the archivers goes through here, so each one has a
//! hard attempt ceiling taken from a [`RetryConfig`].

use std::fmt::Display;
use std::future::Future;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::RetryConfig;

/// Run `operation` until it succeeds or `max_attempts` is exhausted.
///
/// The operation receives the zero-based attempt number. The last error is
/// returned once attempts run out.
pub async fn retry<T, E, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    E: Display,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_hook(config, operation, |_, _| async { Ok::<(), E>(()) }).await
}

/// Like [`retry`], running `on_retry` (e.g. a page reload) before each retry.
///
/// A failing hook is logged and does not stop the loop; the next attempt
/// surfaces whatever state it left behind.
pub async fn retry_with_hook<T, E, F, Fut, H, HFut>(
    config: &RetryConfig,
    mut operation: F,
    mut on_retry: H,
) -> Result<T, E>
where
    E: Display,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    H: FnMut(usize, &E) -> HFut,
    HFut: Future<Output = Result<(), E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 >= max_attempts => {
                debug!("Giving up after {} attempts: {}", max_attempts, e);
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_for(attempt);
                debug!(
                    "Attempt {}/{} failed: {}; retrying after {:?}",
                    attempt + 1,
                    max_attempts,
                    e,
                    delay
                );

                if let Err(hook_error) = on_retry(attempt, &e).await {
                    warn!("Retry hook failed: {}", hook_error);
                }

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArchiveError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fixed(attempts: usize) -> RetryConfig {
        RetryConfig::fixed(attempts, Duration::from_millis(1000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_first_success() {
        let calls = AtomicUsize::new(0);
        let result = retry(&fixed(5), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(ArchiveError::NoCapture)
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_propagates_last_error_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), ArchiveError> = retry(&fixed(4), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(ArchiveError::Page(format!("attempt {attempt}"))) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(ArchiveError::Page(message)) => assert_eq!(message, "attempt 3"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_runs_between_attempts_only() {
        let hooks = AtomicUsize::new(0);
        let result: Result<(), ArchiveError> = retry_with_hook(
            &fixed(3),
            |_| async { Err(ArchiveError::NoCapture) },
            |_, _| {
                hooks.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(hooks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_stay_within_bounds() {
        let config = RetryConfig {
            max_attempts: 4,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            multiplier: 2.0,
        };
        let start = tokio::time::Instant::now();
        let _: Result<(), ArchiveError> =
            retry(&config, |_| async { Err(ArchiveError::NoCapture) }).await;

        // 100 + 200 + 300 (clamped)
        assert_eq!(start.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_hook_does_not_stop_retrying() {
        let result = retry_with_hook(
            &fixed(2),
            |attempt| async move {
                if attempt == 0 {
                    Err(ArchiveError::NoCapture)
                } else {
                    Ok("done")
                }
            },
            |_, _| async { Err(ArchiveError::Navigation("reload failed".to_string())) },
        )
        .await;

        assert_eq!(result.unwrap(), "done");
    }
}
