//! Retry with exponential backoff for transient failures

use std::future::Future;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::Error;

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy runs out of attempts.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let base = policy.backoff_for(attempt);
                // Up to 10% jitter so clients that failed together do not retry together.
                let jitter_cap = (base.as_millis() as u64 / 10).max(1);
                let jitter = rand::thread_rng().gen_range(0..jitter_cap);
                let delay = base + std::time::Duration::from_millis(jitter);
                warn!(
                    "{} failed on attempt {}/{}: {}; retrying in {:?}",
                    label, attempt, max_attempts, e, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!("{} failed after {} attempt(s): {}", label, attempt, e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn unavailable() -> Error {
        Error::Api(ApiError {
            status: 503,
            code: None,
            message: "unavailable".into(),
        })
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_factor: 2.0,
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(&fast_policy(3), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(unavailable())
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = with_backoff(&fast_policy(2), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(unavailable())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = with_backoff(&fast_policy(5), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::validation("bad input"))
        })
        .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
