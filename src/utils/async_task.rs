use std::time::Duration;

use tokio::time::sleep;
use tokio::time::timeout;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;
use crate::StorageError;

/// Run `task` until it succeeds, fails with an error `retryable` rejects, or the
/// policy's attempt budget (`max_retries`) is spent. Delays double after every failed attempt and
/// are capped at `max_delay_ms`; `max_retries == 0` retries forever.
///
/// A timed out attempt is not retried: it may still have been applied.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P, C>(
    task: F,
    policy: BackoffPolicy,
    retryable: C,
) -> Result<P>
where
    F: Fn() -> T,
    T: std::future::Future<Output = Result<P>>,
    C: Fn(&Error) -> bool,
{
    let timeout_duration = Duration::from_millis(policy.timeout_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);
    let mut delay = Duration::from_millis(policy.base_delay_ms);
    let mut retries = 0;

    loop {
        let error = match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(error)) => error,
            Err(elapsed) => {
                warn!("task timed out after {:?}: {}", timeout_duration, elapsed);
                return Err(StorageError::IoError(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    elapsed,
                ))
                .into());
            }
        };

        if !retryable(&error) {
            return Err(error);
        }

        retries += 1;
        if policy.max_retries != 0 && retries >= policy.max_retries {
            warn!("task failed after {} attempts: {:?}", retries, error);
            return Err(error);
        }

        warn!("attempt {} failed with error: {:?}, retrying in {:?}", retries, error, delay);
        sleep(delay).await;
        delay = (delay * 2).min(max_delay);
    }
}
