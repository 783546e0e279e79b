//! Caller-side retry around optimistic writes
//!
//! The store never retries on its own: a CAS conflict means the caller's view
//! is stale. These helpers re-run the caller's read-modify-write with
//! exponential backoff until it lands or the policy gives up.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::Backend;
use crate::BackoffPolicy;
use crate::Resource;
use crate::ResourceId;
use crate::Result;
use crate::StoreError;

/// Runs `task` until it succeeds, fails with a non-retryable error, or
/// `policy.max_retries` attempts are used up.
///
/// Each attempt is bounded by `policy.timeout()`; a timed out attempt counts
/// as retryable.
pub async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let mut delay = policy.base_delay();
    let mut attempts = 0;

    while attempts < policy.max_retries {
        attempts += 1;
        match timeout(policy.timeout(), task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) if e.is_retryable() => {
                debug!(attempts, error = %e, "retryable failure");
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(attempts, timeout = ?policy.timeout(), "attempt timed out");
            }
        }

        if attempts < policy.max_retries {
            sleep(with_jitter(delay)).await;
            delay = (delay * 2).min(policy.max_delay());
        }
    }

    warn!("Task failed after {} attempts", attempts);
    Err(StoreError::RetryExhausted { attempts }.into())
}

/// Read-modify-write loop for one resource.
///
/// `mutate` receives the latest committed value (or `None` when the key is
/// absent) and returns the resource to write. The expected version is taken
/// from what was read, so concurrent writers simply cause another round.
pub async fn write_with_retry<B, F, Fut>(
    backend: &B,
    id: &ResourceId,
    mutate: F,
    policy: BackoffPolicy,
) -> Result<Resource>
where
    B: Backend + ?Sized,
    F: Fn(Option<Resource>) -> Fut,
    Fut: Future<Output = Result<Resource>>,
{
    let mutate = &mutate;
    task_with_timeout_and_exponential_backoff(
        move || async move {
            let current = backend.read(id)?;
            let expected_version = current.as_ref().map(|r| r.version.clone()).unwrap_or_default();
            let next = mutate(current).await?;
            backend.write_cas(next, &expected_version)
        },
        policy,
    )
    .await
}

fn with_jitter(delay: Duration) -> Duration {
    let spread = delay.as_millis() as u64 / 2;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}
