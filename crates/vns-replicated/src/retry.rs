//! Bounded retry with exponential backoff around store calls.

use crate::config::RetryPolicy;
use crate::error::{ReplicatedError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use vns_store::StoreError;

/// Run `op`, retrying only on transient connection loss.
///
/// Session expiry and every other store error are returned immediately.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = vns_store::Result<T>>,
{
    let mut attempt = 0u32;
    let mut backoff_ms = policy.initial_backoff_ms;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                attempt += 1;
                if attempt > policy.max_retries {
                    return Err(ReplicatedError::StoreConnection {
                        operation,
                        attempts: attempt,
                    });
                }
                debug!(operation, attempt, backoff_ms, "connection lost, retrying");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(policy.max_backoff_ms);
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Delete a node, treating "already gone" as success.
pub(crate) async fn delete_idempotent<D>(
    dir: &D,
    policy: &RetryPolicy,
    path: &str,
) -> Result<()>
where
    D: vns_store::Directory + ?Sized,
{
    match with_retry(policy, "delete", move || dir.delete(path, None)).await {
        Ok(()) | Err(ReplicatedError::Store(StoreError::NoNode(_))) => Ok(()),
        Err(e) => Err(e),
    }
}
