//! Retry loop around transient provider and index failures.

use std::future::Future;

use tracing::warn;

use change_indexer_core::error::Result;
use change_indexer_core::retry::RetryPolicy;

/// Run `op` until it succeeds, fails permanently, or `policy` runs out.
///
/// Only errors whose [`is_transient`](change_indexer_core::IndexerError::is_transient)
/// is true are retried. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, id: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failed = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                failed += 1;
                if !policy.should_retry(failed) {
                    warn!(item = id, what, attempts = failed, error = %e, "giving up after retries");
                    return Err(e);
                }
                let delay = policy.delay_for(failed);
                warn!(
                    item = id,
                    what,
                    attempt = failed,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
