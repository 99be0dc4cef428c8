//! Shared retry/backoff helper
//!
//! Grounded on the teacher workspace's LLM backend retry loop: one retry
//! on a transient failure, exponential backoff starting at a fixed base,
//! a hard deadline that stops further attempts outright (spec §4.4:
//! "deadline stops attempts").

use std::time::{Duration, Instant};

use crate::ClientError;

/// `250ms * 2^attempt` backoff, attempt 0 being the first retry.
pub fn backoff_for_attempt(attempt: u32) -> Duration {
    Duration::from_millis(250 * 2u64.saturating_pow(attempt))
}

/// Run `op` once; on a transient error, sleep the backoff for `attempt`
/// and retry exactly once more. `deadline` bounds the whole call
/// including the retry — if it has already elapsed, no retry is
/// attempted and the first error is returned as-is.
pub async fn with_one_retry<T, F, Fut>(deadline: Instant, mut op: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ClientError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(err) if err.is_transient() && Instant::now() < deadline => {
            tokio::time::sleep(backoff_for_attempt(0)).await;
            op().await
        }
        Err(err) => Err(err),
    }
}
