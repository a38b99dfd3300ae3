//! Timeout and cancellation guard for blocking external calls.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::{CodeAidError, Result};

/// Await `fut` until it finishes, `limit` elapses, or `cancel` fires.
///
/// On timeout or cancellation the future is dropped, which aborts in-flight
/// HTTP requests and kills child processes spawned with `kill_on_drop`.
pub async fn bounded<T, F>(
    operation: &str,
    limit: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CodeAidError::Cancelled {
            operation: operation.to_string(),
        }),
        outcome = tokio::time::timeout(limit, fut) => match outcome {
            Ok(result) => result,
            Err(_elapsed) => Err(CodeAidError::Timeout {
                operation: operation.to_string(),
                limit_secs: limit.as_secs(),
            }),
        },
    }
}
