//! Deadline enforcement for fetches and engine loads.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// The wrapped operation did not finish before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline of {after_ms} ms exceeded")]
pub struct DeadlineExceeded {
    pub after_ms: u64,
}

/// Run `fut` with a deadline. The future is dropped (cancelled) on expiry.
pub async fn with_deadline<F: Future>(
    deadline: Duration,
    fut: F,
) -> Result<F::Output, DeadlineExceeded> {
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| DeadlineExceeded {
            after_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        })
}
