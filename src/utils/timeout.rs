//! Timeout defaults and deadline-bound async helpers.
//!
//! Every suspension point in a session races a deadline derived from the
//! session's budget. [`within`] is the one place that race is expressed, so
//! an elapsed deadline always surfaces as [`ProbeError::Timeout`] naming the
//! operation that stalled.

use crate::error::{ProbeError, Result};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::time::Instant;

/// Overall bound for one probe
pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum timeout any phase receives while budget remains
pub const DEFAULT_PHASE_FLOOR: Duration = Duration::from_millis(250);

/// Per-phase cap during the handshake
pub const DEFAULT_PHASE_CAP: Duration = Duration::from_secs(5);

/// Per-exchange cap once the session is Ready
pub const DEFAULT_REQUEST_CAP: Duration = Duration::from_secs(8);

/// Run an I/O future against an absolute deadline.
pub async fn within<F, T>(deadline: Instant, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result.map_err(ProbeError::from),
        Err(_) => Err(ProbeError::Timeout(operation.to_string())),
    }
}

/// Like [`within`] for futures that already yield a crate `Result`.
pub async fn within_result<F, T>(deadline: Instant, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(operation.to_string())),
    }
}
