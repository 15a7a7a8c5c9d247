//! Async timeout helpers and the default durations used across the crate.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Connect, handshake and lookup timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between keepalive pings
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// A connection silent for this long is dropped
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound on the graceful shutdown of a server
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a request waits for its response
pub const MESSAGE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Run `fut` to completion or fail with [`ProtocolError::Timeout`]
pub async fn with_timeout<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = T>,
{
    timeout(duration, fut)
        .await
        .map_err(|_| ProtocolError::Timeout)
}

/// Like [`with_timeout`] for futures that already return a [`Result`]
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
