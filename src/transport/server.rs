//! Bookkeeping shared by the TCP and Unix socket accept loops.

use crate::error::constants;
use crate::transport::connection::{Connection, Role};
use crate::transport::EndpointContext;
use crate::utils::metrics::global_metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Semaphore;
use tracing::{info, warn};

const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Admits connections up to `max_connections` and drains them on shutdown
pub(crate) struct Admission {
    ctx: Arc<EndpointContext>,
    permits: Arc<Semaphore>,
    max: usize,
    accepted: Vec<Connection>,
}

impl Admission {
    pub(crate) fn new(ctx: Arc<EndpointContext>) -> Self {
        let max = ctx.config.server.max_connections.max(1);
        Self {
            ctx,
            permits: Arc::new(Semaphore::new(max)),
            max,
            accepted: Vec::new(),
        }
    }

    /// Spawn a responder for `io`, or drop it when the server is full
    pub(crate) fn admit<S>(&mut self, io: S, peer: String) -> Option<Connection>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            global_metrics().connection_error();
            warn!(peer = %peer, max = self.max, "{}", constants::ERR_MAX_CONNECTIONS);
            return None;
        };

        self.accepted.retain(|conn| !conn.is_closed());

        let conn = Connection::spawn(io, peer, Role::Responder, self.ctx.clone());
        let watcher = conn.clone();
        tokio::spawn(async move {
            watcher.closed().await;
            drop(permit);
        });

        self.accepted.push(conn.clone());
        Some(conn)
    }

    /// Connections currently holding a slot
    pub(crate) fn active(&self) -> usize {
        self.max - self.permits.available_permits()
    }

    /// Close every connection and wait for their slots to be released
    pub(crate) async fn drain(self) {
        // One budget covers closing and releasing slots
        let deadline = tokio::time::Instant::now() + self.ctx.config.server.shutdown_timeout;
        info!(connections = self.active(), "Shutting down server. Waiting for connections to close...");

        let closing = futures::future::join_all(self.accepted.iter().map(Connection::close));
        if tokio::time::timeout_at(deadline, closing).await.is_err() {
            warn!("Shutdown timeout reached, forcing exit");
            return;
        }

        while self.active() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(connections = self.active(), "Shutdown timeout reached, forcing exit");
                return;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }

        info!("All connections closed, shutting down");
    }
}
