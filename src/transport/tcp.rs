//! # TCP Transport
//!
//! Servers accept TCP connections as session responders; [`connect`] opens a
//! requester connection to a named or literal target and waits for its
//! session to be established.
//!
//! ## Shutdown
//! [`start_server`] stops on CTRL+C. [`start_server_with_shutdown`] stops when
//! its channel yields, closes every connection, and waits at most
//! `server.shutdown_timeout` for them to finish.

use crate::error::{ProtocolError, Result};
use crate::transport::connection::{Connection, Role};
use crate::transport::server::Admission;
use crate::transport::EndpointContext;
use crate::utils::metrics::{global_metrics, Timer};
use crate::utils::timeout::with_timeout_error;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Bind a listener; port 0 picks a free port
pub async fn bind(addr: &str) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    Ok((listener, local))
}

/// Serve on `server.address` until CTRL+C
#[instrument(skip(ctx), fields(address = %ctx.config.server.address))]
pub async fn start_server(ctx: Arc<EndpointContext>) -> Result<()> {
    let (listener, _) = bind(&ctx.config.server.address).await?;

    // Create internal shutdown channel
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    start_server_with_shutdown(ctx, listener, shutdown_rx).await
}

/// Serve on an already bound listener until `shutdown_rx` yields
#[instrument(skip(ctx, listener, shutdown_rx))]
pub async fn start_server_with_shutdown(
    ctx: Arc<EndpointContext>,
    listener: TcpListener,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(address = %local, sid = ctx.local_sid(), "Listening");

    let mut admission = Admission::new(ctx);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                admission.drain().await;
                return Ok(());
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    admission.admit(stream, addr.to_string());
                }
                Err(e) => {
                    global_metrics().connection_error();
                    error!(error = %e, "Error accepting connection");
                }
            }
        }
    }
}

/// Connect to `remote` and establish a session.
///
/// `remote` is resolved through the endpoint's resolver and each address is
/// tried in turn. With `client.auto_reconnect` the whole attempt is repeated
/// up to `client.max_reconnect_attempts` times.
#[instrument(skip(ctx))]
pub async fn connect(ctx: &Arc<EndpointContext>, remote: &str) -> Result<Connection> {
    let _permit = ctx
        .outgoing()
        .acquire()
        .await
        .map_err(|e| ProtocolError::TransportError(e.to_string()))?;
    let _timer = Timer::start("tcp_connect");

    let client = &ctx.config.client;
    let attempts = if client.auto_reconnect {
        client.max_reconnect_attempts.max(1)
    } else {
        1
    };

    let mut last_error = None;
    for attempt in 1..=attempts {
        match try_connect(ctx, remote).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                global_metrics().connection_error();
                warn!(remote, attempt, attempts, error = %e, "Connection attempt failed");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(client.reconnect_delay).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or(ProtocolError::ConnectionClosed))
}

async fn try_connect(ctx: &Arc<EndpointContext>, remote: &str) -> Result<Connection> {
    let client = &ctx.config.client;
    let addrs = ctx.resolver.resolve(remote).await?;

    let mut last_error = None;
    for addr in addrs {
        let stream = match with_timeout_error(
            async { Ok(TcpStream::connect(addr).await?) },
            client.connection_timeout,
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => {
                debug!(peer = %addr, error = %e, "Address unreachable");
                last_error = Some(e);
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let conn = Connection::spawn(stream, addr.to_string(), Role::Requester, ctx.clone());
        return match conn.await_handshake(client.handshake_timeout).await {
            Ok(_) => Ok(conn),
            Err(e) => {
                conn.close().await;
                Err(e)
            }
        };
    }

    Err(last_error.unwrap_or_else(|| ProtocolError::ResolveError(remote.to_string())))
}
