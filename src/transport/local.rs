//! # Local IPC Transport
//!
//! The TCP server and client pair over Unix domain sockets. Connections run
//! the same pipeline as TCP ones; only the socket differs.
//!
//! The socket file is removed before binding and again after shutdown.

use futures::TryFutureExt;
use std::path::Path;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{error, info, instrument};

use crate::error::Result;
use crate::transport::connection::{Connection, Role};
use crate::transport::server::Admission;
use crate::transport::EndpointContext;
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::with_timeout_error;

/// Start a Unix domain socket server that stops on CTRL+C
#[instrument(skip(ctx, path), fields(socket_path = %path.as_ref().display()))]
pub async fn start_server<P: AsRef<Path>>(ctx: Arc<EndpointContext>, path: P) -> Result<()> {
    // Create internal shutdown channel
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    start_server_with_shutdown(ctx, path, shutdown_rx).await
}

/// Start a Unix domain socket server with an external shutdown channel
#[instrument(skip(ctx, path, shutdown_rx), fields(socket_path = %path.as_ref().display()))]
pub async fn start_server_with_shutdown<P: AsRef<Path>>(
    ctx: Arc<EndpointContext>,
    path: P,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        tokio::fs::remove_file(path).await.ok();
    }

    let listener = UnixListener::bind(path)?;
    info!(path = %path.display(), "Listening on unix socket");

    let mut admission = Admission::new(ctx);
    let label = path.display().to_string();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                admission.drain().await;

                if path.exists() {
                    if let Err(e) = tokio::fs::remove_file(path).await {
                        error!(error = %e, path = %label, "Failed to remove socket file");
                    } else {
                        info!(path = %label, "Removed socket file");
                    }
                }

                return Ok(());
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    admission.admit(stream, label.clone());
                }
                Err(e) => {
                    global_metrics().connection_error();
                    error!(error = %e, "Error accepting connection");
                }
            }
        }
    }
}

/// Connect to a Unix domain socket and establish a session
#[instrument(skip(ctx, path), fields(socket_path = %path.as_ref().display()))]
pub async fn connect<P: AsRef<Path>>(ctx: &Arc<EndpointContext>, path: P) -> Result<Connection> {
    let path = path.as_ref();
    let client = &ctx.config.client;

    let stream = with_timeout_error(
        UnixStream::connect(path).err_into(),
        client.connection_timeout,
    )
    .await?;

    let conn = Connection::spawn(
        stream,
        path.display().to_string(),
        Role::Requester,
        ctx.clone(),
    );

    match conn.await_handshake(client.handshake_timeout).await {
        Ok(_) => Ok(conn),
        Err(e) => {
            conn.close().await;
            Err(e)
        }
    }
}
