//! # Transport
//!
//! Tokio connections carrying envelopes over TCP or Unix domain sockets.
//!
//! Every socket, whichever way it was opened, is handed to
//! [`connection::Connection::spawn`] which runs the same pipeline: session
//! handshake, response correlation, built-in messages, then the dispatcher.
//! State shared by all connections of one endpoint lives in
//! [`EndpointContext`].

use crate::config::NetworkConfig;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::instance::{InstanceIdentity, InstanceType, Sid};
use crate::resolver::Resolver;
use crate::stream::StreamStore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub mod connection;
#[cfg(unix)]
pub mod local;
mod server;
pub mod store;
pub mod tcp;

pub use connection::{Connection, Role};
pub use store::ConnectionStore;

/// Shared state of one endpoint
pub struct EndpointContext {
    pub identity: InstanceIdentity,
    pub config: NetworkConfig,
    pub dispatcher: Dispatcher,
    pub streams: StreamStore,
    pub connections: ConnectionStore,
    pub resolver: Resolver,
    local_sid: AtomicU32,
    outgoing: Semaphore,
}

impl EndpointContext {
    /// Servers draw their sid here; other instances learn theirs from the
    /// first completed handshake.
    pub fn new(identity: InstanceIdentity, config: NetworkConfig) -> Arc<Self> {
        let local_sid = match identity.instance {
            InstanceType::Server => Sid::generate(identity.instance, identity.flavor).value(),
            _ => 0,
        };

        Arc::new(Self {
            dispatcher: Dispatcher::new(),
            streams: StreamStore::new(),
            connections: ConnectionStore::new(),
            resolver: Resolver::new(config.resolver.clone()),
            outgoing: Semaphore::new(config.client.outgoing_concurrency.max(1)),
            local_sid: AtomicU32::new(local_sid),
            identity,
            config,
        })
    }

    /// Context for the identity described by the configuration
    pub fn from_config(config: NetworkConfig) -> Arc<Self> {
        Self::new(config.instance.identity(), config)
    }

    /// Our sid, 0 until one is known
    pub fn local_sid(&self) -> u32 {
        self.local_sid.load(Ordering::Acquire)
    }

    /// Record the sid granted by the first server we reach
    pub(crate) fn learn_local_sid(&self, sid: u32) {
        let _ = self
            .local_sid
            .compare_exchange(0, sid, Ordering::AcqRel, Ordering::Acquire);
    }

    pub(crate) fn outgoing(&self) -> &Semaphore {
        &self.outgoing
    }
}
