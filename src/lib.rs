//! # Endpoint Protocol
//!
//! Networking core for instances (servers, agents and clients) that talk to
//! each other over framed, serialized messages.
//!
//! ## Layers
//! - [`core`]: varint32 length-delimited framing and payload serialization
//! - [`protocol`]: message model, instance identity, session handshake,
//!   dispatch and response correlation
//! - [`transport`]: tokio connections over TCP and Unix domain sockets
//! - [`stream`]: event streams between two endpoints
//! - [`resolver`]: name resolution for peer discovery
//! - [`utils`]: logging, metrics and timeouts
//!
//! ## Example
//! ```no_run
//! use endpoint_protocol::config::NetworkConfig;
//! use endpoint_protocol::protocol::instance::{InstanceFlavor, InstanceIdentity, InstanceType};
//! use endpoint_protocol::transport::{tcp, EndpointContext};
//!
//! # async fn run() -> endpoint_protocol::Result<()> {
//! let identity = InstanceIdentity::generate(InstanceType::Client, InstanceFlavor::Lifegem);
//! let ctx = EndpointContext::new(identity, NetworkConfig::default());
//! let conn = tcp::connect(&ctx, "127.0.0.1:9000").await?;
//! conn.send(endpoint_protocol::Message::Ping).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod resolver;
pub mod stream;
pub mod transport;
pub mod utils;

pub use crate::core::packet::Packet;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::message::{Envelope, Message};
pub use crate::transport::connection::Connection;
