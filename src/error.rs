//! # Error Types
//!
//! Error handling for every layer of the endpoint.
//!
//! ## Error Categories
//! - **I/O Errors**: socket and file system failures
//! - **Framing Errors**: invalid headers, corrupted length prefixes, oversized frames
//! - **Session Errors**: handshake rejections, unauthorized dispatch
//! - **Timing Errors**: request timeouts and idle connections
//! - **Resolution Errors**: peer names that cannot be resolved
//!
//! ## Example Usage
//! ```rust
//! use endpoint_protocol::error::{ProtocolError, Result};
//! use std::fs::File;
//! use std::io::Read;
//! use tracing::{error, info};
//!
//! fn read_file(path: &str) -> Result<String> {
//!     let mut file = File::open(path).map_err(ProtocolError::Io)?;
//!     let mut contents = String::new();
//!     file.read_to_string(&mut contents).map_err(ProtocolError::Io)?;
//!     Ok(contents)
//! }
//!
//! fn main() {
//!     match read_file("example.txt") {
//!         Ok(contents) => info!(contents, "Successfully read file"),
//!         Err(e) => error!(error=%e, "Error reading file"),
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants so common error paths borrow instead of allocating.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Framing errors
    pub const ERR_VARINT_TOO_LONG: &str = "Length prefix exceeds 5 bytes";

    /// Connection errors
    pub const ERR_WRITER_GONE: &str = "Connection writer task has stopped";
    pub const ERR_MAX_CONNECTIONS: &str = "Maximum number of connections reached";

    /// Session handshake errors
    pub const ERR_EXPECTED_SESSION_REQUEST: &str = "Expected a session request";
    pub const ERR_EXPECTED_SESSION_RESPONSE: &str = "Expected a session response";
    pub const ERR_EMPTY_UUID: &str = "Instance UUID is empty";
    pub const ERR_SERVER_REQUESTER: &str = "Servers cannot request a session";
    pub const ERR_INVALID_FLAVOR: &str = "Instance flavor is not valid for the instance type";
    pub const ERR_INVALID_SID: &str = "Granted session ID is invalid";
    pub const ERR_SID_MISMATCH: &str = "Granted session ID does not match the local instance";
    pub const ERR_HANDSHAKE_INCOMPLETE: &str = "Session handshake has not completed";
    pub const ERR_SESSION_ID_MISMATCH: &str = "Session response does not answer our request";
    pub const ERR_SID_EXHAUSTED: &str = "No free session ID could be drawn";
    pub const ERR_SID_IN_USE: &str = "Granted session ID is already held by a live session";

    /// Oid errors
    pub const ERR_OID_EMPTY: &str = "Oid path has no components";
    pub const ERR_OID_NAMESPACE: &str = "Oid namespace cannot be empty";
    pub const ERR_OID_LENGTH: &str = "Oid length out of range";
    pub const ERR_OID_NOT_CHILD: &str = "Oid is not below the given ancestor";
    pub const ERR_OID_CONCRETE: &str = "Cannot resolve a concrete oid";
    pub const ERR_OID_GENERIC: &str = "Attributes need a concrete oid";

    /// Stream errors
    pub const ERR_STREAM_ID_ZERO: &str = "Stream id 0 is reserved";

    /// Synchronization errors
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

/// The error type for all endpoint operations.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Serialization(#[from] bincode::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid protocol header")]
    InvalidHeader,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown serialization format: {0}")]
    UnknownFormat(u8),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Handler requires an authenticated connection: {0}")]
    Unauthorized(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Connection timed out (no activity)")]
    ConnectionTimeout,

    #[error("Failed to resolve '{0}'")]
    ResolveError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Invalid oid: {0}")]
    InvalidOid(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
