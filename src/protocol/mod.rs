//! # Protocol
//!
//! Message model, instance identity, the session handshake and routing of
//! inbound messages to handlers.

pub mod dispatcher;
pub mod instance;
pub mod message;
pub mod oid;
pub mod response;
pub mod session;

#[cfg(test)]
mod tests;

pub use dispatcher::{Dispatch, Dispatcher, HandlerContext, HandlerSpec};
pub use instance::{InstanceFlavor, InstanceIdentity, InstanceType, Sid};
pub use message::{Envelope, Message, Outcome};
pub use oid::Oid;
pub use session::{LocalSession, RemotePeer, SessionEvent};
