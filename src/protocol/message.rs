//! # Messages
//!
//! An [`Envelope`] is the unit every connection reads and writes. It carries
//! routing information (a correlation id and the session ids of sender and
//! recipient) around one typed [`Message`].
//!
//! Ids follow three shapes:
//! - requests draw a random non-zero id and expect a response with the same id
//! - responses copy the id of the request they answer
//! - events use id 0 and expect nothing back

use crate::config::PROTOCOL_VERSION;
use crate::core::serialization::MultiFormat;
use crate::protocol::instance::{InstanceFlavor, InstanceType};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Routed wrapper around a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u8,
    /// Correlation id, 0 for events
    pub id: u32,
    /// Session id of the sender, 0 before a session exists
    pub from: u32,
    /// Session id of the recipient
    pub to: u32,
    pub message: Message,
}

impl Envelope {
    fn new(id: u32, from: u32, to: u32, message: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id,
            from,
            to,
            message,
        }
    }

    /// A message that expects a response
    pub fn request(from: u32, to: u32, message: Message) -> Self {
        let id = rand::rng().random_range(1..=u32::MAX);
        Self::new(id, from, to, message)
    }

    /// Answer to `request`, addressed back to its sender
    pub fn response(request: &Envelope, from: u32, message: Message) -> Self {
        Self::new(request.id, from, request.from, message)
    }

    /// A message that expects nothing back
    pub fn event(from: u32, to: u32, message: Message) -> Self {
        Self::new(0, from, to, message)
    }

    #[inline]
    pub fn is_event(&self) -> bool {
        self.id == 0
    }
}

/// Result of an operation reported back to the requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub result: bool,
    pub comment: String,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            result: true,
            comment: String::new(),
        }
    }

    pub fn failure(comment: impl Into<String>) -> Self {
        Self {
            result: false,
            comment: comment.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Opens a session; sent by the requester as its first message
    SessionRequest {
        instance: InstanceType,
        flavor: InstanceFlavor,
        uuid: String,
    },
    /// Grants a session id to the requester
    SessionResponse {
        server_sid: u32,
        server_uuid: String,
        instance_sid: u32,
    },
    Ping,
    Pong,
    Outcome(Outcome),
    /// One item of an event stream
    StreamEvent { stream_id: u32, data: Vec<u8> },
    /// Ends an event stream from either side
    StopStream { stream_id: u32 },
    /// Application-defined message routed by its command name
    Custom { command: String, payload: Vec<u8> },
    Disconnect,
}

impl Message {
    /// Routing key used by the dispatcher.
    /// Borrowed for built-in messages, owned for custom commands.
    #[inline]
    pub fn opcode(&self) -> Cow<'static, str> {
        match self {
            Message::SessionRequest { .. } => Cow::Borrowed("SESSION_REQUEST"),
            Message::SessionResponse { .. } => Cow::Borrowed("SESSION_RESPONSE"),
            Message::Ping => Cow::Borrowed("PING"),
            Message::Pong => Cow::Borrowed("PONG"),
            Message::Outcome(_) => Cow::Borrowed("OUTCOME"),
            Message::StreamEvent { .. } => Cow::Borrowed("STREAM_EVENT"),
            Message::StopStream { .. } => Cow::Borrowed("STOP_STREAM"),
            Message::Custom { command, .. } => Cow::Owned(command.clone()),
            Message::Disconnect => Cow::Borrowed("DISCONNECT"),
        }
    }

    /// Convenience constructor for [`Message::Custom`]
    pub fn custom(command: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Message::Custom {
            command: command.into(),
            payload: payload.into(),
        }
    }
}

impl MultiFormat for Message {}
impl MultiFormat for Envelope {}
