//! # Core Codec Components
//!
//! Framing, encoding and decoding of everything that crosses the wire.
//!
//! ## Components
//! - **Packet**: versioned frame carrying a serialized payload
//! - **Varint**: base-128 length prefix shared by every frame
//! - **Codec**: tokio codecs for packets and whole envelopes
//! - **Serialization**: payload format selection (bincode, JSON, MessagePack)
//!
//! ## Wire Format
//! ```text
//! [Length(varint32, 1-5)] [Version(1)] [Format(1)] [Payload(N)]
//! ```
//!
//! ## Limits
//! - Maximum body size: 16MB by default, configurable per codec
//! - Oversized frames are rejected from the length prefix alone

pub mod codec;
pub mod packet;
pub mod serialization;
pub mod varint;
