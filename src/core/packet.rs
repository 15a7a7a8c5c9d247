//! # Packet
//!
//! A packet is one frame on the wire: a varint32 length prefix followed by a
//! body of `[version][format][payload]`.
//!
//! ```text
//! +----------------+---------+--------+-----------------+
//! | length (1-5 B) | version | format | payload (N B)   |
//! +----------------+---------+--------+-----------------+
//!                  |<------- length = N + 2 ---------->|
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::{MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
use crate::core::serialization::SerializationFormat;
use crate::core::varint;
use crate::error::{ProtocolError, Result};

/// Bytes of body header after the length prefix
pub const BODY_HEADER_SIZE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub format: SerializationFormat,
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet at the current protocol version
    pub fn new(format: SerializationFormat, payload: impl Into<Bytes>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            format,
            payload: payload.into(),
        }
    }

    /// Length of the body announced by the prefix
    #[inline]
    pub fn body_len(&self) -> usize {
        BODY_HEADER_SIZE + self.payload.len()
    }

    /// Total encoded size including the length prefix
    #[inline]
    pub fn encoded_len(&self) -> usize {
        varint::length_size(self.body_len()) + self.body_len()
    }

    /// Write the full frame into `dst`
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        varint::encode_length(self.body_len(), dst);
        dst.put_u8(self.version);
        dst.put_u8(self.format.format_byte());
        dst.put_slice(&self.payload);
    }

    /// Serialize into a freshly allocated frame
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.to_vec()
    }

    /// Parse exactly one complete frame from `buf` using the default size limit
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Self::from_bytes_with_limit(buf, MAX_PAYLOAD_SIZE)
    }

    /// Parse one complete frame, rejecting bodies larger than `max_body`
    pub fn from_bytes_with_limit(buf: &[u8], max_body: usize) -> Result<Self> {
        let (len, prefix) = varint::decode_length(buf)?.ok_or(ProtocolError::InvalidHeader)?;

        if len > max_body {
            return Err(ProtocolError::OversizedPacket(len));
        }

        let body = buf
            .get(prefix..prefix + len)
            .ok_or(ProtocolError::InvalidHeader)?;

        Self::from_body(Bytes::copy_from_slice(body))
    }

    /// Parse a body that has already been split off its length prefix
    pub(crate) fn from_body(body: Bytes) -> Result<Self> {
        if body.len() < BODY_HEADER_SIZE {
            return Err(ProtocolError::InvalidHeader);
        }

        let version = body[0];
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let format =
            SerializationFormat::from_byte(body[1]).ok_or(ProtocolError::UnknownFormat(body[1]))?;

        Ok(Self {
            version,
            format,
            payload: body.slice(BODY_HEADER_SIZE..),
        })
    }
}
