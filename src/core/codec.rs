//! # Codecs
//!
//! [`PacketCodec`] turns an unbounded byte stream into [`Packet`]s and back.
//! [`MessageCodec`] layers payload serialization on top so a `Framed`
//! transport yields whole [`Envelope`]s.
//!
//! Decoding never consumes the bytes of an incomplete frame and splits
//! complete frames off the read buffer without copying.

use bytes::{Buf, BytesMut};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::config::{TransportConfig, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
use crate::core::packet::Packet;
use crate::core::serialization::{MultiFormat, SerializationFormat};
use crate::core::varint;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::Envelope;
use crate::utils::metrics::TrafficCounter;

/// Log target for raw frame traffic
pub const RAW_TARGET: &str = "endpoint_protocol::traffic::raw";

/// Log target for decoded envelope traffic
pub const DECODED_TARGET: &str = "endpoint_protocol::traffic::decoded";

const PREVIEW_BYTES: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_payload_size: usize,
    log_raw: bool,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

impl PacketCodec {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            max_payload_size,
            log_raw: false,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.max_payload_size).with_raw_logging(config.log_traffic_raw)
    }

    /// Log every frame at trace level on [`RAW_TARGET`]
    pub fn with_raw_logging(mut self, enabled: bool) -> Self {
        self.log_raw = enabled;
        self
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some((len, prefix)) = varint::decode_length(src)? else {
            return Ok(None);
        };

        // Reject before buffering the body
        if len > self.max_payload_size {
            return Err(ProtocolError::OversizedPacket(len));
        }

        let total = prefix + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(prefix);
        let body = src.split_to(len).freeze();

        if self.log_raw {
            trace!(target: RAW_TARGET, bytes = total, preview = %hex_preview(&body), "Inbound frame");
        }

        Packet::from_body(body).map(Some)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        let body_len = item.body_len();
        if body_len > self.max_payload_size {
            return Err(ProtocolError::OversizedPacket(body_len));
        }

        item.write_to(dst);

        if self.log_raw {
            trace!(target: RAW_TARGET, bytes = item.encoded_len(), preview = %hex_preview(&item.payload), "Outbound frame");
        }

        Ok(())
    }
}

/// Codec producing and consuming whole envelopes
#[derive(Debug, Clone, Default)]
pub struct MessageCodec {
    packets: PacketCodec,
    format: SerializationFormat,
    log_decoded: bool,
    traffic: Option<Arc<TrafficCounter>>,
}

impl MessageCodec {
    pub fn new(packets: PacketCodec, format: SerializationFormat) -> Self {
        Self {
            packets,
            format,
            log_decoded: false,
            traffic: None,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(PacketCodec::from_config(config), config.format)
            .with_decoded_logging(config.log_traffic_decoded)
    }

    /// Log every envelope at trace level on [`DECODED_TARGET`]
    pub fn with_decoded_logging(mut self, enabled: bool) -> Self {
        self.log_decoded = enabled;
        self
    }

    /// Count every frame read and written on `traffic`
    pub fn with_traffic(mut self, traffic: Arc<TrafficCounter>) -> Self {
        self.traffic = Some(traffic);
        self
    }

    /// Format used for outbound payloads
    pub fn format(&self) -> SerializationFormat {
        self.format
    }
}

impl Decoder for MessageCodec {
    type Item = Envelope;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(packet) = self.packets.decode(src)? else {
            return Ok(None);
        };

        if let Some(traffic) = &self.traffic {
            traffic.record_read(packet.encoded_len() as u64);
        }

        // Peers may encode with a different format than ours
        let envelope = Envelope::deserialize_format(&packet.payload, packet.format)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(envelope.version));
        }

        if self.log_decoded {
            trace!(target: DECODED_TARGET, ?envelope, "Inbound envelope");
        }

        Ok(Some(envelope))
    }
}

impl Encoder<Envelope> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<()> {
        if self.log_decoded {
            trace!(target: DECODED_TARGET, envelope = ?item, "Outbound envelope");
        }

        let packet = Packet::new(self.format, item.serialize_format(self.format)?);
        let len = packet.encoded_len() as u64;
        self.packets.encode(packet, dst)?;

        if let Some(traffic) = &self.traffic {
            traffic.record_write(len);
        }
        Ok(())
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(PREVIEW_BYTES * 2 + 3);
    for b in bytes.iter().take(PREVIEW_BYTES) {
        let _ = write!(out, "{b:02x}");
    }
    if bytes.len() > PREVIEW_BYTES {
        out.push_str("...");
    }
    out
}
