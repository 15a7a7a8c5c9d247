//! Property-based tests using proptest
//!
//! Framing must be insensitive to how the byte stream is chunked, and the
//! decoders must reject arbitrary input without panicking.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use endpoint_protocol::core::codec::{MessageCodec, PacketCodec};
use endpoint_protocol::core::packet::Packet;
use endpoint_protocol::core::serialization::SerializationFormat;
use endpoint_protocol::protocol::instance::{iterate, Sid};
use endpoint_protocol::protocol::message::{Envelope, Message, Outcome};
use endpoint_protocol::resolver::split_target;
use proptest::prelude::*;
use std::net::SocketAddr;
use tokio_util::codec::{Decoder, Encoder};

fn format_strategy() -> impl Strategy<Value = SerializationFormat> {
    prop_oneof![
        Just(SerializationFormat::Bincode),
        Just(SerializationFormat::Json),
        Just(SerializationFormat::MessagePack),
    ]
}

fn message_strategy() -> impl Strategy<Value = Message> {
    prop_oneof![
        Just(Message::Ping),
        Just(Message::Pong),
        Just(Message::Disconnect),
        (any::<bool>(), ".{0,32}").prop_map(|(result, comment)| Message::Outcome(Outcome {
            result,
            comment
        })),
        (1u32..=u32::MAX, prop::collection::vec(any::<u8>(), 0..512))
            .prop_map(|(stream_id, data)| Message::StreamEvent { stream_id, data }),
        (1u32..=u32::MAX).prop_map(|stream_id| Message::StopStream { stream_id }),
        ("[A-Z_]{1,24}", prop::collection::vec(any::<u8>(), 0..512))
            .prop_map(|(command, payload)| Message::Custom { command, payload }),
    ]
}

// Property: a stream of frames decodes identically however it is chunked
proptest! {
    #[test]
    fn prop_chunking_is_transparent(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..8),
        chunk in 1usize..64,
    ) {
        let mut wire = Vec::new();
        for payload in &payloads {
            wire.extend(Packet::new(SerializationFormat::Bincode, payload.clone()).to_bytes());
        }

        let mut codec = PacketCodec::default();
        let mut buffer = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            buffer.extend_from_slice(piece);
            while let Some(packet) = codec.decode(&mut buffer).expect("valid stream") {
                decoded.push(packet.payload.to_vec());
            }
        }

        prop_assert!(buffer.is_empty());
        prop_assert_eq!(decoded, payloads);
    }
}

// Property: the prefix announces exactly the bytes that follow it
proptest! {
    #[test]
    fn prop_encoded_len_matches_output(
        payload in prop::collection::vec(any::<u8>(), 0..20_000),
        format in format_strategy(),
    ) {
        let packet = Packet::new(format, payload);
        let mut buffer = BytesMut::new();
        PacketCodec::default().encode(packet.clone(), &mut buffer).unwrap();
        prop_assert_eq!(buffer.len(), packet.encoded_len());
        prop_assert_eq!(Packet::from_bytes(&buffer).unwrap(), packet);
    }
}

// Property: envelopes survive the wire in every format
proptest! {
    #[test]
    fn prop_envelope_through_codec(
        message in message_strategy(),
        format in format_strategy(),
        from in any::<u32>(),
        to in any::<u32>(),
    ) {
        let envelope = Envelope::request(from, to, message);
        let mut codec = MessageCodec::new(PacketCodec::default(), format);
        let mut buffer = BytesMut::new();
        codec.encode(envelope.clone(), &mut buffer).unwrap();

        let decoded = MessageCodec::default().decode(&mut buffer).unwrap();
        prop_assert_eq!(decoded, Some(envelope));
    }
}

// Property: arbitrary bytes never panic the decoders
proptest! {
    #[test]
    fn prop_decoder_never_panics(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let mut packets = PacketCodec::new(4096);
        let mut buffer = BytesMut::from(&data[..]);
        while let Ok(Some(_)) = packets.decode(&mut buffer) {}

        let mut messages = MessageCodec::default();
        let mut buffer = BytesMut::from(&data[..]);
        while let Ok(Some(_)) = messages.decode(&mut buffer) {}

        let _ = Packet::from_bytes(&data);
    }
}

// Property: generated sids carry their type and flavor and never collide with 0
proptest! {
    #[test]
    fn prop_sid_layout(index in 0usize..6) {
        let (instance, flavor) = iterate().nth(index).unwrap();
        let sid = Sid::generate(instance, flavor);

        prop_assert_ne!(sid.value(), 0);
        prop_assert_eq!(sid.value() >> 31, 0);
        prop_assert_eq!(sid.instance(), Some(instance));
        prop_assert_eq!(sid.flavor(), Some(flavor));
        prop_assert_eq!(Sid::from_value(sid.value()), Some(sid));
    }
}

// Property: every socket address is accepted as a target verbatim
proptest! {
    #[test]
    fn prop_socket_addr_targets(ip in any::<std::net::IpAddr>(), port in any::<u16>()) {
        let addr = SocketAddr::new(ip, port);
        let (host, port) = split_target(&addr.to_string(), 1).unwrap();
        prop_assert_eq!(port, addr.port());
        prop_assert_eq!(host.parse::<std::net::IpAddr>().unwrap(), addr.ip());
    }
}
