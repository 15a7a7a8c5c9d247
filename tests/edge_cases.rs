#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests: boundary conditions, malformed input, resource limits

use endpoint_protocol::config::{MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
use endpoint_protocol::core::packet::{Packet, BODY_HEADER_SIZE};
use endpoint_protocol::core::serialization::{MultiFormat, SerializationFormat};
use endpoint_protocol::core::varint;
use endpoint_protocol::error::ProtocolError;
use endpoint_protocol::protocol::dispatcher::{Dispatch, Dispatcher, HandlerContext, HandlerSpec};
use endpoint_protocol::protocol::instance::{InstanceType, Sid};
use endpoint_protocol::protocol::message::{Envelope, Message};
use endpoint_protocol::protocol::response::ResponseRegistry;
use endpoint_protocol::protocol::session::RemotePeer;
use endpoint_protocol::utils::timeout::with_timeout;
use std::sync::Arc;
use std::time::Duration;

fn context(instance: InstanceType, message: Message) -> HandlerContext {
    HandlerContext {
        envelope: Envelope::request(7, 9, message),
        remote: RemotePeer {
            sid: 7,
            instance,
            uuid: "peer".into(),
        },
        authenticated: false,
    }
}

// ============================================================================
// PACKET EDGE CASES
// ============================================================================

#[test]
fn test_packet_empty_payload() {
    let packet = Packet::new(SerializationFormat::Bincode, Vec::<u8>::new());
    let bytes = packet.to_bytes();
    assert_eq!(bytes, vec![BODY_HEADER_SIZE as u8, PROTOCOL_VERSION, 0x01]);

    let decoded = Packet::from_bytes(&bytes).expect("Should decode empty payload");
    assert!(decoded.payload.is_empty());
}

#[test]
fn test_packet_empty_buffer() {
    assert!(matches!(
        Packet::from_bytes(&[]),
        Err(ProtocolError::InvalidHeader)
    ));
}

#[test]
fn test_packet_unsupported_version() {
    let bytes = [0x03, 99, 0x01, 0xAA];
    assert!(matches!(
        Packet::from_bytes(&bytes),
        Err(ProtocolError::UnsupportedVersion(99))
    ));
}

#[test]
fn test_packet_zero_length_body() {
    assert!(matches!(
        Packet::from_bytes(&[0x00]),
        Err(ProtocolError::InvalidHeader)
    ));
}

#[test]
fn test_packet_oversized_claim_rejected() {
    let mut bytes = bytes::BytesMut::new();
    varint::encode_length(MAX_PAYLOAD_SIZE + 1, &mut bytes);
    bytes.extend_from_slice(&[PROTOCOL_VERSION, 0x01]);

    assert!(matches!(
        Packet::from_bytes(&bytes),
        Err(ProtocolError::OversizedPacket(n)) if n == MAX_PAYLOAD_SIZE + 1
    ));
}

#[test]
fn test_packet_body_exactly_max() {
    let payload = vec![0x7E; MAX_PAYLOAD_SIZE - BODY_HEADER_SIZE];
    let bytes = Packet::new(SerializationFormat::Bincode, payload).to_bytes();
    let decoded = Packet::from_bytes(&bytes).expect("Should decode max boundary");
    assert_eq!(decoded.body_len(), MAX_PAYLOAD_SIZE);
}

#[test]
fn test_packet_body_one_more_than_max_fails() {
    let payload = vec![0xFF; MAX_PAYLOAD_SIZE - BODY_HEADER_SIZE + 1];
    let bytes = Packet::new(SerializationFormat::Bincode, payload).to_bytes();
    assert!(matches!(
        Packet::from_bytes(&bytes),
        Err(ProtocolError::OversizedPacket(_))
    ));
}

#[test]
fn test_varint_prefix_sizes() {
    assert_eq!(varint::length_size(0), 1);
    assert_eq!(varint::length_size(127), 1);
    assert_eq!(varint::length_size(128), 2);
    assert_eq!(varint::length_size(16_383), 2);
    assert_eq!(varint::length_size(16_384), 3);
    assert_eq!(varint::length_size(u32::MAX as usize), 5);
}

#[test]
fn test_overlong_varint_rejected() {
    let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
    assert!(varint::decode_length(&bytes).is_err());
}

// ============================================================================
// SERIALIZATION EDGE CASES
// ============================================================================

#[test]
fn test_custom_payload_unicode_command() {
    let message = Message::custom("命令/🚀", vec![0u8, 255, 10]);
    for format in [
        SerializationFormat::Bincode,
        SerializationFormat::Json,
        SerializationFormat::MessagePack,
    ] {
        let bytes = message.serialize_format(format).unwrap();
        let decoded = Message::deserialize_format(&bytes, format).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.opcode(), "命令/🚀");
    }
}

#[test]
fn test_truncated_envelope_rejected() {
    let envelope = Envelope::event(1, 2, Message::custom("DATA", vec![1u8; 64]));
    let bytes = envelope.serialize_format(SerializationFormat::Bincode).unwrap();
    let result = Envelope::deserialize_format(&bytes[..bytes.len() / 2], SerializationFormat::Bincode);
    assert!(matches!(result, Err(ProtocolError::DeserializeError(_))));
}

#[test]
fn test_header_with_unknown_format_byte() {
    let result = Message::deserialize_with_header(&[0x42, 0x00]);
    assert!(matches!(result, Err(ProtocolError::DeserializeError(_))));
}

// ============================================================================
// SID EDGE CASES
// ============================================================================

#[test]
fn test_sid_rejects_zero_and_unknown_types() {
    assert!(Sid::from_value(0).is_none());

    // type bits 0b1111 map to no instance type
    let sid = Sid::from_value(0x0F | (1 << 4)).unwrap();
    assert!(sid.instance().is_none());
}

// ============================================================================
// DISPATCHER EDGE CASES
// ============================================================================

#[test]
fn test_dispatcher_empty_opcode() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register(HandlerSpec::new(""), |_| Ok(Some(Message::Pong)))
        .unwrap();

    let ctx = context(InstanceType::Client, Message::custom("", Vec::<u8>::new()));
    assert_eq!(
        dispatcher.dispatch(&ctx).unwrap(),
        Dispatch::Handled(Some(Message::Pong))
    );
}

#[test]
fn test_dispatcher_very_long_opcode() {
    let dispatcher = Dispatcher::new();
    let long_name = "A".repeat(10_000);
    dispatcher
        .register(HandlerSpec::new(long_name.clone()), |_| Ok(None))
        .unwrap();

    let ctx = context(InstanceType::Agent, Message::custom(long_name, Vec::<u8>::new()));
    assert_eq!(dispatcher.dispatch(&ctx).unwrap(), Dispatch::Handled(None));
}

#[test]
fn test_dispatcher_handler_override() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register(HandlerSpec::new("TEST"), |_| Ok(Some(Message::Pong)))
        .unwrap();
    dispatcher
        .register(HandlerSpec::new("TEST"), |_| Ok(Some(Message::Disconnect)))
        .unwrap();

    let ctx = context(InstanceType::Client, Message::custom("TEST", Vec::<u8>::new()));
    assert_eq!(
        dispatcher.dispatch(&ctx).unwrap(),
        Dispatch::Handled(Some(Message::Disconnect))
    );
}

#[test]
fn test_dispatcher_builtin_opcodes_can_be_routed() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register(HandlerSpec::new("PONG"), |_| Ok(None))
        .unwrap();

    let ctx = context(InstanceType::Server, Message::Pong);
    assert_eq!(dispatcher.dispatch(&ctx).unwrap(), Dispatch::Handled(None));
    assert_eq!(
        dispatcher
            .dispatch(&context(InstanceType::Server, Message::Ping))
            .unwrap(),
        Dispatch::Unhandled
    );
}

#[test]
fn test_dispatcher_null_bytes_in_opcode() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register(HandlerSpec::new("HANDLER\0HIDDEN"), |_| Ok(None))
        .unwrap();

    let ctx = context(InstanceType::Client, Message::custom("HANDLER", Vec::<u8>::new()));
    assert_eq!(dispatcher.dispatch(&ctx).unwrap(), Dispatch::Unhandled);
}

#[test]
fn test_dispatcher_empty_instance_list() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register(HandlerSpec::new("NOWHERE").instances(&[]), |_| Ok(None))
        .unwrap();

    for instance in InstanceType::ALL {
        assert!(dispatcher.handlers(instance).unwrap().is_empty());
    }
    assert!(!dispatcher.unregister("NOWHERE").unwrap());
}

// ============================================================================
// RESPONSE CORRELATION EDGE CASES
// ============================================================================

#[tokio::test]
async fn test_response_for_unknown_id_ignored() {
    let registry = ResponseRegistry::new();
    let stray = Envelope {
        id: 42,
        ..Envelope::event(1, 2, Message::Pong)
    };
    assert!(!registry.complete(stray));
}

#[tokio::test]
async fn test_response_after_cancel_ignored() {
    let registry = ResponseRegistry::new();
    let rx = registry.register(5).unwrap();
    registry.cancel(5);
    drop(rx);

    let late = Envelope {
        id: 5,
        ..Envelope::event(1, 2, Message::Pong)
    };
    assert!(!registry.complete(late));
    assert_eq!(registry.pending(), 0);
}

// ============================================================================
// TIMEOUT EDGE CASES
// ============================================================================

#[tokio::test]
async fn test_timeout_immediate_complete() {
    let result = with_timeout(async { "done" }, Duration::from_secs(10)).await;
    assert_eq!(result.unwrap(), "done");
}

#[tokio::test]
async fn test_timeout_exceeds_duration() {
    let result = with_timeout(
        tokio::time::sleep(Duration::from_secs(1)),
        Duration::from_millis(10),
    )
    .await;
    assert!(matches!(result, Err(ProtocolError::Timeout)));
}

// ============================================================================
// ERROR FORMATTING
// ============================================================================

#[test]
fn test_error_display_formatting() {
    let errors = vec![
        ProtocolError::InvalidHeader,
        ProtocolError::UnsupportedVersion(42),
        ProtocolError::UnknownFormat(9),
        ProtocolError::OversizedPacket(999),
        ProtocolError::ConnectionClosed,
        ProtocolError::ConnectionTimeout,
        ProtocolError::Unauthorized("SECRET".into()),
        ProtocolError::ResolveError("nowhere".into()),
        ProtocolError::Io(std::io::Error::other("test error")),
    ];

    for err in errors {
        let display_str = format!("{err}");
        assert!(!display_str.is_empty(), "Error should have display format");
    }
}

#[test]
fn test_many_dispatchers_share_nothing() {
    let first = Arc::new(Dispatcher::new());
    let second = Arc::new(Dispatcher::new());
    first
        .register(HandlerSpec::new("ONLY_FIRST"), |_| Ok(None))
        .unwrap();

    assert_eq!(first.handlers(InstanceType::Client).unwrap(), vec!["ONLY_FIRST"]);
    assert!(second.handlers(InstanceType::Client).unwrap().is_empty());
}
