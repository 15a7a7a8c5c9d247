#![no_main]

use bytes::BytesMut;
use endpoint_protocol::core::codec::PacketCodec;
use endpoint_protocol::Packet;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let _ = Packet::from_bytes(data);

    // A streaming decoder must consume or reject, never loop or panic
    let mut codec = PacketCodec::new(64 * 1024);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
