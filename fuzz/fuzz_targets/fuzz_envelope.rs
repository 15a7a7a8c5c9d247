#![no_main]

use endpoint_protocol::core::serialization::{MultiFormat, SerializationFormat};
use endpoint_protocol::Envelope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for format in [
        SerializationFormat::Bincode,
        SerializationFormat::Json,
        SerializationFormat::MessagePack,
    ] {
        if let Ok(envelope) = Envelope::deserialize_format(data, format) {
            if let Ok(bytes) = envelope.serialize_format(format) {
                let _ = Envelope::deserialize_format(&bytes, format);
            }
        }
    }
});
