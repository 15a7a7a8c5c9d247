#![no_main]

use endpoint_protocol::core::serialization::{MultiFormat, SerializationFormat};
use endpoint_protocol::protocol::instance::{InstanceFlavor, InstanceIdentity, InstanceType};
use endpoint_protocol::protocol::session::{client_session_complete, server_session_response};
use endpoint_protocol::Envelope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = Envelope::deserialize_format(data, SerializationFormat::Bincode) else {
        return;
    };

    let server = InstanceIdentity::new(InstanceType::Server, InstanceFlavor::Vanilla, "server");
    let client = InstanceIdentity::new(InstanceType::Client, InstanceFlavor::Lifegem, "client");

    if let Ok((peer, response, _)) = server_session_response(0x11, &server, &envelope, |_| false) {
        assert_ne!(peer.instance, InstanceType::Server);
        assert_eq!(response.to, peer.sid);
    }
    let _ = client_session_complete(&client, envelope.id, &envelope);
});
