// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::error::ProtocolError;
use crate::protocol::dispatcher::*;
use crate::protocol::instance::*;
use crate::protocol::message::{Envelope, Message};
use crate::protocol::session::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn server() -> (u32, InstanceIdentity) {
    let sid = Sid::generate(InstanceType::Server, InstanceFlavor::Vanilla).value();
    (
        sid,
        InstanceIdentity::generate(InstanceType::Server, InstanceFlavor::Vanilla),
    )
}

fn session_request(instance: InstanceType, flavor: InstanceFlavor, uuid: &str) -> Envelope {
    client_session_request(&InstanceIdentity::new(instance, flavor, uuid))
}

#[test]
fn test_session_handshake_flow() {
    let (server_sid, server_identity) = server();
    let client = InstanceIdentity::generate(InstanceType::Client, InstanceFlavor::Soapstone);

    // =================== Step 1: Requester announces itself ===================
    let request = client_session_request(&client);
    assert_ne!(request.id, 0);

    // =================== Step 2: Server grants a sid ===================
    let (remote, response, server_event) =
        server_session_response(server_sid, &server_identity, &request, |_| false)
            .expect("Server should accept a valid request");

    assert_eq!(remote.instance, InstanceType::Client);
    assert_eq!(remote.uuid, client.uuid);
    assert_eq!(response.id, request.id);
    assert_eq!(response.to, remote.sid);
    assert!(server_event.success);
    assert_eq!(server_event.local, server_sid);
    assert_eq!(server_event.remote, remote.sid);

    // =================== Step 3: Requester accepts ===================
    let (local, server_peer, client_event) =
        client_session_complete(&client, request.id, &response).expect("Client should accept the grant");

    assert_eq!(local.sid, remote.sid);
    assert_eq!(server_peer.sid, server_sid);
    assert_eq!(server_peer.uuid, server_identity.uuid);
    assert_eq!(server_peer.instance, InstanceType::Server);
    assert_eq!(client_event, SessionEvent::success(remote.sid, server_sid));
}

#[test]
fn test_every_requester_pair_accepted() {
    let (server_sid, server_identity) = server();

    for (instance, flavor) in iterate().filter(|(i, _)| *i != InstanceType::Server) {
        let identity = InstanceIdentity::generate(instance, flavor);
        let request = client_session_request(&identity);
        let (remote, response, _) =
            server_session_response(server_sid, &server_identity, &request, |_| false).unwrap();

        let granted = Sid::from_value(remote.sid).unwrap();
        assert_eq!(granted.instance(), Some(instance));
        assert_eq!(granted.flavor(), Some(flavor));
        assert!(client_session_complete(&identity, request.id, &response).is_ok());
    }
}

#[test]
fn test_server_rejects_invalid_requests() {
    let (server_sid, server_identity) = server();

    let cases = [
        session_request(InstanceType::Client, InstanceFlavor::Ascetic, ""),
        session_request(InstanceType::Server, InstanceFlavor::Vanilla, "uuid"),
        session_request(InstanceType::Client, InstanceFlavor::Vanilla, "uuid"),
        session_request(InstanceType::Agent, InstanceFlavor::Lockstone, "uuid"),
        Envelope::request(0, 0, Message::Ping),
    ];

    for request in &cases {
        let result = server_session_response(server_sid, &server_identity, request, |_| false);
        assert!(
            matches!(result, Err(ProtocolError::HandshakeError(_))),
            "should reject {:?}",
            request.message
        );
    }
}

#[test]
fn test_client_rejects_bad_grants() {
    let client = InstanceIdentity::generate(InstanceType::Agent, InstanceFlavor::Vanilla);
    let request = client_session_request(&client);
    let (server_sid, _) = server();

    let grant = |instance_sid: u32| {
        Envelope::response(
            &request,
            server_sid,
            Message::SessionResponse {
                server_sid,
                server_uuid: "server".into(),
                instance_sid,
            },
        )
    };

    // Zero sid
    assert!(client_session_complete(&client, request.id, &grant(0)).is_err());

    // Sid issued for a client, not an agent
    let wrong = Sid::generate(InstanceType::Client, InstanceFlavor::Ascetic).value();
    assert!(client_session_complete(&client, request.id, &grant(wrong)).is_err());

    // Not a session response at all
    let pong = Envelope::response(&request, server_sid, Message::Pong);
    assert!(client_session_complete(&client, request.id, &pong).is_err());

    let right = Sid::generate(InstanceType::Agent, InstanceFlavor::Vanilla).value();
    assert!(client_session_complete(&client, request.id, &grant(right)).is_ok());
}

#[test]
fn test_client_rejects_grant_for_other_request() {
    let client = InstanceIdentity::generate(InstanceType::Client, InstanceFlavor::Ascetic);
    let (server_sid, server_identity) = server();

    let request = client_session_request(&client);
    let (_, response, _) =
        server_session_response(server_sid, &server_identity, &request, |_| false).unwrap();

    let result = client_session_complete(&client, request.id.wrapping_add(1), &response);
    assert!(matches!(result, Err(ProtocolError::HandshakeError(_))));
    assert!(client_session_complete(&client, request.id, &response).is_ok());
}

#[test]
fn test_grant_avoids_live_sids() {
    let (server_sid, server_identity) = server();
    let client = InstanceIdentity::generate(InstanceType::Client, InstanceFlavor::Ascetic);
    let request = client_session_request(&client);

    let (first, _, _) =
        server_session_response(server_sid, &server_identity, &request, |_| false).unwrap();

    // Every grant steers clear of the sid already held
    for _ in 0..100 {
        let (next, _, _) = server_session_response(server_sid, &server_identity, &request, |sid| {
            sid == first.sid
        })
        .unwrap();
        assert_ne!(next.sid, first.sid);
    }

    // Nothing free: the handshake fails instead of reusing a sid
    let result = server_session_response(server_sid, &server_identity, &request, |_| true);
    assert!(matches!(result, Err(ProtocolError::HandshakeError(_))));
}

fn context(instance: InstanceType, message: Message, authenticated: bool) -> HandlerContext {
    let flavor = instance.flavors()[0];
    HandlerContext {
        envelope: Envelope::request(Sid::generate(instance, flavor).value(), 1, message),
        remote: RemotePeer {
            sid: Sid::generate(instance, flavor).value(),
            instance,
            uuid: "peer".into(),
        },
        authenticated,
    }
}

#[test]
fn test_dispatch_routes_by_instance_type() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register(
            HandlerSpec::new("agent.report").instances(&[InstanceType::Agent]),
            |_| Ok(Some(Message::Outcome(crate::protocol::Outcome::success()))),
        )
        .unwrap();

    let from_agent = context(InstanceType::Agent, Message::custom("agent.report", vec![]), false);
    let from_client = context(InstanceType::Client, Message::custom("agent.report", vec![]), false);

    assert!(matches!(
        dispatcher.dispatch(&from_agent).unwrap(),
        Dispatch::Handled(Some(Message::Outcome(_)))
    ));
    assert_eq!(dispatcher.dispatch(&from_client).unwrap(), Dispatch::Unhandled);

    assert_eq!(
        dispatcher.handlers(InstanceType::Agent).unwrap(),
        vec!["agent.report".to_string()]
    );
    assert!(dispatcher.handlers(InstanceType::Client).unwrap().is_empty());
}

#[test]
fn test_auth_gating() {
    let dispatcher = Dispatcher::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    dispatcher
        .register(HandlerSpec::new("PING").authenticated(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .unwrap();

    let anonymous = context(InstanceType::Client, Message::Ping, false);
    assert!(matches!(
        dispatcher.dispatch(&anonymous),
        Err(ProtocolError::Unauthorized(_))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let trusted = context(InstanceType::Client, Message::Ping, true);
    assert_eq!(dispatcher.dispatch(&trusted).unwrap(), Dispatch::Handled(None));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unregister_removes_from_all_tables() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register(HandlerSpec::new("state.sync"), |_| Ok(None))
        .unwrap();

    for instance in InstanceType::ALL {
        assert_eq!(dispatcher.handlers(instance).unwrap().len(), 1);
    }

    assert!(dispatcher.unregister("state.sync").unwrap());
    assert!(!dispatcher.unregister("state.sync").unwrap());

    let ctx = context(InstanceType::Agent, Message::custom("state.sync", vec![]), true);
    assert_eq!(dispatcher.dispatch(&ctx).unwrap(), Dispatch::Unhandled);
}

#[test]
fn test_handler_errors_propagate() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register(HandlerSpec::new("broken"), |_| {
            Err(ProtocolError::Custom("handler failed".into()))
        })
        .unwrap();

    let ctx = context(InstanceType::Client, Message::custom("broken", vec![]), false);
    assert!(matches!(
        dispatcher.dispatch(&ctx),
        Err(ProtocolError::Custom(_))
    ));
}

#[test]
fn test_handler_sees_envelope() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register(HandlerSpec::new("echo"), |ctx| match &ctx.envelope.message {
            Message::Custom { payload, .. } => Ok(Some(Message::custom("echo", payload.clone()))),
            _ => Ok(None),
        })
        .unwrap();

    let ctx = context(InstanceType::Client, Message::custom("echo", b"hi".to_vec()), false);
    assert_eq!(
        dispatcher.dispatch(&ctx).unwrap(),
        Dispatch::Handled(Some(Message::custom("echo", b"hi".to_vec())))
    );
}
