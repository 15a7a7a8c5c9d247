//! Session-id handshake.
//!
//! A requester (client or agent) announces its type, flavor and UUID. The
//! server answers with its own sid and UUID plus a freshly generated sid for
//! the requester. Each step is a pure function so the transport can drive the
//! exchange and tests can exercise it without sockets.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::instance::{InstanceIdentity, InstanceType, Sid};
use crate::protocol::message::{Envelope, Message};
use tracing::debug;

/// Emitted once per connection when the handshake ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEvent {
    pub success: bool,
    /// Our sid on this session
    pub local: u32,
    /// The peer's sid
    pub remote: u32,
}

impl SessionEvent {
    pub fn success(local: u32, remote: u32) -> Self {
        Self {
            success: true,
            local,
            remote,
        }
    }

    pub fn failure() -> Self {
        Self {
            success: false,
            local: 0,
            remote: 0,
        }
    }
}

/// What we know about the other end of an established session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePeer {
    pub sid: u32,
    pub instance: InstanceType,
    pub uuid: String,
}

/// Sid granted to us by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSession {
    pub sid: u32,
}

/// First message of a requester
pub fn client_session_request(identity: &InstanceIdentity) -> Envelope {
    Envelope::request(
        0,
        0,
        Message::SessionRequest {
            instance: identity.instance,
            flavor: identity.flavor,
            uuid: identity.uuid.clone(),
        },
    )
}

/// Draws before giving up on finding a sid that no live session holds
const MAX_SID_DRAWS: usize = 64;

/// Validate a session request and grant a sid to the requester.
///
/// `in_use` reports sids held by live sessions; the grant never collides
/// with one of them (nor with our own sid).
pub fn server_session_response<F>(
    local_sid: u32,
    identity: &InstanceIdentity,
    request: &Envelope,
    in_use: F,
) -> Result<(RemotePeer, Envelope, SessionEvent)>
where
    F: Fn(u32) -> bool,
{
    let Message::SessionRequest {
        instance,
        flavor,
        uuid,
    } = &request.message
    else {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_EXPECTED_SESSION_REQUEST.into(),
        ));
    };

    if uuid.is_empty() {
        return Err(ProtocolError::HandshakeError(constants::ERR_EMPTY_UUID.into()));
    }

    if *instance == InstanceType::Server {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_SERVER_REQUESTER.into(),
        ));
    }

    if !instance.flavors().contains(flavor) {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_INVALID_FLAVOR.into(),
        ));
    }

    let remote_sid = (0..MAX_SID_DRAWS)
        .map(|_| Sid::generate(*instance, *flavor).value())
        .find(|sid| *sid != local_sid && !in_use(*sid))
        .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_SID_EXHAUSTED.into()))?;
    debug!(sid = remote_sid, instance = %instance, "Granted session");

    let mut response = Envelope::response(
        request,
        local_sid,
        Message::SessionResponse {
            server_sid: local_sid,
            server_uuid: identity.uuid.clone(),
            instance_sid: remote_sid,
        },
    );
    response.to = remote_sid;

    let peer = RemotePeer {
        sid: remote_sid,
        instance: *instance,
        uuid: uuid.clone(),
    };

    Ok((peer, response, SessionEvent::success(local_sid, remote_sid)))
}

/// Accept the server's response to our session request `request_id`
pub fn client_session_complete(
    identity: &InstanceIdentity,
    request_id: u32,
    response: &Envelope,
) -> Result<(LocalSession, RemotePeer, SessionEvent)> {
    if response.id != request_id {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_SESSION_ID_MISMATCH.into(),
        ));
    }


    let Message::SessionResponse {
        server_sid,
        server_uuid,
        instance_sid,
    } = &response.message
    else {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_EXPECTED_SESSION_RESPONSE.into(),
        ));
    };

    let granted = Sid::from_value(*instance_sid)
        .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_INVALID_SID.into()))?;

    if Sid::from_value(*server_sid).is_none() {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_INVALID_SID.into(),
        ));
    }

    if granted.instance() != Some(identity.instance) || granted.flavor() != Some(identity.flavor)
    {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_SID_MISMATCH.into(),
        ));
    }

    debug!(sid = *instance_sid, server = *server_sid, "Session established");

    let peer = RemotePeer {
        sid: *server_sid,
        instance: InstanceType::Server,
        uuid: server_uuid.clone(),
    };

    Ok((
        LocalSession { sid: *instance_sid },
        peer,
        SessionEvent::success(*instance_sid, *server_sid),
    ))
}
