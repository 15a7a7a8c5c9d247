//! # Connection
//!
//! One established socket and its two tasks:
//!
//! - the **writer** drains a bounded queue of envelopes into the socket, so
//!   senders wait once `backpressure_limit` envelopes are queued
//! - the **driver** reads envelopes, keeps the heartbeat and idle timer, and
//!   runs each inbound envelope through the handling pipeline in order
//!
//! ## Inbound pipeline
//! 1. Session handshake, until it completes (the first envelope is consumed
//!    by it and any failure closes the connection)
//! 2. Responses to our pending requests
//! 3. Built-ins: `Ping`, `Pong`, `Disconnect`, stream events
//! 4. The dispatcher
//!
//! [`Connection`] is a cheap handle; clones share the same socket.

use crate::core::codec::MessageCodec;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatch, HandlerContext};
use crate::protocol::message::{Envelope, Message, Outcome};
use crate::protocol::oid::Oid;
use crate::protocol::response::ResponseRegistry;
use crate::protocol::session::{self, RemotePeer, SessionEvent};
use crate::transport::EndpointContext;
use crate::utils::metrics::{global_metrics, TrafficCounter, TrafficSnapshot};
use crate::utils::timeout::with_timeout;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, trace, warn};

/// Time the writer gets to flush queued envelopes once the connection closes
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Which side of the session handshake this connection plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opened the connection and asks for a session
    Requester,
    /// Accepted the connection and grants sessions
    Responder,
}

enum Flow {
    Continue,
    Close,
}

type Sink<S> = SplitSink<Framed<S, MessageCodec>, Envelope>;
type Frames<S> = SplitStream<Framed<S, MessageCodec>>;

#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    peer: String,
    role: Role,
    outbound: mpsc::Sender<Envelope>,
    responses: ResponseRegistry,
    remote: RwLock<Option<RemotePeer>>,
    local_sid: AtomicU32,
    handshake_id: u32,
    authenticated: AtomicBool,
    attributes: RwLock<BTreeMap<Oid, String>>,
    traffic: Arc<TrafficCounter>,
    message_timeout: Duration,
    session: watch::Sender<Option<SessionEvent>>,
    shutdown: watch::Sender<bool>,
    done: watch::Sender<bool>,
}

impl Connection {
    /// Start the writer and driver tasks for `io`.
    ///
    /// A requester sends its session request before anything else.
    pub fn spawn<S>(io: S, peer: impl Into<String>, role: Role, ctx: Arc<EndpointContext>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let transport = &ctx.config.transport;
        let traffic = Arc::new(TrafficCounter::new());
        let codec = MessageCodec::from_config(transport).with_traffic(traffic.clone());
        let (sink, frames) = Framed::new(io, codec).split();
        let (outbound, queue) = mpsc::channel(transport.backpressure_limit.max(1));

        let local_sid = match role {
            Role::Responder => ctx.local_sid(),
            Role::Requester => 0,
        };
        let request = match role {
            Role::Requester => Some(session::client_session_request(&ctx.identity)),
            Role::Responder => None,
        };

        let conn = Self {
            inner: Arc::new(Inner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                peer: peer.into(),
                role,
                outbound,
                responses: ResponseRegistry::new(),
                remote: RwLock::new(None),
                local_sid: AtomicU32::new(local_sid),
                handshake_id: request.as_ref().map_or(0, |request| request.id),
                authenticated: AtomicBool::new(false),
                attributes: RwLock::new(BTreeMap::new()),
                traffic,
                message_timeout: transport.message_timeout,
                session: watch::channel(None).0,
                shutdown: watch::channel(false).0,
                done: watch::channel(false).0,
            }),
        };

        global_metrics().connection_established();
        info!(peer = %conn.peer(), id = conn.id(), ?role, "Connection established");

        if let Some(request) = request {
            global_metrics().handshake_attempt();
            // The queue is still empty so this cannot fail for lack of capacity
            let _ = conn.inner.outbound.try_send(request);
        }

        let writer = tokio::spawn(write_loop(sink, queue, conn.inner.shutdown.subscribe()));
        tokio::spawn(drive(conn.clone(), frames, writer, ctx));

        conn
    }

    /// Process-unique connection number
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Remote address or socket path
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Our sid on this connection, 0 until the session is established
    pub fn local_sid(&self) -> u32 {
        self.inner.local_sid.load(Ordering::Acquire)
    }

    pub fn remote(&self) -> Option<RemotePeer> {
        self.inner
            .remote
            .read()
            .ok()
            .and_then(|remote| remote.clone())
    }

    pub fn is_established(&self) -> bool {
        self.inner
            .remote
            .read()
            .map(|remote| remote.is_some())
            .unwrap_or(false)
    }

    /// Grant or revoke access to handlers registered with `auth`
    pub fn set_authenticated(&self, authenticated: bool) {
        self.inner
            .authenticated
            .store(authenticated, Ordering::Release);
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.authenticated.load(Ordering::Acquire)
    }

    /// Attach `value` to this connection under a concrete `oid`
    pub fn set_attribute(&self, oid: Oid, value: impl Into<String>) -> Result<Option<String>> {
        if !oid.is_concrete() {
            return Err(ProtocolError::InvalidOid(format!(
                "{}: {oid}",
                constants::ERR_OID_GENERIC
            )));
        }
        let mut attributes = self
            .inner
            .attributes
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?;
        Ok(attributes.insert(oid, value.into()))
    }

    pub fn attribute(&self, oid: &Oid) -> Option<String> {
        self.inner
            .attributes
            .read()
            .ok()
            .and_then(|attributes| attributes.get(oid).cloned())
    }

    /// Attributes at or below `ancestor`, in oid order
    pub fn attributes_under(&self, ancestor: &Oid) -> Vec<(Oid, String)> {
        self.inner
            .attributes
            .read()
            .map(|attributes| {
                attributes
                    .iter()
                    .filter(|(oid, _)| oid.is_child_of(ancestor))
                    .map(|(oid, value)| (oid.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn remove_attribute(&self, oid: &Oid) -> Option<String> {
        self.inner
            .attributes
            .write()
            .ok()
            .and_then(|mut attributes| attributes.remove(oid))
    }

    pub fn traffic(&self) -> TrafficSnapshot {
        self.inner.traffic.snapshot()
    }

    /// Requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.inner.responses.pending()
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow() || *self.inner.done.borrow()
    }

    /// Resolves once the connection is fully torn down
    pub async fn closed(&self) {
        let mut done = self.inner.done.subscribe();
        let _ = done.wait_for(|done| *done).await;
    }

    /// Send `Disconnect` if possible, then stop both tasks
    #[instrument(skip(self), fields(peer = %self.peer()))]
    pub async fn close(&self) {
        if !self.is_closed() {
            if let Some(remote) = self.remote() {
                let bye = Envelope::event(self.local_sid(), remote.sid, Message::Disconnect);
                let _ = self.inner.outbound.try_send(bye);
            }
            self.inner.shutdown.send_replace(true);
        }
        self.closed().await;
    }

    /// Wait for the session handshake to finish
    #[instrument(skip(self), fields(peer = %self.peer()))]
    pub async fn await_handshake(&self, timeout: Duration) -> Result<SessionEvent> {
        let mut session = self.inner.session.subscribe();
        let event = {
            let guard = with_timeout(session.wait_for(|event| event.is_some()), timeout)
                .await?
                .map_err(|_| ProtocolError::ConnectionClosed)?;
            (*guard).unwrap_or_else(SessionEvent::failure)
        };

        if event.success {
            Ok(event)
        } else {
            Err(ProtocolError::HandshakeError(
                "Session handshake was rejected".to_string(),
            ))
        }
    }

    /// Send an event to the remote peer
    pub async fn send(&self, message: Message) -> Result<()> {
        let remote = self.established_remote()?;
        self.send_envelope(Envelope::event(self.local_sid(), remote.sid, message))
            .await
    }

    /// Queue an envelope as-is; waits while the outbound queue is full
    pub async fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }

        self.inner
            .outbound
            .send(envelope)
            .await
            .map_err(|_| ProtocolError::TransportError(constants::ERR_WRITER_GONE.to_string()))
    }

    /// Send a request and wait `message_timeout` for its response
    pub async fn request(&self, message: Message) -> Result<Envelope> {
        self.request_with_timeout(message, self.inner.message_timeout)
            .await
    }

    #[instrument(skip(self, message), fields(peer = %self.peer(), opcode = %message.opcode()))]
    pub async fn request_with_timeout(&self, message: Message, timeout: Duration) -> Result<Envelope> {
        let remote = self.established_remote()?;
        let envelope = Envelope::request(self.local_sid(), remote.sid, message);
        let id = envelope.id;

        let waiter = self.inner.responses.register(id)?;
        if let Err(e) = self.send_envelope(envelope).await {
            self.inner.responses.cancel(id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => {
                self.inner.responses.cancel(id);
                global_metrics().response_timed_out();
                debug!(id, "Request timed out");
                Err(ProtocolError::Timeout)
            }
        }
    }

    fn established_remote(&self) -> Result<RemotePeer> {
        self.remote().ok_or_else(|| {
            ProtocolError::HandshakeError(constants::ERR_HANDSHAKE_INCOMPLETE.to_string())
        })
    }

    /// Answer `request`: a response if it expects one, an event otherwise
    async fn reply(&self, request: &Envelope, message: Message) -> Result<()> {
        let envelope = if request.is_event() {
            Envelope::event(self.local_sid(), request.from, message)
        } else {
            Envelope::response(request, self.local_sid(), message)
        };
        self.send_envelope(envelope).await
    }

    async fn handle_inbound(&self, envelope: Envelope, ctx: &EndpointContext) -> Result<Flow> {
        if !self.is_established() {
            return self.handle_handshake(envelope, ctx).await;
        }

        if !envelope.is_event() && self.inner.responses.is_pending(envelope.id) {
            if self.inner.responses.complete(envelope) {
                global_metrics().response_matched();
            }
            return Ok(Flow::Continue);
        }

        match envelope.message {
            Message::Ping => {
                self.reply(&envelope, Message::Pong).await?;
                return Ok(Flow::Continue);
            }
            Message::Pong => {
                trace!(peer = %self.peer(), "Pong");
                return Ok(Flow::Continue);
            }
            Message::Disconnect => return Ok(Flow::Close),
            Message::StreamEvent { stream_id, data } => {
                if !ctx.streams.deliver(stream_id, data) {
                    debug!(stream_id, "Dropped event for unknown stream");
                }
                return Ok(Flow::Continue);
            }
            Message::StopStream { stream_id } => {
                ctx.streams.stop(stream_id);
                return Ok(Flow::Continue);
            }
            Message::SessionRequest { .. } | Message::SessionResponse { .. } => {
                global_metrics().protocol_error();
                warn!(peer = %self.peer(), "Ignoring session message on an established session");
                return Ok(Flow::Continue);
            }
            _ => {}
        }

        let remote = self.established_remote()?;
        let handler_ctx = HandlerContext {
            envelope,
            remote,
            authenticated: self.is_authenticated(),
        };

        match ctx.dispatcher.dispatch(&handler_ctx) {
            Ok(Dispatch::Handled(Some(message))) => {
                self.reply(&handler_ctx.envelope, message).await?;
            }
            Ok(Dispatch::Handled(None)) => {}
            Ok(Dispatch::Unhandled) => {
                global_metrics().dispatch_unhandled();
                debug!(
                    opcode = %handler_ctx.envelope.message.opcode(),
                    from = handler_ctx.envelope.from,
                    instance = %handler_ctx.remote.instance,
                    "Unhandled message"
                );
            }
            Err(e) => {
                global_metrics().dispatch_error();
                warn!(
                    opcode = %handler_ctx.envelope.message.opcode(),
                    error = %e,
                    "Handler failed"
                );
                if !handler_ctx.envelope.is_event() {
                    let outcome = Message::Outcome(Outcome::failure(e.to_string()));
                    self.reply(&handler_ctx.envelope, outcome).await?;
                }
            }
        }

        Ok(Flow::Continue)
    }

    async fn handle_handshake(&self, envelope: Envelope, ctx: &EndpointContext) -> Result<Flow> {
        let result = match self.inner.role {
            Role::Responder => {
                global_metrics().handshake_attempt();
                session::server_session_response(
                    ctx.local_sid(),
                    &ctx.identity,
                    &envelope,
                    |sid| ctx.connections.contains(sid),
                )
                .map(|(peer, response, event)| (peer, Some(response), event))
            }
            Role::Requester => {
                session::client_session_complete(&ctx.identity, self.inner.handshake_id, &envelope)
                    .map(|(local, peer, event)| {
                        self.inner.local_sid.store(local.sid, Ordering::Release);
                        ctx.learn_local_sid(local.sid);
                        (peer, None, event)
                    })
            }
        };

        let (peer, response, event) = match result.and_then(|accepted| self.claim(accepted, ctx)) {
            Ok(accepted) => accepted,
            Err(e) => {
                global_metrics().handshake_failed();
                warn!(peer = %self.peer(), error = %e, "Session handshake failed");
                self.inner
                    .session
                    .send_replace(Some(SessionEvent::failure()));
                return Err(e);
            }
        };

        if let Some(response) = response {
            self.send_envelope(response).await?;
        }

        info!(
            peer = %self.peer(),
            remote_sid = peer.sid,
            instance = %peer.instance,
            "Session established"
        );

        global_metrics().handshake_success();
        self.inner.session.send_replace(Some(event));

        Ok(Flow::Continue)
    }

    /// Record the peer and store this connection under its sid.
    ///
    /// A responder only ever claims a vacant sid, so a grant never displaces
    /// a live session.
    fn claim(
        &self,
        accepted: (RemotePeer, Option<Envelope>, SessionEvent),
        ctx: &EndpointContext,
    ) -> Result<(RemotePeer, Option<Envelope>, SessionEvent)> {
        let sid = accepted.0.sid;
        match self.inner.role {
            Role::Responder => {
                if !ctx.connections.insert_new(sid, self.clone()) {
                    return Err(ProtocolError::HandshakeError(
                        constants::ERR_SID_IN_USE.to_string(),
                    ));
                }
            }
            Role::Requester => {
                ctx.connections.insert(sid, self.clone());
            }
        }

        let mut remote = self
            .inner
            .remote
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?;
        *remote = Some(accepted.0.clone());

        Ok(accepted)
    }

    fn finish(&self, ctx: &EndpointContext) {
        self.inner.responses.fail_all();
        ctx.streams.stop_owned_by(self.id());

        if let Some(remote) = self.remote() {
            ctx.connections.remove_if(remote.sid, self.id());
        }

        if self.inner.session.borrow().is_none() {
            self.inner
                .session
                .send_replace(Some(SessionEvent::failure()));
        }

        global_metrics().connection_closed();
        info!(peer = %self.peer(), id = self.id(), "Connection closed");
        self.inner.done.send_replace(true);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("role", &self.inner.role)
            .field("local_sid", &self.local_sid())
            .field("remote", &self.remote())
            .finish()
    }
}

/// Resolves once `shutdown` is set; the watch guard never outlives the call
async fn closing(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closing| *closing).await;
}

async fn write_loop<S>(
    mut sink: Sink<S>,
    mut queue: mpsc::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            next = queue.recv() => match next {
                Some(envelope) => sink.send(envelope).await?,
                None => break,
            },
            _ = closing(&mut shutdown) => break,
        }
    }

    // Flush whatever was queued before the shutdown
    while let Ok(envelope) = queue.try_recv() {
        sink.feed(envelope).await?;
    }
    sink.close().await
}

async fn drive<S>(
    conn: Connection,
    mut frames: Frames<S>,
    mut writer: JoinHandle<Result<()>>,
    ctx: Arc<EndpointContext>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let transport = &ctx.config.transport;
    let idle = transport.idle_timeout;

    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + transport.heartbeat_interval,
        transport.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let traffic_enabled = !transport.traffic_interval.is_zero();
    let traffic_period = if traffic_enabled {
        transport.traffic_interval
    } else {
        Duration::from_secs(3600)
    };
    let mut traffic_tick = tokio::time::interval_at(Instant::now() + traffic_period, traffic_period);

    let idle_deadline = tokio::time::sleep(idle);
    tokio::pin!(idle_deadline);

    let handshake_timeout = match conn.role() {
        Role::Responder => ctx.config.server.handshake_timeout,
        Role::Requester => ctx.config.client.handshake_timeout,
    };
    let handshake_deadline = tokio::time::sleep(handshake_timeout);
    tokio::pin!(handshake_deadline);

    let mut shutdown = conn.inner.shutdown.subscribe();
    let mut writer_done = false;

    let reason = loop {
        tokio::select! {
            _ = closing(&mut shutdown) => break "closed locally",

            frame = frames.next() => match frame {
                Some(Ok(envelope)) => {
                    idle_deadline.as_mut().reset(Instant::now() + idle);
                    match conn.handle_inbound(envelope, &ctx).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Close) => break "peer disconnected",
                        Err(e) => {
                            warn!(peer = %conn.peer(), error = %e, "Closing connection");
                            break "protocol error";
                        }
                    }
                }
                Some(Err(e)) => {
                    global_metrics().protocol_error();
                    warn!(peer = %conn.peer(), error = %e, "Failed to decode frame");
                    break "invalid frame";
                }
                None => break "closed by peer",
            },

            _ = &mut handshake_deadline, if !conn.is_established() => {
                global_metrics().handshake_failed();
                warn!(
                    peer = %conn.peer(),
                    timeout_ms = handshake_timeout.as_millis() as u64,
                    "Session handshake timed out"
                );
                break "handshake timeout";
            }

            _ = heartbeat.tick(), if conn.is_established() => {
                if let Err(e) = conn.send(Message::Ping).await {
                    debug!(peer = %conn.peer(), error = %e, "Failed to send heartbeat");
                }
            }

            _ = &mut idle_deadline => {
                global_metrics().connection_error();
                warn!(
                    peer = %conn.peer(),
                    error = %ProtocolError::ConnectionTimeout,
                    idle_ms = idle.as_millis() as u64,
                    "Closing idle connection"
                );
                break "idle timeout";
            }

            _ = traffic_tick.tick(), if traffic_enabled => {
                let (read, written) = conn.inner.traffic.take_interval();
                info!(peer = %conn.peer(), bytes_read = read, bytes_written = written, "Traffic");
            }

            result = &mut writer, if !writer_done => {
                writer_done = true;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(peer = %conn.peer(), error = %e, "Write failed"),
                    Err(e) => warn!(peer = %conn.peer(), error = %e, "Writer task failed"),
                }
                global_metrics().connection_error();
                break "writer stopped";
            }
        }
    };

    debug!(peer = %conn.peer(), reason, "Connection loop finished");
    conn.inner.shutdown.send_replace(true);

    if !writer_done && tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    conn.finish(&ctx);
}
