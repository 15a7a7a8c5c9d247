//! # Streams
//!
//! Ephemeral flows of events between two endpoints. A stream is identified by
//! a random non-zero id chosen by the side that opens it; every item travels
//! as a `StreamEvent` and either side ends the flow with `StopStream`.
//!
//! - inbound streams are sinks registered with [`StreamStore::open_inbound`];
//!   the connection driver delivers matching `StreamEvent`s into them
//! - outbound streams are tasks started with [`StreamStore::spawn_outbound`]
//!   that forward a local source to a remote sid
//!
//! Both ends must agree on the id. The consumer usually opens its inbound
//! stream first, announces the id in an application message, and the
//! producer forwards with [`StreamStore::spawn_outbound_as`].

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{Envelope, Message};
use crate::transport::connection::Connection;
use crate::utils::metrics::global_metrics;
use futures::{Stream, StreamExt};
use rand::Rng;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

pub type StreamId = u32;

enum Slot {
    Inbound {
        sink: mpsc::UnboundedSender<Vec<u8>>,
        owner: Option<u64>,
    },
    Outbound {
        task: AbortHandle,
        owner: u64,
    },
}

impl Slot {
    fn owner(&self) -> Option<u64> {
        match self {
            Slot::Inbound { owner, .. } => *owner,
            Slot::Outbound { owner, .. } => Some(*owner),
        }
    }

    fn end(self) {
        if let Slot::Outbound { task, .. } = self {
            task.abort();
        }
    }
}

/// Registry of the active streams of one endpoint
#[derive(Clone, Default)]
pub struct StreamStore {
    slots: Arc<Mutex<HashMap<StreamId, Slot>>>,
}

/// Receiving end of a stream
pub struct InboundStream {
    id: StreamId,
    events: UnboundedReceiverStream<Vec<u8>>,
}

impl InboundStream {
    /// Id the remote side must address its events to
    pub fn id(&self) -> StreamId {
        self.id
    }
}

impl Stream for InboundStream {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

impl StreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink for events sent by any connection
    pub fn open_inbound(&self) -> InboundStream {
        self.register_inbound(None)
    }

    /// Register a sink that also ends when `connection` closes
    pub fn open_inbound_on(&self, connection: &Connection) -> InboundStream {
        self.register_inbound(Some(connection.id()))
    }

    fn register_inbound(&self, owner: Option<u64>) -> InboundStream {
        let (sink, events) = mpsc::unbounded_channel();
        let id = self.insert_with(|_| Slot::Inbound { sink, owner });
        debug!(stream_id = id, "Opened inbound stream");
        InboundStream {
            id,
            events: UnboundedReceiverStream::new(events),
        }
    }

    /// Forward every item of `source` to `to` over `connection`.
    ///
    /// When the source ends a `StopStream` is sent and the stream is
    /// unregistered. [`StreamStore::stop`] aborts the forwarding task.
    pub fn spawn_outbound<S>(&self, connection: &Connection, to: u32, source: S) -> StreamId
    where
        S: Stream<Item = Vec<u8>> + Send + 'static,
    {
        let id = self.insert_with(|id| self.outbound_slot(connection, to, id, source));
        debug!(stream_id = id, to, "Opened outbound stream");
        id
    }

    /// Like [`StreamStore::spawn_outbound`] but under an id chosen by the
    /// receiving side, typically the id of its [`InboundStream`]
    pub fn spawn_outbound_as<S>(
        &self,
        connection: &Connection,
        to: u32,
        id: StreamId,
        source: S,
    ) -> Result<()>
    where
        S: Stream<Item = Vec<u8>> + Send + 'static,
    {
        if id == 0 {
            return Err(ProtocolError::StreamError(
                constants::ERR_STREAM_ID_ZERO.to_string(),
            ));
        }

        let mut slots = self
            .slots
            .lock()
            .map_err(|_| ProtocolError::StreamError(constants::ERR_LOCK_POISONED.to_string()))?;
        if slots.contains_key(&id) {
            return Err(ProtocolError::StreamError(format!(
                "Stream {id} is already open"
            )));
        }

        slots.insert(id, self.outbound_slot(connection, to, id, source));
        global_metrics().stream_opened();
        debug!(stream_id = id, to, "Opened outbound stream");
        Ok(())
    }

    fn outbound_slot<S>(&self, connection: &Connection, to: u32, id: StreamId, source: S) -> Slot
    where
        S: Stream<Item = Vec<u8>> + Send + 'static,
    {
        let store = self.clone();
        let conn = connection.clone();

        let task = tokio::spawn(async move {
            let mut source = Box::pin(source);
            while let Some(data) = source.next().await {
                let event = Envelope::event(
                    conn.local_sid(),
                    to,
                    Message::StreamEvent {
                        stream_id: id,
                        data,
                    },
                );
                if conn.send_envelope(event).await.is_err() {
                    break;
                }
            }

            let stop = Envelope::event(conn.local_sid(), to, Message::StopStream { stream_id: id });
            let _ = conn.send_envelope(stop).await;
            store.forget(id);
        });

        Slot::Outbound {
            task: task.abort_handle(),
            owner: connection.id(),
        }
    }

    /// Push one event into an inbound stream; false if the id is unknown
    pub fn deliver(&self, id: StreamId, data: Vec<u8>) -> bool {
        let Ok(mut slots) = self.slots.lock() else {
            return false;
        };

        let delivered = match slots.get(&id) {
            Some(Slot::Inbound { sink, .. }) => {
                trace!(stream_id = id, bytes = data.len(), "Stream event");
                sink.send(data).is_ok()
            }
            _ => return false,
        };

        // The consumer is gone; nothing will ever read this stream again
        if !delivered {
            slots.remove(&id);
            global_metrics().stream_closed();
            debug!(stream_id = id, "Dropped stream without consumer");
        }
        delivered
    }

    /// End a stream: inbound streams yield `None`, outbound tasks are aborted
    pub fn stop(&self, id: StreamId) -> bool {
        match self.take(id) {
            Some(slot) => {
                slot.end();
                global_metrics().stream_closed();
                debug!(stream_id = id, "Stopped stream");
                true
            }
            None => false,
        }
    }

    /// Number of registered streams
    pub fn active(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    /// End every stream bound to connection `owner`
    pub(crate) fn stop_owned_by(&self, owner: u64) {
        let ended: Vec<Slot> = match self.slots.lock() {
            Ok(mut slots) => {
                let ids: Vec<StreamId> = slots
                    .iter()
                    .filter(|(_, slot)| slot.owner() == Some(owner))
                    .map(|(id, _)| *id)
                    .collect();
                ids.iter().filter_map(|id| slots.remove(id)).collect()
            }
            Err(_) => return,
        };

        for slot in ended {
            slot.end();
            global_metrics().stream_closed();
        }
    }

    /// Insert the slot built by `make` under a fresh id.
    ///
    /// The lock is held while `make` runs so a task spawned by it cannot
    /// unregister itself before it is registered.
    fn insert_with<F>(&self, make: F) -> StreamId
    where
        F: FnOnce(StreamId) -> Slot,
    {
        let mut rng = rand::rng();
        let Ok(mut slots) = self.slots.lock() else {
            // A stream that cannot be tracked ends at once
            let id = rng.random_range(1..=u32::MAX);
            make(id).end();
            return id;
        };

        let id = loop {
            let id = rng.random_range(1..=u32::MAX);
            if !slots.contains_key(&id) {
                break id;
            }
        };
        slots.insert(id, make(id));
        global_metrics().stream_opened();
        id
    }

    fn take(&self, id: StreamId) -> Option<Slot> {
        self.slots.lock().ok().and_then(|mut slots| slots.remove(&id))
    }

    /// Unregister a stream that ended on its own
    fn forget(&self, id: StreamId) {
        if self.take(id).is_some() {
            global_metrics().stream_closed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_and_stop_inbound() {
        let store = StreamStore::new();
        let mut inbound = store.open_inbound();
        let id = inbound.id();
        assert_ne!(id, 0);
        assert_eq!(store.active(), 1);

        assert!(store.deliver(id, b"first".to_vec()));
        assert!(store.deliver(id, b"second".to_vec()));
        assert!(store.stop(id));
        assert!(!store.stop(id));

        // Buffered events survive the stop, then the stream ends
        assert_eq!(inbound.next().await, Some(b"first".to_vec()));
        assert_eq!(inbound.next().await, Some(b"second".to_vec()));
        assert_eq!(inbound.next().await, None);
        assert_eq!(store.active(), 0);
    }

    #[test]
    fn test_unknown_stream_dropped() {
        let store = StreamStore::new();
        assert!(!store.deliver(12345, vec![1, 2, 3]));
        assert!(!store.stop(12345));
    }

    #[test]
    fn test_dropped_consumer_refuses_delivery() {
        let store = StreamStore::new();
        let inbound = store.open_inbound();
        let id = inbound.id();
        drop(inbound);

        assert!(!store.deliver(id, vec![0]));
        assert!(!store.stop(id));
        assert_eq!(store.active(), 0);
    }

    #[test]
    fn test_abandoned_streams_released_on_delivery() {
        let store = StreamStore::new();
        let ids: Vec<_> = (0..50).map(|_| store.open_inbound().id()).collect();
        assert_eq!(store.active(), 50);

        for id in ids {
            assert!(!store.deliver(id, vec![1, 2, 3]));
        }
        assert_eq!(store.active(), 0);
    }

    #[test]
    fn test_owned_streams_end_with_owner() {
        let store = StreamStore::new();
        let owned = store.register_inbound(Some(7));
        let other = store.register_inbound(Some(8));
        let free = store.open_inbound();

        store.stop_owned_by(7);
        assert!(!store.deliver(owned.id(), vec![1]));
        assert!(store.deliver(other.id(), vec![1]));
        assert!(store.deliver(free.id(), vec![1]));
        assert_eq!(store.active(), 2);
    }
}
