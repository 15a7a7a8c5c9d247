//! Correlation of responses with the requests that are waiting for them.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::Envelope;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

/// Pending requests of one connection, keyed by envelope id
#[derive(Debug, Default)]
pub struct ResponseRegistry {
    waiters: Mutex<HashMap<u32, oneshot::Sender<Envelope>>>,
}

impl ResponseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the envelope answering request `id`.
    ///
    /// The receiver errors if the registry drops the waiter, which happens on
    /// `cancel`, `fail_all` or when a second registration replaces it.
    pub fn register(&self, id: u32) -> Result<oneshot::Receiver<Envelope>> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?
            .insert(id, tx);
        Ok(rx)
    }

    /// Hand `envelope` to its waiter; false if nobody is waiting for its id
    pub fn complete(&self, envelope: Envelope) -> bool {
        if envelope.is_event() {
            return false;
        }

        let waiter = match self.waiters.lock() {
            Ok(mut waiters) => waiters.remove(&envelope.id),
            Err(_) => None,
        };

        match waiter {
            Some(tx) => {
                trace!(id = envelope.id, "Matched response");
                // The requester may have given up already
                let _ = tx.send(envelope);
                true
            }
            None => false,
        }
    }

    /// Whether a response with this id would be claimed
    pub fn is_pending(&self, id: u32) -> bool {
        self.waiters
            .lock()
            .map(|waiters| waiters.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn cancel(&self, id: u32) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.remove(&id);
        }
    }

    pub fn pending(&self) -> usize {
        self.waiters.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Drop every waiter; their receivers resolve with an error
    pub fn fail_all(&self) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.clear();
        }
    }
}
