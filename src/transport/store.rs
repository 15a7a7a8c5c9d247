//! Established connections keyed by the remote session id.

use crate::transport::connection::Connection;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ConnectionStore {
    connections: RwLock<HashMap<u32, Connection>>,
}

impl ConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `connection` under `sid`, returning the connection it replaces
    pub fn insert(&self, sid: u32, connection: Connection) -> Option<Connection> {
        let previous = self
            .connections
            .write()
            .ok()
            .and_then(|mut map| map.insert(sid, connection));
        debug!(sid, replaced = previous.is_some(), "Connection stored");
        previous
    }

    /// Track `connection` under `sid` only if no connection holds it yet
    pub fn insert_new(&self, sid: u32, connection: Connection) -> bool {
        let inserted = match self.connections.write() {
            Ok(mut map) => match map.entry(sid) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(connection);
                    true
                }
            },
            Err(_) => false,
        };
        debug!(sid, inserted, "Connection reserved");
        inserted
    }

    pub fn contains(&self, sid: u32) -> bool {
        self.connections
            .read()
            .map(|map| map.contains_key(&sid))
            .unwrap_or(false)
    }

    pub fn remove(&self, sid: u32) -> Option<Connection> {
        self.connections.write().ok().and_then(|mut map| map.remove(&sid))
    }

    /// Remove `sid` only while it still maps to connection `id`
    pub(crate) fn remove_if(&self, sid: u32, id: u64) -> bool {
        match self.connections.write() {
            Ok(mut map) if map.get(&sid).map(Connection::id) == Some(id) => {
                map.remove(&sid);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, sid: u32) -> Option<Connection> {
        self.connections
            .read()
            .ok()
            .and_then(|map| map.get(&sid).cloned())
    }

    pub fn len(&self) -> usize {
        self.connections.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored connection
    pub fn all(&self) -> Vec<Connection> {
        self.connections
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Close every stored connection and wait for them to finish
    pub async fn close_all(&self) {
        let connections = self.all();
        debug!(count = connections.len(), "Closing all connections");
        futures::future::join_all(connections.iter().map(Connection::close)).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::protocol::instance::{InstanceFlavor, InstanceIdentity, InstanceType};
    use crate::transport::{EndpointContext, Role};

    fn idle_connection(ctx: &std::sync::Arc<EndpointContext>) -> Connection {
        let (io, _peer) = tokio::io::duplex(1024);
        Connection::spawn(io, "duplex", Role::Responder, ctx.clone())
    }

    #[tokio::test]
    async fn test_insert_new_keeps_live_connection() {
        let identity = InstanceIdentity::generate(InstanceType::Server, InstanceFlavor::Vanilla);
        let ctx = EndpointContext::new(identity, NetworkConfig::default());
        let store = ConnectionStore::new();

        let first = idle_connection(&ctx);
        let second = idle_connection(&ctx);

        assert!(store.insert_new(7, first.clone()));
        assert!(!store.insert_new(7, second.clone()));
        assert!(store.contains(7));
        assert_eq!(store.get(7).unwrap().id(), first.id());

        // A stale owner cannot evict the holder
        assert!(!store.remove_if(7, second.id()));
        assert!(store.remove_if(7, first.id()));
        assert!(!store.contains(7));
        assert!(store.insert_new(7, second));
    }
}
