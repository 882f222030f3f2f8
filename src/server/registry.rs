//! # Connection Registry
//!
//! Directory of live sessions keyed by peer identity (the client's remote socket
//! address). The accept loop inserts, each session handler removes itself when it
//! ends, and relay broadcasts take snapshots.
//!
//! One `RwLock` guards the map. Every method holds it only for the map
//! operation itself and hands out cloned `Arc<Connection>`s, so no caller ever
//! performs network I/O while holding the lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::common::connection::Connection;

/// Identity of a connected peer: its address and port.
pub type PeerId = SocketAddr;

#[derive(Default)]
pub struct ConnectionRegistry {
    peers: RwLock<HashMap<PeerId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Returns the connection previously stored under the
    /// same identity, if any.
    pub async fn insert(&self, peer: PeerId, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        self.peers.write().await.insert(peer, connection)
    }

    pub async fn remove(&self, peer: &PeerId) -> Option<Arc<Connection>> {
        self.peers.write().await.remove(peer)
    }

    /// Remove `peer` only while it still maps to `connection`.
    ///
    /// A session uses this to unregister itself, so a newer session that took
    /// over the same identity stays registered.
    pub async fn remove_if_same(&self, peer: &PeerId, connection: &Arc<Connection>) -> bool {
        let mut peers = self.peers.write().await;
        match peers.get(peer) {
            Some(current) if Arc::ptr_eq(current, connection) => {
                peers.remove(peer);
                true
            }
            _ => false,
        }
    }

    pub async fn contains(&self, peer: &PeerId) -> bool {
        self.peers.read().await.contains_key(peer)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    pub async fn peers(&self) -> Vec<PeerId> {
        self.peers.read().await.keys().copied().collect()
    }

    /// Snapshot of every session except `sender`.
    pub async fn others(&self, sender: &PeerId) -> Vec<(PeerId, Arc<Connection>)> {
        self.peers
            .read()
            .await
            .iter()
            .filter(|(peer, _)| *peer != sender)
            .map(|(peer, conn)| (*peer, Arc::clone(conn)))
            .collect()
    }

    /// Remove and return every session (used on shutdown).
    pub async fn drain(&self) -> Vec<(PeerId, Arc<Connection>)> {
        self.peers.write().await.drain().collect()
    }
}
