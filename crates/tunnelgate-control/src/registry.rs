//! Connection registry
//!
//! Maps a peer identifier to its live tunnel connection. At most one
//! connection is registered per identifier; a newer registration supersedes
//! the older one, and a session may only remove the entry it installed.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::connection::TunnelConnection;

/// Snapshot of a registered peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredPeer {
    pub peer_id: String,
    pub connection_id: String,
    pub remote_addr: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
}

/// Registry of live tunnel connections
///
/// Critical sections never span an `.await`; the lock is a plain `RwLock` so
/// sessions can unregister from a drop guard.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, Arc<TunnelConnection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its peer identifier
    ///
    /// Returns the connection that was superseded, if any. The registry does
    /// not close it; that is the caller's job.
    pub fn register(&self, connection: Arc<TunnelConnection>) -> Option<Arc<TunnelConnection>> {
        let peer_id = connection.peer_id().to_string();
        let connection_id = connection.connection_id().to_string();

        let previous = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer_id.clone(), connection);

        if let Some(ref replaced) = previous {
            tracing::info!(
                peer_id = %peer_id,
                connection_id = %connection_id,
                replaced_connection_id = %replaced.connection_id(),
                old_connected_at = %replaced.connected_at(),
                "Re-registered peer (superseded previous connection)"
            );
        } else {
            tracing::info!(
                peer_id = %peer_id,
                connection_id = %connection_id,
                "Registered new peer"
            );
        }

        previous
    }

    /// Look up the live connection for a peer
    pub fn lookup(&self, peer_id: &str) -> Option<Arc<TunnelConnection>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer_id)
            .cloned()
    }

    /// Remove a peer's entry, but only if it is still `connection_id`
    ///
    /// Returns true if an entry was removed. A session whose connection was
    /// superseded gets `false` and leaves the newer registration alone.
    pub fn unregister(&self, peer_id: &str, connection_id: &str) -> bool {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match connections.get(peer_id) {
            Some(current) if current.connection_id() == connection_id => {
                connections.remove(peer_id);
                tracing::info!(
                    peer_id = %peer_id,
                    connection_id = %connection_id,
                    "Unregistered peer"
                );
                true
            }
            Some(current) => {
                tracing::debug!(
                    peer_id = %peer_id,
                    connection_id = %connection_id,
                    current_connection_id = %current.connection_id(),
                    "Skipping unregister: connection already superseded"
                );
                false
            }
            None => {
                tracing::debug!(peer_id = %peer_id, "Attempted to unregister unknown peer");
                false
            }
        }
    }

    /// List all registered peers
    pub fn list(&self) -> Vec<RegisteredPeer> {
        let connections = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut peers: Vec<RegisteredPeer> = connections
            .values()
            .map(|conn| RegisteredPeer {
                peer_id: conn.peer_id().to_string(),
                connection_id: conn.connection_id().to_string(),
                remote_addr: conn.remote_addr(),
                connected_at: conn.connected_at(),
            })
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    /// Close every registered connection; sessions unregister themselves
    pub fn close_all(&self, reason: &str) -> usize {
        let connections: Vec<Arc<TunnelConnection>> = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for connection in &connections {
            connection.close(reason);
        }

        if !connections.is_empty() {
            tracing::info!(count = connections.len(), reason = %reason, "Closed all tunnel connections");
        }
        connections.len()
    }

    /// Get the total count of registered peers
    pub fn count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
