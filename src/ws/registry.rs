//! Connection registry: tracks all active WebSocket connections per user.
//! A user can have multiple concurrent connections (multiple devices/tabs).
//!
//! The map is sharded (DashMap), so lifecycles of different users never
//! contend with each other; register/unregister/snapshot for one user
//! serialize on that user's entry only. The registry never holds a lock
//! across I/O — senders are non-blocking mpsc handles and the per-connection
//! writer task does the actual network writes.

use axum::extract::ws::Message;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::tasks::UserId;
use crate::ws::ConnectionSender;

/// Identity of a single accepted connection, distinct from the user that
/// owns it. Lets `unregister` target one handle even when a user has
/// several connections backed by equally-alive senders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Cloneable handle to one live connection: the id plus the sender half
/// of the connection's outbound channel. Sends never block; they enqueue
/// onto the writer task's channel.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(sender: ConnectionSender) -> Self {
        Self {
            id: ConnectionId::new(),
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueue a message for the connection's writer task.
    /// Fails only when the writer side is gone (peer disconnected).
    pub fn send(&self, msg: Message) -> Result<(), mpsc::error::SendError<Message>> {
        self.sender.send(msg)
    }
}

/// Registry of live connections keyed by owning user.
///
/// Invariant: no entry ever maps to an empty vec — the last unregister
/// for a user removes the entry itself, under the same entry guard.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, Vec<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection under `user`, creating the entry on first use.
    /// The connection is a valid dispatch target as soon as this returns.
    /// Registering the same handle twice is a caller error; the transport
    /// lifecycle guard is the only in-crate caller and calls this once.
    pub fn register(&self, user: UserId, handle: ConnectionHandle) {
        let count = {
            let mut entry = self.connections.entry(user).or_default();
            entry.push(handle);
            entry.len()
        };
        tracing::debug!(user = %user, connections = count, "Connection registered");
    }

    /// Remove the connection with `id` from `user`'s set. Returns whether
    /// a handle was actually removed; an absent user or id is a no-op, so
    /// a lifecycle close racing a dispatcher failure path is harmless.
    pub fn unregister(&self, user: UserId, id: ConnectionId) -> bool {
        let removed = match self.connections.entry(user) {
            Entry::Occupied(mut occupied) => {
                let handles = occupied.get_mut();
                let before = handles.len();
                handles.retain(|handle| handle.id != id);
                let removed = handles.len() < before;
                if handles.is_empty() {
                    occupied.remove();
                }
                removed
            }
            Entry::Vacant(_) => false,
        };

        if removed {
            tracing::debug!(user = %user, connection = %id, "Connection unregistered");
        }
        removed
    }

    /// Snapshot of `user`'s current connections, empty if none. A cloned
    /// vec, never a live view — callers may iterate while connections
    /// close concurrently.
    pub fn connections_for(&self, user: UserId) -> Vec<ConnectionHandle> {
        self.connections
            .get(&user)
            .map(|handles| handles.clone())
            .unwrap_or_default()
    }

    /// Number of live connections for `user`.
    pub fn connection_count(&self, user: UserId) -> usize {
        self.connections.get(&user).map(|h| h.len()).unwrap_or(0)
    }

    /// True when no user has any live connection.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
