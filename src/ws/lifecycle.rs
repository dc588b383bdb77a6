//! Per-connection lifecycle: `Pending -> Open -> Closed`.
//!
//! The guard owns the registration of one connection and makes the
//! register/unregister pair fire exactly once, no matter which of the
//! close triggers (peer disconnect, read error, keepalive timeout) wins.
//! A dispatcher-side eviction can still race a close; both paths end in
//! the registry's idempotent `unregister`.

use crate::tasks::UserId;
use crate::ws::registry::{ConnectionHandle, ConnectionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake done, identity resolved, not yet registered.
    Pending,
    /// Registered; a valid dispatch target.
    Open,
    /// Terminal. Unregistered (if it ever was registered).
    Closed,
}

/// Tracks one connection through its states and drives the registry at
/// the two transitions that touch it.
#[derive(Debug)]
pub struct ConnectionLifecycle {
    user: UserId,
    handle: ConnectionHandle,
    state: ConnectionState,
}

impl ConnectionLifecycle {
    pub fn new(user: UserId, handle: ConnectionHandle) -> Self {
        Self {
            user,
            handle,
            state: ConnectionState::Pending,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// `Pending -> Open`: registers the connection. Returns false (and
    /// does not touch the registry) from any other state.
    pub fn open(&mut self, registry: &ConnectionRegistry) -> bool {
        if self.state != ConnectionState::Pending {
            return false;
        }
        registry.register(self.user, self.handle.clone());
        self.state = ConnectionState::Open;
        true
    }

    /// Transition to `Closed`. Unregisters iff the connection was `Open`;
    /// closing from `Pending` or an already-`Closed` connection leaves the
    /// registry untouched. Returns whether an unregister was issued.
    pub fn close(&mut self, registry: &ConnectionRegistry) -> bool {
        let was_open = self.state == ConnectionState::Open;
        self.state = ConnectionState::Closed;
        if was_open {
            registry.unregister(self.user, self.handle.id());
        }
        was_open
    }
}
