//! Which session each live connection currently refers to.

use colloquy_core::{ConnectionId, SessionId};
use std::collections::HashMap;
use std::sync::RwLock;

/// Connection id to session id bindings.
///
/// Bindings live only as long as the transport connection; nothing here is
/// persisted.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    bindings: RwLock<HashMap<ConnectionId, SessionId>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a connection to a session, replacing any previous binding.
    pub fn bind(&self, connection: ConnectionId, session: SessionId) -> Option<SessionId> {
        self.bindings
            .write()
            .expect("connection registry lock poisoned")
            .insert(connection, session)
    }

    /// Returns the session a connection is bound to.
    #[must_use]
    pub fn lookup(&self, connection: ConnectionId) -> Option<SessionId> {
        self.bindings
            .read()
            .expect("connection registry lock poisoned")
            .get(&connection)
            .copied()
    }

    /// Removes a connection's binding. Idempotent.
    pub fn unbind(&self, connection: ConnectionId) -> Option<SessionId> {
        self.bindings
            .write()
            .expect("connection registry lock poisoned")
            .remove(&connection)
    }

    /// Returns how many live connections are bound to a session.
    #[must_use]
    pub fn connections_for(&self, session: SessionId) -> usize {
        self.bindings
            .read()
            .expect("connection registry lock poisoned")
            .values()
            .filter(|s| **s == session)
            .count()
    }

    /// Returns the number of live bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings
            .read()
            .expect("connection registry lock poisoned")
            .len()
    }

    /// Returns true if no connection is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
