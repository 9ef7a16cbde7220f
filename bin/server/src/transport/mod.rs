//! Event transport between clients and the lifecycle controller.
//!
//! This module provides:
//! - The JSON event wire format ([`events`])
//! - The [`EventSink`] seam: "emit event E to connection C"
//! - The event handler that drives the controller ([`handler`])
//! - The WebSocket adapter ([`ws`])

pub mod events;
pub mod handler;
pub mod ws;

use crate::error::TransportError;
use async_trait::async_trait;
use colloquy_core::ConnectionId;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

pub use events::{ClientEvent, HistoryEntry, ServerEvent};
pub use handler::EventHandler;

/// Delivers events to live connections.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits `event` to `connection`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is gone.
    async fn emit(&self, connection: ConnectionId, event: ServerEvent)
    -> Result<(), TransportError>;
}

/// Routes events to the outbound queue of each open socket.
#[derive(Default)]
pub struct ConnectionHub {
    senders: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,
}

impl ConnectionHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and returns the receiving end of its queue.
    pub fn register(&self, connection: ConnectionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .write()
            .expect("connection hub lock poisoned")
            .insert(connection, tx);
        rx
    }

    /// Removes a connection; its queue closes once drained.
    pub fn unregister(&self, connection: ConnectionId) {
        self.senders
            .write()
            .expect("connection hub lock poisoned")
            .remove(&connection);
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.senders
            .read()
            .expect("connection hub lock poisoned")
            .len()
    }

    /// Returns true if no connection is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSink for ConnectionHub {
    async fn emit(
        &self,
        connection: ConnectionId,
        event: ServerEvent,
    ) -> Result<(), TransportError> {
        let closed = TransportError::ConnectionClosed {
            connection_id: connection,
        };
        let senders = self.senders.read().expect("connection hub lock poisoned");
        let sender = senders.get(&connection).ok_or_else(|| closed.clone())?;
        sender.send(event).map_err(|_| closed)
    }
}
