//! Client event handling.
//!
//! Translates inbound events into controller operations and answers on the
//! [`EventSink`]. Handling is independent of the socket implementation so it
//! can be driven directly in tests.

use super::EventSink;
use super::events::{
    ClientEvent, InitPayload, QueryPayload, RestorePayload, ServerEvent, history_entries,
};
use crate::error::TransportError;
use colloquy_conversation::{
    ControllerError, Message, ResponseGenerator, Restored, SessionLifecycleController,
    SessionStart,
};
use colloquy_core::{ConnectionId, SessionId, UserId};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const SESSION_NOT_FOUND: &str = "Session not found.";
const USER_ID_REQUIRED: &str = "User UUID is required.";
const INVALID_USER_ID: &str = "User UUID is invalid.";
const GENERATION_FAILED: &str = "Response generation failed.";
const INTERNAL_ERROR: &str = "Internal error.";

/// Dispatches client events for all connections.
#[derive(Clone)]
pub struct EventHandler {
    controller: Arc<SessionLifecycleController>,
    generator: Arc<dyn ResponseGenerator>,
}

impl EventHandler {
    /// Creates a handler.
    pub fn new(
        controller: Arc<SessionLifecycleController>,
        generator: Arc<dyn ResponseGenerator>,
    ) -> Self {
        Self {
            controller,
            generator,
        }
    }

    /// Handles one inbound event from `connection`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the reply cannot be delivered.
    pub async fn handle(
        &self,
        connection: ConnectionId,
        event: ClientEvent,
        sink: &dyn EventSink,
    ) -> Result<(), TransportError> {
        match event {
            ClientEvent::Init(payload) => self.on_init(connection, payload, sink).await,
            ClientEvent::RestoreSession(payload) => {
                self.on_restore(connection, payload, sink).await
            }
            ClientEvent::Query(payload) => self.on_query(connection, payload, sink).await,
        }
    }

    /// Handles the end of a connection.
    pub async fn on_disconnect(&self, connection: ConnectionId) {
        if let Err(e) = self.controller.disconnect(connection).await {
            warn!(connection_id = %connection, error = %e, "Disconnect handling failed");
        }
    }

    #[instrument(skip(self, payload, sink), fields(connection_id = %connection))]
    async fn on_init(
        &self,
        connection: ConnectionId,
        payload: InitPayload,
        sink: &dyn EventSink,
    ) -> Result<(), TransportError> {
        let user = match payload.user_uuid.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => match raw.parse::<UserId>() {
                Ok(user) => Some(user),
                Err(e) => {
                    debug!(error = %e, "Rejected init with invalid user id");
                    return sink
                        .emit(connection, ServerEvent::error(INVALID_USER_ID))
                        .await;
                }
            },
        };

        match self.controller.init(connection, user).await {
            Ok(start) => sink.emit(connection, session_init(start)).await,
            Err(ControllerError::MissingUserId) => {
                sink.emit(connection, ServerEvent::error(USER_ID_REQUIRED))
                    .await
            }
            Err(e) => {
                warn!(error = %e, "Init failed");
                sink.emit(connection, ServerEvent::error(INTERNAL_ERROR))
                    .await
            }
        }
    }

    #[instrument(skip(self, payload, sink), fields(connection_id = %connection))]
    async fn on_restore(
        &self,
        connection: ConnectionId,
        payload: RestorePayload,
        sink: &dyn EventSink,
    ) -> Result<(), TransportError> {
        let requested = payload
            .session_id
            .as_ref()
            .and_then(|s| s.first())
            .unwrap_or_default();

        match self.controller.restore(connection, requested).await {
            Ok(Restored::Resumed {
                session_id,
                history,
                ..
            }) => {
                sink.emit(
                    connection,
                    ServerEvent::SessionRestored {
                        session_id,
                        chat_history: history_entries(&history),
                    },
                )
                .await
            }
            Ok(Restored::Started(start)) => sink.emit(connection, session_init(start)).await,
            Err(e) => {
                warn!(error = %e, "Restore failed");
                sink.emit(connection, ServerEvent::error(INTERNAL_ERROR))
                    .await
            }
        }
    }

    #[instrument(skip(self, payload, sink), fields(connection_id = %connection))]
    async fn on_query(
        &self,
        connection: ConnectionId,
        payload: QueryPayload,
        sink: &dyn EventSink,
    ) -> Result<(), TransportError> {
        let Some((session, history)) = self.cached_history(&payload.session_id) else {
            return sink
                .emit(connection, ServerEvent::error(SESSION_NOT_FOUND))
                .await;
        };

        let mut fragments = match self
            .generator
            .generate_stream(&payload.question, &history)
            .await
        {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!(session_id = %session, error = %e, "Response generation failed");
                return sink
                    .emit(connection, ServerEvent::error(GENERATION_FAILED))
                    .await;
            }
        };

        sink.emit(connection, ServerEvent::ResponseStart(true))
            .await?;

        let mut output = String::new();
        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(text) => {
                    output.push_str(&text);
                    sink.emit(connection, ServerEvent::Response(text)).await?;
                }
                Err(e) => {
                    warn!(session_id = %session, error = %e, "Response stream failed");
                    sink.emit(connection, ServerEvent::error(GENERATION_FAILED))
                        .await?;
                    return sink.emit(connection, ServerEvent::ResponseEnd(true)).await;
                }
            }
        }

        sink.emit(connection, ServerEvent::ResponseEnd(true)).await?;

        match self
            .controller
            .record_exchange(session, &payload.question, &output)
            .await
        {
            Ok(()) => Ok(()),
            // The session was evicted while the response was streaming.
            Err(e @ ControllerError::SessionNotFound { .. }) => {
                warn!(session_id = %session, error = %e, "Exchange not recorded");
                sink.emit(connection, ServerEvent::error(SESSION_NOT_FOUND))
                    .await
            }
            Err(e) => {
                warn!(session_id = %session, error = %e, "Exchange not recorded");
                sink.emit(connection, ServerEvent::error(INTERNAL_ERROR))
                    .await
            }
        }
    }

    fn cached_history(&self, session_id: &str) -> Option<(SessionId, Vec<Message>)> {
        let session = session_id.parse::<SessionId>().ok()?;
        let history = self.controller.history(session).ok()?;
        Some((session, history))
    }
}

fn session_init(start: SessionStart) -> ServerEvent {
    ServerEvent::SessionInit {
        session_id: start.session_id,
        initial_message: start.greeting,
    }
}
