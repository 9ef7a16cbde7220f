//! Shared application state.

use crate::transport::{ConnectionHub, EventHandler};
use colloquy_conversation::{ResponseGenerator, SessionLifecycleController};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// State shared by every HTTP handler and socket.
#[derive(Clone)]
pub struct AppState {
    /// The session lifecycle controller.
    pub controller: Arc<SessionLifecycleController>,
    /// The response generator.
    pub generator: Arc<dyn ResponseGenerator>,
    /// Outbound queues of open sockets.
    pub hub: Arc<ConnectionHub>,
    /// Client event dispatch.
    pub handler: EventHandler,
    /// Cancelled when the server starts shutting down.
    pub shutdown: CancellationToken,
    /// Upgraded socket tasks, which graceful HTTP shutdown does not wait on.
    pub sockets: TaskTracker,
}

impl AppState {
    /// Creates the application state.
    pub fn new(
        controller: Arc<SessionLifecycleController>,
        generator: Arc<dyn ResponseGenerator>,
    ) -> Self {
        let handler = EventHandler::new(controller.clone(), generator.clone());
        Self {
            controller,
            generator,
            hub: Arc::new(ConnectionHub::new()),
            handler,
            shutdown: CancellationToken::new(),
            sockets: TaskTracker::new(),
        }
    }

    /// Tells open sockets to close and waits up to `grace` for their
    /// disconnect handling to finish.
    ///
    /// Returns the number of sockets still running when the wait ended.
    pub async fn drain_sockets(&self, grace: Duration) -> usize {
        self.shutdown.cancel();
        self.sockets.close();

        if tokio::time::timeout(grace, self.sockets.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.sockets.len(),
                "Sockets still open after shutdown grace period"
            );
        }
        self.sockets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_conversation::{DurableStore, EchoGenerator, LifecycleConfig, MemoryStore};
    use colloquy_core::{ConnectionId, UserId};

    fn state_over(store: Arc<MemoryStore>) -> AppState {
        let controller = Arc::new(SessionLifecycleController::new(
            store,
            LifecycleConfig::default(),
        ));
        AppState::new(controller, Arc::new(EchoGenerator))
    }

    #[tokio::test]
    async fn drain_waits_for_socket_disconnects() {
        let store = Arc::new(MemoryStore::new());
        let state = state_over(store.clone());
        let connection = ConnectionId::new();
        let session = state
            .controller
            .init(connection, Some(UserId::new()))
            .await
            .unwrap()
            .session_id;

        let socket_state = state.clone();
        state.sockets.spawn(async move {
            socket_state.shutdown.cancelled().await;
            socket_state.handler.on_disconnect(connection).await;
        });

        let remaining = state.drain_sockets(Duration::from_secs(5)).await;

        assert_eq!(remaining, 0);
        assert_eq!(store.load(session).await.unwrap().len(), 1);
        assert_eq!(state.controller.live_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_after_grace_period() {
        let state = state_over(Arc::new(MemoryStore::new()));
        state.sockets.spawn(std::future::pending::<()>());

        let remaining = state.drain_sockets(Duration::from_millis(50)).await;

        assert_eq!(remaining, 1);
    }
}
