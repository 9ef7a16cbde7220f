//! WebSocket adapter.
//!
//! Each socket gets a [`ConnectionId`], an outbound queue registered with
//! the [`ConnectionHub`](super::ConnectionHub), and a writer task draining
//! that queue. Inbound frames are handled in order; closing the socket, or
//! server shutdown, triggers the controller's disconnect handling. Socket
//! tasks run on the state's task tracker so shutdown can wait for them.

use super::EventSink;
use super::events::{ClientEvent, ServerEvent};
use crate::state::AppState;
use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use colloquy_core::ConnectionId;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

/// Upgrades `GET /ws` to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let sockets = state.sockets.clone();
    ws.on_upgrade(move |socket| sockets.track_future(handle_socket(socket, state)))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection = ConnectionId::new();
    let (mut sender, mut receiver) = socket.split();
    let mut outbound = state.hub.register(connection);
    info!(connection_id = %connection, "Connection opened");

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(connection_id = %connection, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            () = state.shutdown.cancelled() => {
                debug!(connection_id = %connection, "Closing socket for shutdown");
                break;
            }
            frame = receiver.next() => frame,
        };
        let Some(frame) = frame else {
            break;
        };

        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(connection_id = %connection, error = %e, "Socket read failed");
                break;
            }
        };

        let event = match serde_json::from_str::<ClientEvent>(text.as_str()) {
            Ok(event) => event,
            Err(e) => {
                debug!(connection_id = %connection, error = %e, "Ignoring malformed event");
                let reply = ServerEvent::error("Invalid event.");
                if state.hub.emit(connection, reply).await.is_err() {
                    break;
                }
                continue;
            }
        };

        if let Err(e) = state
            .handler
            .handle(connection, event, state.hub.as_ref())
            .await
        {
            debug!(connection_id = %connection, error = %e, "Stopped reading from socket");
            break;
        }
    }

    state.handler.on_disconnect(connection).await;
    state.hub.unregister(connection);
    if let Err(e) = writer.await {
        warn!(connection_id = %connection, error = %e, "Socket writer task failed");
    }
    info!(connection_id = %connection, "Connection closed");
}
