//! colloquy web server.
//!
//! This crate serves the chat service: a WebSocket endpoint for live
//! sessions and a small HTTP API, both backed by the session lifecycle
//! controller from `colloquy-conversation`.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod generator;
pub mod state;
pub mod transport;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::get;
use state::AppState;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Builds the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api::routes())
        .route("/ws", get(transport::ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds the CORS layer for the given origins; `None` allows any origin.
pub fn cors_layer(origins: Option<Vec<String>>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    match origins {
        None => layer.allow_origin(Any),
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::warn!(
                            origin = %origin,
                            error = %e,
                            "Ignoring invalid CORS origin"
                        );
                        None
                    }
                })
                .collect();
            layer.allow_origin(origins)
        }
    }
}
