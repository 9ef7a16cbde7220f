//! Domain error types for server operations.
//!
//! `StartupError` covers bootstrap failures and is carried in a
//! `rootcause` report. `TransportError` is returned by event sinks and
//! `ApiError` by HTTP handlers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use colloquy_conversation::{GeneratorError, StoreError};
use colloquy_core::ConnectionId;
use serde_json::json;
use std::fmt;

/// Errors that stop the server from starting or keep it from serving.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration could not be loaded.
    Config { details: String },
    /// The database could not be reached.
    Database { details: String },
    /// Schema migrations failed.
    Migration { details: String },
    /// The response generator could not be built.
    Generator { details: String },
    /// The listener could not be bound.
    Bind { addr: String, details: String },
    /// The server loop failed.
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "failed to load configuration: {}", details),
            Self::Database { details } => write!(f, "failed to connect to database: {}", details),
            Self::Migration { details } => write!(f, "failed to run migrations: {}", details),
            Self::Generator { details } => {
                write!(f, "failed to build response generator: {}", details)
            }
            Self::Bind { addr, details } => {
                write!(f, "failed to bind to '{}': {}", addr, details)
            }
            Self::Serve { details } => write!(f, "server error: {}", details),
        }
    }
}

impl std::error::Error for StartupError {}

/// Errors delivering events to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection has gone away.
    ConnectionClosed { connection_id: ConnectionId },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionClosed { connection_id } => {
                write!(f, "connection '{}' is closed", connection_id)
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors returned by the HTTP API.
#[derive(Debug)]
pub enum ApiError {
    /// A query referenced a session that is not in memory.
    QuerySessionNotFound,
    /// A history request referenced a session that is not in memory.
    HistoryNotFound,
    /// The durable store could not serve the request.
    Store(StoreError),
    /// The response generator failed.
    Generation(GeneratorError),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuerySessionNotFound | Self::HistoryNotFound => write!(f, "session not found"),
            Self::Store(e) => write!(f, "{}", e),
            Self::Generation(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<GeneratorError> for ApiError {
    fn from(e: GeneratorError) -> Self {
        Self::Generation(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            // Two historical body shapes, kept for client compatibility.
            Self::QuerySessionNotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "message": "Session not found." })),
            )
                .into_response(),
            Self::HistoryNotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Session not found." })),
            )
                .into_response(),
            Self::Store(e) => {
                tracing::warn!(error = %e, "Store error while serving request");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": "Storage unavailable." })),
                )
                    .into_response()
            }
            Self::Generation(e) => {
                tracing::warn!(error = %e, "Response generation failed");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": "Response generation failed." })),
                )
                    .into_response()
            }
        }
    }
}
