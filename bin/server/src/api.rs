//! HTTP API under `/api/v1`.

use crate::error::ApiError;
use crate::state::AppState;
use crate::transport::events::{HistoryEntry, QueryPayload, history_entries};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use colloquy_core::{SessionId, UserId};
use serde::Serialize;
use tracing::debug;

/// Returns the API routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/query", post(query))
        .route("/get_user_sessions/{user_uuid}", get(user_sessions))
        .route("/get_session_history/{session_id}", get(session_history))
        .route("/check_user_exists/{user_uuid}", get(check_user_exists))
        .route("/create_user", post(create_user))
        .route("/health", get(health))
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    output: String,
}

#[derive(Debug, Serialize)]
struct UserSessions {
    session_ids: Vec<SessionId>,
}

#[derive(Debug, Serialize)]
struct UserExists {
    user_exists: bool,
}

#[derive(Debug, Serialize)]
struct CreatedUser {
    user_uuid: UserId,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

/// Answers a question without streaming.
async fn query(
    State(state): State<AppState>,
    Json(payload): Json<QueryPayload>,
) -> Result<Json<QueryResponse>, ApiError> {
    let session = payload
        .session_id
        .parse::<SessionId>()
        .map_err(|_| ApiError::QuerySessionNotFound)?;
    let history = state
        .controller
        .history(session)
        .map_err(|_| ApiError::QuerySessionNotFound)?;

    let output = state.generator.generate(&payload.question, &history).await?;
    state
        .controller
        .record_exchange(session, &payload.question, &output)
        .await
        .map_err(|_| ApiError::QuerySessionNotFound)?;

    Ok(Json(QueryResponse { output }))
}

async fn user_sessions(
    State(state): State<AppState>,
    Path(user_uuid): Path<String>,
) -> Result<Json<UserSessions>, ApiError> {
    let Ok(user) = user_uuid.parse::<UserId>() else {
        debug!(user_uuid, "Listing sessions for unparsable user id");
        return Ok(Json(UserSessions {
            session_ids: Vec::new(),
        }));
    };

    let session_ids = state.controller.list_user_sessions(user).await?;
    Ok(Json(UserSessions { session_ids }))
}

/// Returns the cached history of a session.
async fn session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let session = session_id
        .parse::<SessionId>()
        .map_err(|_| ApiError::HistoryNotFound)?;
    let history = state
        .controller
        .history(session)
        .map_err(|_| ApiError::HistoryNotFound)?;
    Ok(Json(history_entries(&history)))
}

async fn check_user_exists(
    State(state): State<AppState>,
    Path(user_uuid): Path<String>,
) -> Result<Json<UserExists>, ApiError> {
    let user_exists = match user_uuid.parse::<UserId>() {
        Ok(user) => state.controller.user_exists(user).await?,
        Err(_) => false,
    };
    Ok(Json(UserExists { user_exists }))
}

async fn create_user(State(state): State<AppState>) -> Result<Json<CreatedUser>, ApiError> {
    let user_uuid = state.controller.create_user().await?;
    Ok(Json(CreatedUser { user_uuid }))
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}
