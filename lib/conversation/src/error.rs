//! Error types for the conversation crate.
//!
//! - `CacheError`: in-memory session cache lookups
//! - `StoreError`: durable store operations (operational, recoverable)
//! - `GeneratorError`: response generation failures
//! - `ControllerError`: what the lifecycle controller surfaces to callers

use colloquy_core::SessionId;
use std::fmt;

/// Errors from the in-memory session cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The session is not held in memory.
    SessionNotFound { session_id: SessionId },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound { session_id } => {
                write!(f, "session not cached: {session_id}")
            }
        }
    }
}

impl std::error::Error for CacheError {}

/// Errors from durable store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No persisted history exists for the session.
    NotFound { session_id: SessionId },
    /// The backing store could not be reached or did not answer in time.
    Unavailable { reason: String },
    /// A persisted record could not be decoded.
    InvalidData { reason: String },
}

impl StoreError {
    /// Creates an `Unavailable` error from anything displayable.
    pub fn unavailable(reason: impl fmt::Display) -> Self {
        Self::Unavailable {
            reason: reason.to_string(),
        }
    }

    /// Returns true if retrying the operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { session_id } => {
                write!(f, "no persisted history for session {session_id}")
            }
            Self::Unavailable { reason } => write!(f, "durable store unavailable: {reason}"),
            Self::InvalidData { reason } => write!(f, "invalid persisted data: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from response generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    /// The request to the generation backend failed.
    RequestFailed { reason: String },
    /// The backend answered with something we could not use.
    InvalidResponse { reason: String },
    /// The backend did not answer in time.
    Timeout,
}

impl fmt::Display for GeneratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestFailed { reason } => write!(f, "generation request failed: {reason}"),
            Self::InvalidResponse { reason } => {
                write!(f, "invalid generation response: {reason}")
            }
            Self::Timeout => write!(f, "generation timed out"),
        }
    }
}

impl std::error::Error for GeneratorError {}

/// Errors surfaced by the session lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// The operation needs the session to be cached and it is not.
    SessionNotFound { session_id: SessionId },
    /// `init` was called without the required user identifier.
    MissingUserId,
    /// A delegated durable store operation failed.
    Store(StoreError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound { session_id } => write!(f, "session not found: {session_id}"),
            Self::MissingUserId => write!(f, "user id is required to start a session"),
            Self::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<CacheError> for ControllerError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::SessionNotFound { session_id } => Self::SessionNotFound { session_id },
        }
    }
}

impl From<StoreError> for ControllerError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
