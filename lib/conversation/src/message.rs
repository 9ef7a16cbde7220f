//! Message types for conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person talking to the assistant.
    Human,
    /// The assistant, including the session greeting.
    Assistant,
}

impl Role {
    /// Returns the role name used in persisted records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message in a session's history.
///
/// Messages are immutable once appended. `ordinal` is the position within
/// the session, assigned by the cache and never renumbered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Position within the session, starting at 0.
    pub ordinal: u64,
    /// When the message was appended.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Creates a message at the given position.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>, ordinal: u64) -> Self {
        Self {
            role,
            content: content.into(),
            ordinal,
            created_at: Utc::now(),
        }
    }

    /// Creates a human message.
    #[must_use]
    pub fn human(content: impl Into<String>, ordinal: u64) -> Self {
        Self::new(Role::Human, content, ordinal)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>, ordinal: u64) -> Self {
        Self::new(Role::Assistant, content, ordinal)
    }
}

/// Returns true if ordinals strictly increase along the slice.
#[must_use]
pub fn ordinals_increasing(messages: &[Message]) -> bool {
    messages.windows(2).all(|w| w[0].ordinal < w[1].ordinal)
}
