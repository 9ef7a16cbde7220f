//! Wire format of WebSocket events.
//!
//! Every frame is a JSON text message `{"event": <name>, "data": <payload>}`.

use colloquy_conversation::{Message, Role};
use colloquy_core::SessionId;
use serde::{Deserialize, Serialize};

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Start a new session for a user.
    Init(InitPayload),
    /// Reattach to an existing session.
    RestoreSession(RestorePayload),
    /// Ask a question within a session.
    Query(QueryPayload),
}

/// Payload of [`ClientEvent::Init`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct InitPayload {
    #[serde(default)]
    pub user_uuid: Option<String>,
}

/// Payload of [`ClientEvent::RestoreSession`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct RestorePayload {
    #[serde(default)]
    pub session_id: Option<SessionIdParam>,
}

/// A session id sent either bare or wrapped in a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SessionIdParam {
    One(String),
    Many(Vec<String>),
}

impl SessionIdParam {
    /// Returns the id to use: the value itself, or the first list element.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::One(id) => Some(id),
            Self::Many(ids) => ids.first().map(String::as_str),
        }
    }
}

/// Payload of [`ClientEvent::Query`], also the body of `POST /query`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueryPayload {
    pub question: String,
    pub session_id: String,
}

/// Events sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A new session was started.
    SessionInit {
        session_id: SessionId,
        initial_message: String,
    },
    /// An existing session was reattached.
    SessionRestored {
        session_id: SessionId,
        chat_history: Vec<HistoryEntry>,
    },
    /// A response is about to be streamed.
    ResponseStart(bool),
    /// One fragment of the response.
    Response(String),
    /// The response is complete.
    ResponseEnd(bool),
    /// Something went wrong handling the last event.
    Error { message: String },
}

impl ServerEvent {
    /// Builds an error event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Speaker of a history entry as clients name it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    User,
    Bot,
}

/// A history message in the client's format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub content: String,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            kind: match message.role {
                Role::Human => EntryKind::User,
                Role::Assistant => EntryKind::Bot,
            },
            content: message.content.clone(),
        }
    }
}

/// Converts a history to the client's format.
#[must_use]
pub fn history_entries(history: &[Message]) -> Vec<HistoryEntry> {
    history.iter().map(HistoryEntry::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_init() {
        let event: ClientEvent =
            serde_json::from_value(json!({"event": "init", "data": {"user_uuid": "u"}})).unwrap();
        assert_eq!(
            event,
            ClientEvent::Init(InitPayload {
                user_uuid: Some("u".to_string())
            })
        );
    }

    #[test]
    fn restore_accepts_string_or_list() {
        let single: ClientEvent = serde_json::from_value(
            json!({"event": "restore_session", "data": {"session_id": "a"}}),
        )
        .unwrap();
        let listed: ClientEvent = serde_json::from_value(
            json!({"event": "restore_session", "data": {"session_id": ["a", "b"]}}),
        )
        .unwrap();

        for event in [single, listed] {
            let ClientEvent::RestoreSession(payload) = event else {
                panic!("expected restore_session");
            };
            assert_eq!(payload.session_id.as_ref().and_then(|s| s.first()), Some("a"));
        }
    }

    #[test]
    fn empty_list_has_no_session_id() {
        assert_eq!(SessionIdParam::Many(Vec::new()).first(), None);
    }

    #[test]
    fn unknown_event_is_rejected() {
        let parsed = serde_json::from_value::<ClientEvent>(json!({"event": "shout", "data": {}}));
        assert!(parsed.is_err());
    }

    #[test]
    fn outbound_events_use_event_data_envelope() {
        assert_eq!(
            serde_json::to_value(ServerEvent::ResponseStart(true)).unwrap(),
            json!({"event": "response_start", "data": true})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::Response("Hel".to_string())).unwrap(),
            json!({"event": "response", "data": "Hel"})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::error("Session not found.")).unwrap(),
            json!({"event": "error", "data": {"message": "Session not found."}})
        );
    }

    #[test]
    fn history_uses_user_and_bot() {
        let history = vec![Message::assistant("Hi", 0), Message::human("Yo", 1)];
        assert_eq!(
            serde_json::to_value(history_entries(&history)).unwrap(),
            json!([
                {"type": "bot", "content": "Hi"},
                {"type": "user", "content": "Yo"}
            ])
        );
    }
}
