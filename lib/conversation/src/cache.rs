//! In-memory cache of live session histories.
//!
//! The cache is the fast path for every read and append. It does no I/O and
//! never blocks beyond its own short critical sections; reconciling with the
//! durable store is the controller's job.

use crate::error::CacheError;
use crate::message::{Message, Role};
use colloquy_core::SessionId;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::RwLock;

/// Session id to ordered message list.
#[derive(Debug, Default)]
pub struct SessionCache {
    sessions: RwLock<HashMap<SessionId, Vec<Message>>>,
}

impl SessionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new session holding a single assistant greeting.
    pub fn create(&self, greeting: &str) -> SessionId {
        let mut sessions = self.sessions.write().expect("session cache lock poisoned");
        loop {
            let id = SessionId::new();
            if let Entry::Vacant(slot) = sessions.entry(id) {
                slot.insert(vec![Message::assistant(greeting, 0)]);
                return id;
            }
        }
    }

    /// Returns true if the session is held in memory.
    #[must_use]
    pub fn exists(&self, id: SessionId) -> bool {
        self.sessions
            .read()
            .expect("session cache lock poisoned")
            .contains_key(&id)
    }

    /// Returns a copy of the session's history, in order.
    pub fn get(&self, id: SessionId) -> Result<Vec<Message>, CacheError> {
        self.sessions
            .read()
            .expect("session cache lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(CacheError::SessionNotFound { session_id: id })
    }

    /// Appends a message and returns it with its assigned ordinal.
    pub fn append(
        &self,
        id: SessionId,
        role: Role,
        content: impl Into<String>,
    ) -> Result<Message, CacheError> {
        let mut sessions = self.sessions.write().expect("session cache lock poisoned");
        let messages = sessions
            .get_mut(&id)
            .ok_or(CacheError::SessionNotFound { session_id: id })?;
        Ok(push_next(messages, role, content.into()))
    }

    /// Appends a human message and the assistant's answer as one unit.
    ///
    /// Both land under the same write lock, so no other append can slip
    /// between them.
    pub fn append_exchange(
        &self,
        id: SessionId,
        human: impl Into<String>,
        assistant: impl Into<String>,
    ) -> Result<(Message, Message), CacheError> {
        let mut sessions = self.sessions.write().expect("session cache lock poisoned");
        let messages = sessions
            .get_mut(&id)
            .ok_or(CacheError::SessionNotFound { session_id: id })?;
        let human = push_next(messages, Role::Human, human.into());
        let assistant = push_next(messages, Role::Assistant, assistant.into());
        Ok((human, assistant))
    }

    /// Installs a history loaded from durable storage.
    ///
    /// Returns false and leaves the cache untouched if the session is
    /// already cached; the cached copy is never older than the stored one.
    pub fn insert(&self, id: SessionId, messages: Vec<Message>) -> bool {
        let mut sessions = self.sessions.write().expect("session cache lock poisoned");
        match sessions.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(messages);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Removes a session from memory. Idempotent.
    pub fn evict(&self, id: SessionId) -> bool {
        self.sessions
            .write()
            .expect("session cache lock poisoned")
            .remove(&id)
            .is_some()
    }

    /// Returns the ids of every cached session.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions
            .read()
            .expect("session cache lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Returns the number of cached sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().expect("session cache lock poisoned").len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn push_next(messages: &mut Vec<Message>, role: Role, content: String) -> Message {
    let ordinal = messages.last().map_or(0, |m| m.ordinal + 1);
    let message = Message::new(role, content, ordinal);
    messages.push(message.clone());
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_stores_greeting() {
        let cache = SessionCache::new();
        let id = cache.create("Hello!");

        let history = cache.get(id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Assistant);
        assert_eq!(history[0].content, "Hello!");
        assert_eq!(history[0].ordinal, 0);
    }

    #[test]
    fn create_returns_distinct_ids() {
        let cache = SessionCache::new();
        let a = cache.create("hi");
        let b = cache.create("hi");
        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn append_preserves_order_and_ordinals() {
        let cache = SessionCache::new();
        let id = cache.create("hi");

        cache.append(id, Role::Human, "first").unwrap();
        cache.append(id, Role::Assistant, "second").unwrap();

        let history = cache.get(id).unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["hi", "first", "second"]);
        let ordinals: Vec<_> = history.iter().map(|m| m.ordinal).collect();
        assert_eq!(ordinals, [0, 1, 2]);
    }

    #[test]
    fn append_to_unknown_session_fails() {
        let cache = SessionCache::new();
        let id = SessionId::new();
        let err = cache.append(id, Role::Human, "hello").unwrap_err();
        assert_eq!(err, CacheError::SessionNotFound { session_id: id });
    }

    #[test]
    fn get_unknown_session_fails() {
        let cache = SessionCache::new();
        assert!(cache.get(SessionId::new()).is_err());
    }

    #[test]
    fn append_exchange_is_contiguous() {
        let cache = SessionCache::new();
        let id = cache.create("hi");

        let (human, assistant) = cache.append_exchange(id, "hello", "hi there").unwrap();
        assert_eq!(human.ordinal, 1);
        assert_eq!(assistant.ordinal, 2);
        assert_eq!(human.role, Role::Human);
        assert_eq!(assistant.role, Role::Assistant);
    }

    #[test]
    fn insert_continues_stored_ordinals() {
        let cache = SessionCache::new();
        let id = SessionId::new();
        let stored = vec![Message::assistant("hi", 0), Message::human("q", 1)];

        assert!(cache.insert(id, stored));
        let next = cache.append(id, Role::Assistant, "a").unwrap();
        assert_eq!(next.ordinal, 2);
    }

    #[test]
    fn insert_does_not_clobber_cached_session() {
        let cache = SessionCache::new();
        let id = cache.create("hi");
        cache.append(id, Role::Human, "newer").unwrap();

        assert!(!cache.insert(id, vec![Message::assistant("hi", 0)]));
        assert_eq!(cache.get(id).unwrap().len(), 2);
    }

    #[test]
    fn evict_is_idempotent() {
        let cache = SessionCache::new();
        let id = cache.create("hi");

        assert!(cache.evict(id));
        assert!(!cache.evict(id));
        assert!(!cache.exists(id));
        assert!(cache.is_empty());
    }
}
