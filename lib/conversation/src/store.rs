//! Durable storage for session histories and user ownership.
//!
//! The store is authoritative for anything that must survive a restart but
//! is only consulted on a cache miss or a flush. The trait keeps the
//! controller independent of the backing database; the server provides the
//! PostgreSQL implementation, and [`MemoryStore`] serves tests and local
//! development.

use crate::error::StoreError;
use crate::message::Message;
use async_trait::async_trait;
use colloquy_core::{SessionId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Authoritative long-term storage.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Returns true if a persisted history exists for the session.
    async fn exists(&self, session: SessionId) -> Result<bool, StoreError>;

    /// Loads the persisted history, in order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if nothing is persisted for the session.
    async fn load(&self, session: SessionId) -> Result<Vec<Message>, StoreError>;

    /// Creates an empty persisted history if none exists.
    async fn initialize(&self, session: SessionId) -> Result<(), StoreError>;

    /// Replaces the persisted history with `messages`.
    ///
    /// Last writer wins at session granularity.
    async fn save(&self, session: SessionId, messages: &[Message]) -> Result<(), StoreError>;

    /// Creates a new user and returns its id.
    async fn create_user(&self) -> Result<UserId, StoreError>;

    /// Returns true if the user exists.
    async fn user_exists(&self, user: UserId) -> Result<bool, StoreError>;

    /// Records that `user` owns `session`.
    async fn link_session(&self, user: UserId, session: SessionId) -> Result<(), StoreError>;

    /// Lists the sessions owned by a user, oldest first.
    async fn list_sessions(&self, user: UserId) -> Result<Vec<SessionId>, StoreError>;
}

#[derive(Debug, Default)]
struct SessionRecord {
    owner: Option<UserId>,
    messages: Option<Vec<Message>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: HashSet<UserId>,
    sessions: HashMap<SessionId, SessionRecord>,
}

/// A process-local store.
///
/// Histories survive disconnects but not restarts. It can be switched
/// offline to exercise the controller's outage handling.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    available: AtomicBool,
    saves: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            available: AtomicBool::new(true),
            saves: AtomicUsize::new(0),
        }
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the backing store going away or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns how many successful saves have been performed.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable("memory store is offline"))
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory store lock poisoned")
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn exists(&self, session: SessionId) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self
            .state()
            .sessions
            .get(&session)
            .is_some_and(|r| r.messages.is_some()))
    }

    async fn load(&self, session: SessionId) -> Result<Vec<Message>, StoreError> {
        self.check_available()?;
        self.state()
            .sessions
            .get(&session)
            .and_then(|r| r.messages.clone())
            .ok_or(StoreError::NotFound {
                session_id: session,
            })
    }

    async fn initialize(&self, session: SessionId) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state();
        let record = state.sessions.entry(session).or_default();
        record.messages.get_or_insert_with(Vec::new);
        Ok(())
    }

    async fn save(&self, session: SessionId, messages: &[Message]) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state();
        state.sessions.entry(session).or_default().messages = Some(messages.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_user(&self) -> Result<UserId, StoreError> {
        self.check_available()?;
        let id = UserId::new();
        self.state().users.insert(id);
        Ok(id)
    }

    async fn user_exists(&self, user: UserId) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.state().users.contains(&user))
    }

    async fn link_session(&self, user: UserId, session: SessionId) -> Result<(), StoreError> {
        self.check_available()?;
        self.state().sessions.entry(session).or_default().owner = Some(user);
        Ok(())
    }

    async fn list_sessions(&self, user: UserId) -> Result<Vec<SessionId>, StoreError> {
        self.check_available()?;
        let mut sessions: Vec<SessionId> = self
            .state()
            .sessions
            .iter()
            .filter(|(_, r)| r.owner == Some(user))
            .map(|(id, _)| *id)
            .collect();
        sessions.sort();
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_replaces_history() {
        let store = MemoryStore::new();
        let session = SessionId::new();

        store
            .save(session, &[Message::assistant("hi", 0), Message::human("a", 1)])
            .await
            .unwrap();
        store
            .save(session, &[Message::assistant("hi", 0)])
            .await
            .unwrap();

        assert_eq!(store.load(session).await.unwrap().len(), 1);
        assert_eq!(store.save_count(), 2);
    }

    #[tokio::test]
    async fn load_missing_session_is_not_found() {
        let store = MemoryStore::new();
        let session = SessionId::new();
        assert_eq!(
            store.load(session).await.unwrap_err(),
            StoreError::NotFound {
                session_id: session
            }
        );
    }

    #[tokio::test]
    async fn linked_session_without_history_does_not_exist() {
        let store = MemoryStore::new();
        let user = store.create_user().await.unwrap();
        let session = SessionId::new();

        store.link_session(user, session).await.unwrap();
        assert!(!store.exists(session).await.unwrap());

        store.initialize(session).await.unwrap();
        assert!(store.exists(session).await.unwrap());
        assert!(store.load(session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn initialize_keeps_existing_history() {
        let store = MemoryStore::new();
        let session = SessionId::new();
        store
            .save(session, &[Message::assistant("hi", 0)])
            .await
            .unwrap();

        store.initialize(session).await.unwrap();
        assert_eq!(store.load(session).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_sessions_filters_by_owner() {
        let store = MemoryStore::new();
        let alice = store.create_user().await.unwrap();
        let bob = store.create_user().await.unwrap();
        let first = SessionId::new();
        let second = SessionId::new();

        store.link_session(alice, first).await.unwrap();
        store.link_session(alice, second).await.unwrap();
        store.link_session(bob, SessionId::new()).await.unwrap();

        let sessions = store.list_sessions(alice).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.contains(&first));
        assert!(sessions.contains(&second));
    }

    #[tokio::test]
    async fn offline_store_is_unavailable() {
        let store = MemoryStore::new();
        store.set_available(false);

        let err = store.exists(SessionId::new()).await.unwrap_err();
        assert!(err.is_transient());

        store.set_available(true);
        assert!(!store.exists(SessionId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn user_exists_after_create() {
        let store = MemoryStore::new();
        let user = store.create_user().await.unwrap();
        assert!(store.user_exists(user).await.unwrap());
        assert!(!store.user_exists(UserId::new()).await.unwrap());
    }
}
