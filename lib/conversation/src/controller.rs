//! Session lifecycle controller.
//!
//! Creates, restores, binds and flushes sessions, reconciling the in-memory
//! [`SessionCache`] with the [`DurableStore`]. From the controller's point of
//! view a session id is in one of four states (see [`SessionResidency`]):
//! absent, cached only, persisted only, or both.
//!
//! Read-modify-write sequences on one session (restore, record, flush) run
//! under a per-session async lock, so a disconnect flush never races an
//! append to the same session. The cache and registry themselves are only
//! touched in short synchronous critical sections.

use crate::cache::SessionCache;
use crate::config::{FlushPolicy, LifecycleConfig};
use crate::error::{ControllerError, StoreError};
use crate::message::Message;
use crate::registry::ConnectionRegistry;
use crate::store::DurableStore;
use colloquy_core::{ConnectionId, SessionId, UserId};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// A freshly started session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStart {
    /// The new session's id.
    pub session_id: SessionId,
    /// The greeting stored as its first message.
    pub greeting: String,
}

/// Where a restored history came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreSource {
    /// The session was already in memory.
    Cache,
    /// The session was loaded from the durable store.
    Store,
}

/// Outcome of a restore request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restored {
    /// The requested session was found and the connection bound to it.
    Resumed {
        session_id: SessionId,
        history: Vec<Message>,
        source: RestoreSource,
    },
    /// The id was unknown or unusable; a new session was started instead.
    Started(SessionStart),
}

impl Restored {
    /// Returns the id of the session the connection is now bound to.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Resumed { session_id, .. } => *session_id,
            Self::Started(start) => start.session_id,
        }
    }
}

/// Where a session currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionResidency {
    Absent,
    CachedOnly,
    PersistedOnly,
    CachedAndPersisted,
}

impl SessionResidency {
    fn from_flags(cached: bool, persisted: bool) -> Self {
        match (cached, persisted) {
            (false, false) => Self::Absent,
            (true, false) => Self::CachedOnly,
            (false, true) => Self::PersistedOnly,
            (true, true) => Self::CachedAndPersisted,
        }
    }
}

/// Result of a single session flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The cached history was written to the store.
    Flushed { messages: usize },
    /// Nothing to write: the session is not cached.
    NotCached,
}

/// Summary of [`SessionLifecycleController::flush_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    pub failed: usize,
}

/// Orchestrates the session cache, connection registry and durable store.
///
/// Constructed once per process and shared by every connection handler.
pub struct SessionLifecycleController {
    cache: SessionCache,
    registry: ConnectionRegistry,
    store: Arc<dyn DurableStore>,
    config: LifecycleConfig,
    locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLifecycleController {
    /// Creates a controller over the given store.
    pub fn new(store: Arc<dyn DurableStore>, config: LifecycleConfig) -> Self {
        Self {
            cache: SessionCache::new(),
            registry: ConnectionRegistry::new(),
            store,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Starts a new session for `user` and binds the connection to it.
    ///
    /// The ownership link is written to the store on a best-effort basis: if
    /// the store is down the session is still served from memory.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::MissingUserId` if no user id was supplied.
    /// Nothing is created in that case.
    #[instrument(skip(self), fields(connection_id = %connection))]
    pub async fn init(
        &self,
        connection: ConnectionId,
        user: Option<UserId>,
    ) -> Result<SessionStart, ControllerError> {
        let user = user.ok_or(ControllerError::MissingUserId)?;
        let start = self.start_session(connection).await;

        if let Err(e) = self
            .guarded(self.store.link_session(user, start.session_id))
            .await
        {
            warn!(
                error = %e,
                user_id = %user,
                session_id = %start.session_id,
                "Failed to link session to user; serving from cache"
            );
        }

        Ok(start)
    }

    /// Reattaches a connection to an existing session.
    ///
    /// Looks in the cache first, then in the durable store. Anything else
    /// (unparsable id, unknown id, store unreachable) degrades to a fresh
    /// session rather than an error. Repeating a restore never duplicates
    /// history.
    #[instrument(skip(self), fields(connection_id = %connection))]
    pub async fn restore(
        &self,
        connection: ConnectionId,
        session_id: &str,
    ) -> Result<Restored, ControllerError> {
        let Ok(id) = session_id.parse::<SessionId>() else {
            debug!(session_id, "Unparsable session id, starting a new session");
            return Ok(Restored::Started(self.start_session(connection).await));
        };

        // Bound under the session lock: an evicting disconnect must see
        // this connection.
        let (resumed, previous) = {
            let lock = self.session_lock(id);
            let _guard = lock.lock().await;
            match self.resume_locked(id).await {
                Some(found) => (Some(found), self.registry.bind(connection, id)),
                None => (None, None),
            }
        };
        self.prune_lock(id);

        match resumed {
            Some((history, source)) => {
                self.release_previous(previous, id).await;
                info!(session_id = %id, ?source, messages = history.len(), "Session restored");
                Ok(Restored::Resumed {
                    session_id: id,
                    history,
                    source,
                })
            }
            None => Ok(Restored::Started(self.start_session(connection).await)),
        }
    }

    /// Appends a human message and the assistant's output, in that order.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::SessionNotFound` if the session is not
    /// cached; callers must `init` or `restore` first.
    #[instrument(skip(self, human, assistant))]
    pub async fn record_exchange(
        &self,
        session: SessionId,
        human: &str,
        assistant: &str,
    ) -> Result<(), ControllerError> {
        let result = {
            let lock = self.session_lock(session);
            let _guard = lock.lock().await;

            match self.cache.append_exchange(session, human, assistant) {
                Ok(_) => {
                    if self.config.flush_policy == FlushPolicy::EveryExchange {
                        // Best effort: the cache keeps the history either way.
                        let _ = self.flush_locked(session).await;
                    }
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        };
        self.prune_lock(session);
        result
    }

    /// Handles the end of a transport connection.
    ///
    /// Flushes the bound session (full overwrite), then removes the binding.
    /// A failed flush is logged and the cache keeps the history for a later
    /// attempt. Unknown connections are a no-op.
    #[instrument(skip(self), fields(connection_id = %connection))]
    pub async fn disconnect(&self, connection: ConnectionId) -> Result<(), ControllerError> {
        let Some(session) = self.registry.lookup(connection) else {
            debug!("Disconnect without bound session");
            return Ok(());
        };

        {
            let lock = self.session_lock(session);
            let _guard = lock.lock().await;

            let flushed = self.flush_locked(session).await;
            self.registry.unbind(connection);

            if self.config.evict_on_disconnect
                && matches!(flushed, Ok(FlushOutcome::Flushed { .. }))
                && self.registry.connections_for(session) == 0
            {
                self.cache.evict(session);
                debug!(session_id = %session, "Evicted session from cache");
            }
        }
        self.prune_lock(session);

        Ok(())
    }

    /// Returns the cached history of a session.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::SessionNotFound` if the session is not cached.
    pub fn history(&self, session: SessionId) -> Result<Vec<Message>, ControllerError> {
        Ok(self.cache.get(session)?)
    }

    /// Returns the session a connection is bound to.
    #[must_use]
    pub fn session_for(&self, connection: ConnectionId) -> Option<SessionId> {
        self.registry.lookup(connection)
    }

    /// Returns true if the session is held in memory.
    #[must_use]
    pub fn is_cached(&self, session: SessionId) -> bool {
        self.cache.exists(session)
    }

    /// Reports where a session currently lives.
    pub async fn residency(&self, session: SessionId) -> Result<SessionResidency, StoreError> {
        let cached = self.cache.exists(session);
        let persisted = self.guarded(self.store.exists(session)).await?;
        Ok(SessionResidency::from_flags(cached, persisted))
    }

    /// Lists the sessions owned by a user.
    pub async fn list_user_sessions(
        &self,
        user: UserId,
    ) -> Result<Vec<SessionId>, StoreError> {
        self.guarded(self.store.list_sessions(user)).await
    }

    /// Returns true if the user exists.
    pub async fn user_exists(&self, user: UserId) -> Result<bool, StoreError> {
        self.guarded(self.store.user_exists(user)).await
    }

    /// Creates a new user.
    pub async fn create_user(&self) -> Result<UserId, StoreError> {
        let user = self.guarded(self.store.create_user()).await?;
        info!(user_id = %user, "Created user");
        Ok(user)
    }

    /// Flushes one session under its lock.
    pub async fn flush_session(&self, session: SessionId) -> Result<FlushOutcome, ControllerError> {
        let result = {
            let lock = self.session_lock(session);
            let _guard = lock.lock().await;
            self.flush_locked(session).await
        };
        self.prune_lock(session);
        Ok(result?)
    }

    /// Flushes every cached session, e.g. before shutdown.
    pub async fn flush_all(&self) -> FlushReport {
        let mut report = FlushReport::default();
        for session in self.cache.session_ids() {
            match self.flush_session(session).await {
                Ok(FlushOutcome::Flushed { .. }) => report.flushed += 1,
                Ok(FlushOutcome::NotCached) => {}
                Err(_) => report.failed += 1,
            }
        }
        info!(
            flushed = report.flushed,
            failed = report.failed,
            "Flushed cached sessions"
        );
        report
    }

    /// Returns the number of sessions held in memory.
    #[must_use]
    pub fn cached_sessions(&self) -> usize {
        self.cache.len()
    }

    /// Returns the number of live connection bindings.
    #[must_use]
    pub fn live_connections(&self) -> usize {
        self.registry.len()
    }

    async fn start_session(&self, connection: ConnectionId) -> SessionStart {
        let session_id = self.cache.create(&self.config.greeting);
        self.bind(connection, session_id).await;
        info!(session_id = %session_id, "Started new session");
        SessionStart {
            session_id,
            greeting: self.config.greeting.clone(),
        }
    }

    /// Binds a connection, flushing the session it leaves behind.
    ///
    /// Only disconnect flushes a connection's session, so a connection that
    /// switches sessions would otherwise strand the previous history in
    /// memory.
    async fn bind(&self, connection: ConnectionId, session: SessionId) {
        let previous = self.registry.bind(connection, session);
        self.release_previous(previous, session).await;
    }

    /// Flushes the session a connection was bound to before `session`.
    /// Must not be called with another session lock held.
    async fn release_previous(&self, previous: Option<SessionId>, session: SessionId) {
        if let Some(previous) = previous
            && previous != session
        {
            debug!(previous = %previous, "Connection switched sessions");
            let _ = self.flush_session(previous).await;
        }
    }

    /// Looks the session up in the cache, then in the store. Caller holds
    /// the session lock.
    async fn resume_locked(&self, id: SessionId) -> Option<(Vec<Message>, RestoreSource)> {
        if let Ok(history) = self.cache.get(id) {
            return Some((history, RestoreSource::Cache));
        }

        match self.guarded(self.store.exists(id)).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(session_id = %id, "Unknown session id, starting a new session");
                return None;
            }
            Err(e) => {
                warn!(error = %e, session_id = %id, "Store unavailable during restore");
                return None;
            }
        }

        match self.guarded(self.store.load(id)).await {
            // A first flush that died between initialize and save leaves an
            // empty record behind. Every live session holds its greeting.
            Ok(history) if history.is_empty() => {
                warn!(session_id = %id, "Persisted session is empty, starting a new session");
                None
            }
            Ok(history) => {
                self.cache.insert(id, history.clone());
                Some((history, RestoreSource::Store))
            }
            Err(e) => {
                warn!(error = %e, session_id = %id, "Failed to load persisted session");
                None
            }
        }
    }

    /// Writes the cached history to the store, retrying transient failures.
    /// Caller holds the session lock.
    async fn flush_locked(&self, session: SessionId) -> Result<FlushOutcome, StoreError> {
        let Ok(messages) = self.cache.get(session) else {
            return Ok(FlushOutcome::NotCached);
        };

        let mut attempt = 0;
        loop {
            match self.write_back(session, &messages).await {
                Ok(()) => {
                    debug!(session_id = %session, messages = messages.len(), "Flushed session");
                    return Ok(FlushOutcome::Flushed {
                        messages: messages.len(),
                    });
                }
                Err(e) if e.is_transient() && attempt < self.config.flush_retries => {
                    attempt += 1;
                    warn!(error = %e, session_id = %session, attempt, "Flush failed, retrying");
                    tokio::time::sleep(self.config.flush_retry_backoff()).await;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        session_id = %session,
                        "Flush failed; history kept in cache"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn write_back(&self, session: SessionId, messages: &[Message]) -> Result<(), StoreError> {
        if !self.guarded(self.store.exists(session)).await? {
            self.guarded(self.store.initialize(session)).await?;
        }
        self.guarded(self.store.save(session, messages)).await
    }

    /// Bounds a store call by the configured timeout.
    async fn guarded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let timeout = self.config.store_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable {
                reason: format!("timed out after {}ms", timeout.as_millis()),
            }),
        }
    }

    fn session_lock(&self, session: SessionId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .expect("session lock table poisoned")
            .entry(session)
            .or_default()
            .clone()
    }

    /// Drops the lock entry once nobody holds it.
    fn prune_lock(&self, session: SessionId) {
        let mut locks = self.locks.lock().expect("session lock table poisoned");
        if locks
            .get(&session)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;

    fn controller_with(
        store: Arc<MemoryStore>,
        config: LifecycleConfig,
    ) -> SessionLifecycleController {
        SessionLifecycleController::new(store, config)
    }

    fn fast_retry_config() -> LifecycleConfig {
        LifecycleConfig {
            flush_retry_backoff_ms: 1,
            ..LifecycleConfig::default()
        }
    }

    #[tokio::test]
    async fn init_requires_user_id() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller_with(store, LifecycleConfig::default());
        let conn = ConnectionId::new();

        let err = controller.init(conn, None).await.unwrap_err();

        assert_eq!(err, ControllerError::MissingUserId);
        assert_eq!(controller.cached_sessions(), 0);
        assert_eq!(controller.session_for(conn), None);
    }

    #[tokio::test]
    async fn init_links_session_to_user() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller_with(store.clone(), LifecycleConfig::default());
        let user = controller.create_user().await.unwrap();

        let start = controller.init(ConnectionId::new(), Some(user)).await.unwrap();

        assert_eq!(
            controller.list_user_sessions(user).await.unwrap(),
            vec![start.session_id]
        );
        assert_eq!(
            controller.residency(start.session_id).await.unwrap(),
            SessionResidency::CachedOnly
        );
    }

    #[tokio::test]
    async fn init_survives_store_outage() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller_with(store.clone(), LifecycleConfig::default());
        store.set_available(false);

        let start = controller
            .init(ConnectionId::new(), Some(UserId::new()))
            .await
            .unwrap();

        assert!(controller.is_cached(start.session_id));
    }

    #[tokio::test]
    async fn restore_from_cache_binds_connection() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller_with(store, LifecycleConfig::default());
        let start = controller
            .init(ConnectionId::new(), Some(UserId::new()))
            .await
            .unwrap();
        let second = ConnectionId::new();

        let restored = controller
            .restore(second, &start.session_id.to_string())
            .await
            .unwrap();

        match restored {
            Restored::Resumed { source, history, .. } => {
                assert_eq!(source, RestoreSource::Cache);
                assert_eq!(history.len(), 1);
            }
            Restored::Started(_) => panic!("expected the cached session"),
        }
        assert_eq!(controller.session_for(second), Some(start.session_id));
    }

    #[tokio::test]
    async fn restore_loads_from_store_after_eviction() {
        let store = Arc::new(MemoryStore::new());
        let config = LifecycleConfig::default().with_evict_on_disconnect(true);
        let controller = controller_with(store, config);
        let conn = ConnectionId::new();
        let start = controller.init(conn, Some(UserId::new())).await.unwrap();
        controller
            .record_exchange(start.session_id, "hello", "hi")
            .await
            .unwrap();

        controller.disconnect(conn).await.unwrap();
        assert!(!controller.is_cached(start.session_id));
        assert_eq!(
            controller.residency(start.session_id).await.unwrap(),
            SessionResidency::PersistedOnly
        );

        let restored = controller
            .restore(ConnectionId::new(), &start.session_id.to_string())
            .await
            .unwrap();
        match restored {
            Restored::Resumed { source, history, .. } => {
                assert_eq!(source, RestoreSource::Store);
                assert_eq!(history.len(), 3);
            }
            Restored::Started(_) => panic!("expected the persisted session"),
        }
        assert_eq!(
            controller.residency(start.session_id).await.unwrap(),
            SessionResidency::CachedAndPersisted
        );
    }

    #[tokio::test]
    async fn restore_unknown_id_starts_new_session() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller_with(store, LifecycleConfig::default());
        let conn = ConnectionId::new();

        let unknown = SessionId::new();
        let restored = controller.restore(conn, &unknown.to_string()).await.unwrap();

        let Restored::Started(start) = restored else {
            panic!("expected a new session");
        };
        assert_ne!(start.session_id, unknown);
        assert_eq!(controller.session_for(conn), Some(start.session_id));
    }

    #[tokio::test]
    async fn restore_during_outage_starts_new_session() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller_with(store.clone(), LifecycleConfig::default());
        store.set_available(false);

        let restored = controller
            .restore(ConnectionId::new(), &SessionId::new().to_string())
            .await
            .unwrap();

        assert!(matches!(restored, Restored::Started(_)));
    }

    #[tokio::test]
    async fn record_exchange_requires_cached_session() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller_with(store, LifecycleConfig::default());
        let session = SessionId::new();

        let err = controller
            .record_exchange(session, "hello", "hi")
            .await
            .unwrap_err();

        assert_eq!(err, ControllerError::SessionNotFound { session_id: session });
    }

    #[tokio::test]
    async fn every_exchange_policy_flushes_immediately() {
        let store = Arc::new(MemoryStore::new());
        let config = LifecycleConfig::default().with_flush_policy(FlushPolicy::EveryExchange);
        let controller = controller_with(store.clone(), config);
        let start = controller
            .init(ConnectionId::new(), Some(UserId::new()))
            .await
            .unwrap();

        controller
            .record_exchange(start.session_id, "hello", "hi")
            .await
            .unwrap();

        let persisted = store.load(start.session_id).await.unwrap();
        assert_eq!(persisted.len(), 3);
        assert_eq!(persisted[1].role, Role::Human);
    }

    #[tokio::test]
    async fn failed_flush_keeps_cache_and_retries_later() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller_with(store.clone(), fast_retry_config());
        let conn = ConnectionId::new();
        let start = controller.init(conn, Some(UserId::new())).await.unwrap();
        controller
            .record_exchange(start.session_id, "hello", "hi")
            .await
            .unwrap();

        store.set_available(false);
        controller.disconnect(conn).await.unwrap();
        assert!(controller.is_cached(start.session_id));
        assert_eq!(controller.session_for(conn), None);

        store.set_available(true);
        let outcome = controller.flush_session(start.session_id).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Flushed { messages: 3 });
        assert_eq!(store.load(start.session_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_flush_does_not_evict() {
        let store = Arc::new(MemoryStore::new());
        let config = fast_retry_config().with_evict_on_disconnect(true);
        let controller = controller_with(store.clone(), config);
        let conn = ConnectionId::new();
        let start = controller.init(conn, Some(UserId::new())).await.unwrap();

        store.set_available(false);
        controller.disconnect(conn).await.unwrap();

        assert!(controller.is_cached(start.session_id));
    }

    #[tokio::test]
    async fn eviction_waits_for_last_connection() {
        let store = Arc::new(MemoryStore::new());
        let config = LifecycleConfig::default().with_evict_on_disconnect(true);
        let controller = controller_with(store, config);
        let first = ConnectionId::new();
        let second = ConnectionId::new();
        let start = controller.init(first, Some(UserId::new())).await.unwrap();
        controller
            .restore(second, &start.session_id.to_string())
            .await
            .unwrap();

        controller.disconnect(first).await.unwrap();
        assert!(controller.is_cached(start.session_id));

        controller.disconnect(second).await.unwrap();
        assert!(!controller.is_cached(start.session_id));
    }

    #[tokio::test]
    async fn switching_sessions_flushes_the_previous_one() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller_with(store.clone(), LifecycleConfig::default());
        let conn = ConnectionId::new();
        let first = controller.init(conn, Some(UserId::new())).await.unwrap();
        controller
            .record_exchange(first.session_id, "hello", "hi")
            .await
            .unwrap();

        controller.init(conn, Some(UserId::new())).await.unwrap();

        assert_eq!(store.load(first.session_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn flush_all_writes_every_cached_session() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller_with(store.clone(), LifecycleConfig::default());
        for _ in 0..3 {
            controller
                .init(ConnectionId::new(), Some(UserId::new()))
                .await
                .unwrap();
        }

        let report = controller.flush_all().await;

        assert_eq!(report, FlushReport { flushed: 3, failed: 0 });
        assert_eq!(store.save_count(), 3);
    }

    #[tokio::test]
    async fn empty_persisted_session_starts_new_session() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller_with(store.clone(), LifecycleConfig::default());
        let half_written = SessionId::new();
        store.initialize(half_written).await.unwrap();

        let restored = controller
            .restore(ConnectionId::new(), &half_written.to_string())
            .await
            .unwrap();

        let Restored::Started(start) = restored else {
            panic!("expected a new session");
        };
        assert_ne!(start.session_id, half_written);
        assert!(!controller.is_cached(half_written));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn restore_racing_evicting_disconnect_never_strands_connection() {
        let config = LifecycleConfig::default().with_evict_on_disconnect(true);
        let controller = Arc::new(controller_with(Arc::new(MemoryStore::new()), config));

        for _ in 0..200 {
            let leaving = ConnectionId::new();
            let arriving = ConnectionId::new();
            let start = controller.init(leaving, Some(UserId::new())).await.unwrap();
            let id = start.session_id.to_string();

            let disconnect = {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move { controller.disconnect(leaving).await })
            };
            let restore = {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move { controller.restore(arriving, &id).await })
            };
            disconnect.await.unwrap().unwrap();
            restore.await.unwrap().unwrap();

            let bound = controller.session_for(arriving).unwrap();
            assert!(controller.is_cached(bound), "bound to an evicted session");
            controller.disconnect(arriving).await.unwrap();
        }
    }

    /// A store whose calls never complete.
    struct HangingStore;

    #[async_trait]
    impl DurableStore for HangingStore {
        async fn exists(&self, _session: SessionId) -> Result<bool, StoreError> {
            std::future::pending().await
        }

        async fn load(&self, _session: SessionId) -> Result<Vec<Message>, StoreError> {
            std::future::pending().await
        }

        async fn initialize(&self, _session: SessionId) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn save(&self, _session: SessionId, _messages: &[Message]) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn create_user(&self) -> Result<UserId, StoreError> {
            std::future::pending().await
        }

        async fn user_exists(&self, _user: UserId) -> Result<bool, StoreError> {
            std::future::pending().await
        }

        async fn link_session(&self, _user: UserId, _session: SessionId) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn list_sessions(&self, _user: UserId) -> Result<Vec<SessionId>, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn store_timeout_is_unavailable() {
        let config = LifecycleConfig {
            store_timeout_ms: 50,
            flush_retries: 1,
            ..LifecycleConfig::default()
        };
        let controller = SessionLifecycleController::new(Arc::new(HangingStore), config);
        let conn = ConnectionId::new();
        let start = controller.init(conn, Some(UserId::new())).await.unwrap();

        let err = controller.flush_session(start.session_id).await.unwrap_err();
        assert!(matches!(err, ControllerError::Store(StoreError::Unavailable { .. })));

        tokio::time::timeout(Duration::from_secs(5), controller.disconnect(conn))
            .await
            .expect("disconnect must not hang")
            .unwrap();
        assert!(controller.is_cached(start.session_id));
    }
}
