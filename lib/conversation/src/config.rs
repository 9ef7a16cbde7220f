//! Lifecycle policy knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When cached history is written back to the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Flush when a connection bound to the session goes away.
    #[default]
    OnDisconnect,
    /// Also flush after every recorded exchange.
    EveryExchange,
}

/// Configuration for the session lifecycle controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Greeting stored as the first message of every new session.
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// When to write cached history back to the store.
    #[serde(default)]
    pub flush_policy: FlushPolicy,

    /// Drop a session from memory once it is flushed and no connection
    /// refers to it any more.
    #[serde(default)]
    pub evict_on_disconnect: bool,

    /// Upper bound for a single durable store call, in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Extra attempts after a failed flush.
    #[serde(default = "default_flush_retries")]
    pub flush_retries: u32,

    /// Pause between flush attempts, in milliseconds.
    #[serde(default = "default_flush_retry_backoff_ms")]
    pub flush_retry_backoff_ms: u64,
}

fn default_greeting() -> String {
    "Hello! How can I help you?".to_string()
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_flush_retries() -> u32 {
    2
}

fn default_flush_retry_backoff_ms() -> u64 {
    200
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            flush_policy: FlushPolicy::default(),
            evict_on_disconnect: false,
            store_timeout_ms: default_store_timeout_ms(),
            flush_retries: default_flush_retries(),
            flush_retry_backoff_ms: default_flush_retry_backoff_ms(),
        }
    }
}

impl LifecycleConfig {
    /// Sets the greeting.
    #[must_use]
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }

    /// Sets the flush policy.
    #[must_use]
    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    /// Enables or disables eviction after a successful disconnect flush.
    #[must_use]
    pub fn with_evict_on_disconnect(mut self, evict: bool) -> Self {
        self.evict_on_disconnect = evict;
        self
    }

    /// Returns the store call timeout.
    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Returns the pause between flush attempts.
    #[must_use]
    pub fn flush_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.flush_retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LifecycleConfig::default();
        assert_eq!(config.flush_policy, FlushPolicy::OnDisconnect);
        assert!(!config.evict_on_disconnect);
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert_eq!(config.flush_retries, 2);
    }

    #[test]
    fn deserializes_partial_config() {
        let config: LifecycleConfig =
            serde_json::from_str(r#"{"flush_policy": "every_exchange"}"#).expect("deserialize");
        assert_eq!(config.flush_policy, FlushPolicy::EveryExchange);
        assert_eq!(config.flush_retry_backoff_ms, 200);
    }
}
