//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables.
//!
//! See [`LifecycleConfig`] for the session lifecycle options, read from
//! `LIFECYCLE__*` variables.

use colloquy_conversation::LifecycleConfig;
use serde::Deserialize;
use std::time::Duration;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL database connection URL.
    /// Without one, histories are kept in process memory only.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Maximum connections in the database pool.
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// How long open sockets get to finish their disconnect handling
    /// on shutdown, in seconds.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,

    /// Comma-separated list of allowed CORS origins, or `*`.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: String,

    /// Session lifecycle configuration.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Response generator configuration.
    #[serde(default)]
    pub generator: GeneratorConfig,
}

/// Configuration for the OpenAI-compatible response generator.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    /// Base URL of the API, e.g. `https://api.openai.com/v1`.
    /// Without one, the server echoes questions back.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Bearer token for the API.
    #[serde(default)]
    pub api_key: Option<String>,

    /// System prompt placed before the history.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Stream responses fragment by fragment.
    #[serde(default = "default_stream")]
    pub stream: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_database_max_connections() -> u32 {
    5
}

fn default_shutdown_grace_seconds() -> u64 {
    10
}

fn default_allowed_origins() -> String {
    "*".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. Answer as precisely as you can, in plain text.".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_stream() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    60
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: default_model(),
            api_key: None,
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            stream: default_stream(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl GeneratorConfig {
    /// Returns the request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Returns the socket drain period used on shutdown.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Returns the allowed CORS origins, or `None` if any origin is allowed.
    #[must_use]
    pub fn origins(&self) -> Option<Vec<String>> {
        let origins: Vec<String> = self
            .allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();

        if origins.is_empty() || origins.iter().any(|o| o == "*") {
            None
        } else {
            Some(origins)
        }
    }
}
