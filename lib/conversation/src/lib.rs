//! Conversation engine for colloquy.
//!
//! This crate provides:
//!
//! - **Session Cache**: live message history of active sessions
//! - **Connection Registry**: which session each live connection refers to
//! - **Durable Store**: the persistence seam, plus an in-memory implementation
//! - **Lifecycle Controller**: create, restore, bind and flush sessions
//! - **Response Generator**: the seam to the language model

pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod generator;
pub mod message;
pub mod registry;
pub mod store;

pub use cache::SessionCache;
pub use config::{FlushPolicy, LifecycleConfig};
pub use controller::{
    FlushOutcome, FlushReport, RestoreSource, Restored, SessionLifecycleController,
    SessionResidency, SessionStart,
};
pub use error::{CacheError, ControllerError, GeneratorError, StoreError};
pub use generator::{EchoGenerator, FragmentStream, ResponseGenerator, collect_fragments};
pub use message::{Message, Role, ordinals_increasing};
pub use registry::ConnectionRegistry;
pub use store::{DurableStore, MemoryStore};
