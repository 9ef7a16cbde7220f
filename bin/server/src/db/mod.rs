//! Database repositories for colloquy.
//!
//! This module provides the PostgreSQL implementation of the durable store
//! for users and session histories.

pub mod session;

pub use session::PgSessionStore;
