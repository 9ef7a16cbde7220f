//! Core domain types and utilities for colloquy.
//!
//! This crate provides the identifiers and error handling shared by the
//! conversation engine and the server.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ConnectionId, ParseIdError, SessionId, UserId};
