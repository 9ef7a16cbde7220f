//! Error reporting shared by the colloquy crates.
//!
//! Domain errors stay plain enums in the crate that owns them. Where a
//! failure has to travel to the top of the process (server bootstrap), it
//! is carried in a [`rootcause::Report`] through this alias.

use rootcause::Report;

/// A Result whose error is a rootcause report over context `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
