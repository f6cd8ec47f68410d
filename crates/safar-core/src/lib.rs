//! Foundational low-level utilities shared across Safar crates.
//!
//! Provides atomic file-write helpers and the unix-time utilities used by
//! session persistence and TTL expiry calculations.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{current_unix_timestamp, is_expired_unix};
