//! Primus Common - shared error types and helpers
//!
//! This crate provides:
//! - `CoordinationError`: the error taxonomy shared by all lease strategies
//! - `LeaseObservation`: the last-seen snapshot of the lease row
//! - small time helpers used by the coordination core

pub mod error;

pub use error::{CoordinationError, LeaseObservation};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
