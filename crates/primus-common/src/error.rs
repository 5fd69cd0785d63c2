//! Error types for Primus
//!
//! This module defines `CoordinationError`, the error taxonomy shared by all
//! lease strategies. Normal contention is never an error: it is a `false`
//! return from the `Lease` contract. Errors are reserved for configuration
//! and connectivity problems that the caller cannot fix by retrying the same
//! call.

use serde::{Deserialize, Serialize};

/// Coordination-specific error types
#[derive(thiserror::Error, Debug)]
pub enum CoordinationError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoordinationError {
    /// Classify a connect-time failure, keeping the driver message intact.
    pub fn connect(source: impl std::fmt::Display) -> Self {
        CoordinationError::Connection(source.to_string())
    }
}

/// Lease observation as seen by one node; carried in logs and diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseObservation {
    /// Holder node id currently recorded in the lease row (0 = unheld)
    pub holder_id: i64,
    /// Holder epoch at the time of observation
    pub epoch: i64,
    /// Holder's declared renewal interval in milliseconds
    pub lease_millis: i64,
}
