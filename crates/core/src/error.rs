//! Error types for seqstore
//!
//! This module defines the engine-level error taxonomy. Per-operation
//! outcomes (version conflicts, mapping updates, document failures) are
//! NOT errors: they are reported through the result types in
//! [`crate::result`]. Everything here either aborts the current call or,
//! when [`Error::is_fatal`] is true, fails the engine.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for seqstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the seqstore engine
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption detected (CRC mismatch, bad framing, bad header)
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Translog failure
    #[error("Translog error: {0}")]
    Translog(String),

    /// Storage index failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// A consistency invariant was broken
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The engine has failed and rejects all further calls
    #[error("Engine failed: {reason}")]
    EngineFailed {
        /// Reason recorded when the engine failed
        reason: String,
    },

    /// The engine is closed
    #[error("Engine is closed")]
    EngineClosed,

    /// Operation not allowed in the current lifecycle state
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Malformed request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Bad configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Retention lease bookkeeping error
    #[error("Retention lease error: {0}")]
    RetentionLease(String),
}

impl Error {
    /// Create a corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Create an invariant violation error.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolation(msg.into())
    }

    /// Create an illegal state error.
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Error::IllegalState(msg.into())
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create an engine failed error.
    pub fn engine_failed(reason: impl Into<String>) -> Self {
        Error::EngineFailed {
            reason: reason.into(),
        }
    }

    /// Errors that leave the shard in an unknown state and must fail the engine.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Corruption(_)
                | Error::Translog(_)
                | Error::Storage(_)
                | Error::InvariantViolation(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
