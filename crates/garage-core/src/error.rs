//! Error types for the garage controller
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

use crate::value::TypeMismatch;

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the garage controller
#[derive(Error, Debug)]
pub enum Error {
    /// Entity store query or write failures
    #[error("Store error: {0}")]
    Store(String),

    /// Change-notification subscribe failures
    #[error("Notification error: {0}")]
    Notification(String),

    /// A field held a value of an unexpected type
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors (seed files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Entity not found
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a notification error
    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether the error came from the external store or notification layer
    ///
    /// Transient errors are abandoned for the current cycle and re-attempted
    /// by the next tick or state change.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Notification(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
