//! Error types for kindred.

use thiserror::Error;

/// Result type alias using kindred's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for kindred operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Broker or live channel I/O failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller identity missing or rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Event lacks a field required for routing or dispatch
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
