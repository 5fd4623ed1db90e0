//! Common error types for Embaixada.

use thiserror::Error;

/// Top-level error type for Embaixada operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure: timeout, connection refused, DNS, throttling.
    #[error("Network error: {0}")]
    Network(String),

    /// The server rejected the access token (HTTP 401).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The server rejected the request content (HTTP 4xx).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The server failed to handle the request (HTTP 5xx).
    #[error("Server error: {0}")]
    Server(String),

    /// Persistent key-value store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation kind this build cannot route.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether retrying the same request can never succeed.
    ///
    /// Permanent failures are dropped from the sync queue after a single
    /// attempt instead of consuming the whole retry budget.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::Unsupported(_) | Error::InvalidInput(_)
        )
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
