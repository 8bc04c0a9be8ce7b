//! Error types shared by every remedy crate.

use thiserror::Error;

/// Result type for remedy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Remedy error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage/Database error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed.
    #[error("Version conflict: expected {expected:?}, found {found:?}")]
    Conflict {
        expected: Option<u64>,
        found: Option<u64>,
    },

    /// Invalid input or state transition.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Telemetry could not be read.
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// Remediation job could not be handed off.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
