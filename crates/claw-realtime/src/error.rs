//! Error types for claw-realtime.

use thiserror::Error;

/// Errors returned by client operations.
///
/// Transport failures never surface here: they are classified and either
/// recovered or reported as lifecycle events.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// `close` was called before any connection was started.
    #[error("transport was never initialized")]
    NotInitialized,

    /// `send` was called without an open connection.
    #[error("no open connection")]
    NotOpen,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Payload serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for client operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;
