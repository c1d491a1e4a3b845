//! Error types for the sync engine.

use fieldsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server answered with an error body.
    #[error("server rejected request ({status} {code}): {message}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Machine-readable error code.
        code: String,
        /// Error message.
        message: String,
    },

    /// A payload did not parse into the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// A local store read or write failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A caller-supplied value is invalid.
    #[error("validation error: {0}")]
    Validation(String),

    /// Endpoint or tenant setup is missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Live connection failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The sync driver has shut down.
    #[error("sync driver stopped")]
    Stopped,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Server { status, .. } => *status >= 500,
            SyncError::Timeout | SyncError::NotConnected | SyncError::Connection(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error means sync cannot run until reconfigured.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SyncError::Configuration(_))
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Persistence(err.to_string())
    }
}
