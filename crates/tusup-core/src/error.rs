//! Error types for the upload engine

use thiserror::Error;

/// Errors that can occur while driving an upload.
#[derive(Debug, Error)]
pub enum TusError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("File unavailable: {0}")]
    FileUnavailable(String),

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Server rejected request: {status} - {message}")]
    ServerRejected { status: u16, message: String },

    #[error("Offset mismatch: server disagrees with local offset {local}")]
    OffsetMismatch { local: u64 },

    #[error("Upload resource no longer exists on the server")]
    ResourceGone,

    #[error("Server requires re-authentication")]
    AuthRequired,

    #[error("Unknown upload id: {0}")]
    UnknownId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl TusError {
    /// Transient failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            TusError::NetworkFailure(_) => true,
            TusError::ServerRejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Fatal for the session, no amount of retrying helps.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TusError::FileUnavailable(_) | TusError::InvalidEndpoint(_)
        )
    }
}

impl From<reqwest::Error> for TusError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts and transport errors are all retryable network failures;
        // HTTP status errors are mapped where the response is inspected.
        TusError::NetworkFailure(err.to_string())
    }
}

impl From<TusError> for String {
    fn from(error: TusError) -> Self {
        error.to_string()
    }
}
