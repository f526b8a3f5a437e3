// aswarm-fastpath: Error types

use thiserror::Error;

/// Fast-path result type
pub type FastPathResult<T> = Result<T, FastPathError>;

/// Fast-path error types
///
/// Only configuration and socket setup fail loudly; per-packet failures never
/// become errors, they become counters (see `stats::Verdict`).
#[derive(Debug, Error)]
pub enum FastPathError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Socket error: {0}")]
    SocketError(String),

    #[error("Payload error: {0}")]
    PayloadError(String),

    #[error("Send error: {0}")]
    SendError(String),

    #[error("HTTP server error: {0}")]
    HttpError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for FastPathError {
    fn from(err: std::io::Error) -> Self {
        FastPathError::SocketError(err.to_string())
    }
}
