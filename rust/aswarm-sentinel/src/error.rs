// aswarm-sentinel: Error types

use thiserror::Error;

/// Sentinel result type
pub type SentinelResult<T> = Result<T, SentinelError>;

/// Sentinel error types
///
/// Only unrecoverable startup errors propagate; tick-level failures log and
/// the loop continues.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Control plane error: {0}")]
    ControlError(String),

    #[error("Fast path error: {0}")]
    FastPathError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<aswarm_control::ControlError> for SentinelError {
    fn from(err: aswarm_control::ControlError) -> Self {
        SentinelError::ControlError(err.to_string())
    }
}

impl From<aswarm_fastpath::FastPathError> for SentinelError {
    fn from(err: aswarm_fastpath::FastPathError) -> Self {
        SentinelError::FastPathError(err.to_string())
    }
}
