// aswarm-control: Error types

use thiserror::Error;

/// Control-plane result type
pub type ControlResult<T> = Result<T, ControlError>;

/// Control-plane error types
///
/// Variants mirror the API statuses the retry policies key on: a 404 triggers
/// record creation, 409/429/5xx trigger bounded retries, everything else
/// surfaces.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    Conflict(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Control plane unavailable: {0}")]
    Unavailable(String),

    #[error("Watch stream terminated: {0}")]
    WatchTerminated(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Check if error is transient and worth a short retry
pub fn is_retryable(err: &ControlError) -> bool {
    matches!(
        err,
        ControlError::Conflict(_)
            | ControlError::TooManyRequests(_)
            | ControlError::Unavailable(_)
    )
}
