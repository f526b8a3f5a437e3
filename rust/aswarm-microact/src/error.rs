// aswarm-microact: Error types

use thiserror::Error;

/// Micro-act result type
pub type MicroActResult<T> = Result<T, MicroActError>;

/// Micro-act error types
///
/// Actuation failures are values (`ActuationResult { success: false, .. }`),
/// never errors; these variants cover configuration and certificate I/O.
#[derive(Debug, Error)]
pub enum MicroActError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Certificate error: {0}")]
    CertificateError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for MicroActError {
    fn from(err: std::io::Error) -> Self {
        MicroActError::CertificateError(err.to_string())
    }
}
