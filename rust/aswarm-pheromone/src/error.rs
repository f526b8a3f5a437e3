// aswarm-pheromone: Error types

use thiserror::Error;

/// Pheromone result type
pub type PheromoneResult<T> = Result<T, PheromoneError>;

/// Pheromone error types
#[derive(Debug, Error)]
pub enum PheromoneError {
    #[error("Invalid signal: {0}")]
    SignalError(String),

    #[error("Watch stream terminated: {0}")]
    WatchTerminated(String),

    #[error("Artifact error: {0}")]
    ArtifactError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}
