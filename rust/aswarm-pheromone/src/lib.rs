// aswarm-pheromone: Sliding-window quorum aggregator
// Fuses witness signals from the control-plane lease channel and the UDP
// fast path, decides when to elevate, and records the decision exactly once
// per run.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod artifact;
pub mod error;
pub mod quorum;
pub mod signals;
pub mod watcher;
pub mod window;

pub use artifact::{artifact_name, ElevationArtifact, SignalSource};
pub use error::{PheromoneError, PheromoneResult};
pub use quorum::{Decision, ElevationEngine, ElevationEvent, ElevationReason, QuorumConfig};
pub use signals::{parse_lease_signal, signal_from_fastpath, QuorumStats, WitnessSignal};
pub use watcher::PheromoneWatcher;
pub use window::SignalWindow;
