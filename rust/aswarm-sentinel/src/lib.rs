// aswarm-sentinel: Per-node anomaly scoring and dual-path signal emission
// Publishes every tick reliably via the control-plane lease record and emits
// sustained high-confidence observations on the UDP fast path.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod error;
pub mod scoring;
pub mod source;
pub mod telemetry;

pub use error::{SentinelError, SentinelResult};
pub use scoring::ScoreEngine;
pub use source::{PacketSketch, ProcessGraph, SimulatedSource, TelemetrySource};
pub use telemetry::{lease_name_for, sanitize_node_name, Sentinel, SentinelConfig, TickReport};
