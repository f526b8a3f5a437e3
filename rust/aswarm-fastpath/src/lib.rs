// aswarm-fastpath: Authenticated UDP fast path
// Framed, HMAC-authenticated, replay-resistant datagram channel between
// Sentinel witnesses and the Pheromone aggregator, with bounded-queue burst
// absorption and adaptive back-pressure.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod backpressure;
pub mod error;
pub mod http;
pub mod keys;
pub mod listener;
pub mod payload;
pub mod protocol;
pub mod rate_limit;
pub mod replay;
pub mod ring;
pub mod sender;
pub mod stats;
pub mod validator;

pub use backpressure::{BackPressure, BackPressureConfig, SystemMode};
pub use error::{FastPathError, FastPathResult};
pub use keys::KeyTable;
pub use listener::{ElevationCallback, FastPathListener, ListenerConfig};
pub use payload::{AnomalyData, AnomalySummary, ElevationPayload};
pub use sender::{FastPathSender, SendStats, SenderConfig};
pub use stats::{FastPathStats, StatsSnapshot, Verdict};
pub use validator::{FastPathMeta, PacketValidator, ValidPacket, ValidatorConfig};
