// aswarm-control: Control-plane record abstraction
// Lease-style coordination records, config records, and label-selected watch
// streams - the minimum coordination surface the detection pipeline needs.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod error;
pub mod memory;
pub mod types;

pub use error::{is_retryable, ControlError, ControlResult};
pub use memory::MemoryControlPlane;
pub use types::{ConfigRecord, LabelSelector, LeasePatch, LeaseRecord, WatchEvent};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Annotation key prefix shared by every A-SWARM record
pub const ANNOTATION_PREFIX: &str = "aswarm.ai/";

/// Control-plane operations used by the Sentinel and Pheromone components
///
/// Semantics match the coordination API the retry policies were written for:
/// `patch_lease` merge-patches and returns the server-assigned renew time,
/// creation is create-only with `Conflict` on collision, and `watch_leases`
/// yields an initial snapshot followed by live events.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Merge-patch a lease record, returning the server-observed timestamp
    async fn patch_lease(&self, name: &str, patch: LeasePatch) -> ControlResult<DateTime<Utc>>;

    /// Create a lease record; `Conflict` if it already exists
    async fn create_lease(&self, record: LeaseRecord) -> ControlResult<()>;

    /// Delete a lease record
    async fn delete_lease(&self, name: &str) -> ControlResult<()>;

    /// Create a config record; `Conflict` if it already exists
    async fn create_config(&self, record: ConfigRecord) -> ControlResult<()>;

    /// Fetch a config record by name
    async fn get_config(&self, name: &str) -> ControlResult<ConfigRecord>;

    /// Watch lease records matching the selector
    fn watch_leases(&self, selector: LabelSelector) -> mpsc::Receiver<WatchEvent>;
}
