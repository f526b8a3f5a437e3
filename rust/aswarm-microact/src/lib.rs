// aswarm-microact: Bounded-authority containment catalog
// Fixed action catalog with ring limits, TTL auto-revert, and signed action
// certificates.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod catalog;
pub mod certificate;
pub mod config;
pub mod error;
pub mod executor;
pub mod proof;
pub mod ttl;

pub use catalog::{ActuationResult, MicroAct, MicroActCatalog, Ring};
pub use certificate::{
    ActionCertificate, ActionDescriptor, ActionOutcome, CertMetrics, CertTimestamps,
    CertificateRecord, CertificateStore, DetectionContext, PipelineTimings, PolicyRef,
};
pub use config::MicroActConfig;
pub use error::{MicroActError, MicroActResult};
pub use executor::{ActionExecutor, ApplyOutcome, DefaultExecutor};
pub use proof::{compute_proof, params_hash, Proof};
pub use ttl::{spawn_ttl_monitor, RevertInfo, TtlTable};
