// aswarm-pheromone: Elevation artifact emission
//
// One config record per run id, written create-only from a detached task so
// the decision path never blocks on I/O. A conflict means another aggregator
// instance already wrote it, which is the normal case in HA setups.

use crate::quorum::ElevationEvent;
use aswarm_control::{ConfigRecord, ControlError, ControlPlane};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which transport produced the deciding signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    Lease,
    FastPath,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Lease => "lease",
            SignalSource::FastPath => "fastpath",
        }
    }
}

/// The elevation.json document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevationArtifact {
    pub run_id: String,
    pub decision_ts_server: String,
    pub witness_count: usize,
    pub mean_score: f64,
    pub p95_score: f64,
    pub threshold: usize,
    pub window_ms: u64,
    pub reason: String,
    pub confidence: f64,
}

/// Record name for a run's elevation artifact
pub fn artifact_name(run_id: &str) -> String {
    format!("aswarm-elevated-{}", run_id)
}

/// Build the config record for an elevation event
///
/// Returns None for elevations without a run id; those are logged but leave
/// no artifact, avoiding cross-run contamination.
pub fn build_artifact(event: &ElevationEvent, source: SignalSource) -> Option<ConfigRecord> {
    let run_id = match &event.run_id {
        Some(run) => run.clone(),
        None => {
            warn!("elevation without run_id, skipping artifact");
            return None;
        }
    };

    let artifact = ElevationArtifact {
        run_id: run_id.clone(),
        decision_ts_server: event
            .decision_ts
            .to_rfc3339_opts(SecondsFormat::Micros, true),
        witness_count: event.witness_count,
        mean_score: event.mean_score,
        p95_score: event.p95_score,
        threshold: event.threshold,
        window_ms: event.window_ms,
        reason: event.reason.as_str().to_string(),
        confidence: event.confidence,
    };

    let json = match serde_json::to_string_pretty(&artifact) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize elevation artifact");
            return None;
        }
    };

    let mut record = ConfigRecord::new(artifact_name(&run_id));
    record.labels.insert("type".to_string(), "elevation".to_string());
    record.labels.insert(
        "aswarm.ai/component".to_string(),
        "pheromone".to_string(),
    );
    record
        .labels
        .insert("aswarm.ai/run-id".to_string(), run_id);
    record
        .labels
        .insert("aswarm.ai/source".to_string(), source.as_str().to_string());
    record.data.insert("elevation.json".to_string(), json);
    Some(record)
}

/// Write the artifact from a detached task; create-only, 409 benign
pub fn spawn_artifact_write(
    cp: Arc<dyn ControlPlane>,
    event: ElevationEvent,
    source: SignalSource,
) {
    let Some(record) = build_artifact(&event, source) else {
        return;
    };
    tokio::spawn(async move {
        let name = record.name.clone();
        match cp.create_config(record).await {
            Ok(()) => info!(name = %name, "created elevation artifact"),
            Err(ControlError::Conflict(_)) => {
                debug!(name = %name, "elevation artifact already exists (normal in HA)")
            }
            Err(e) => warn!(name = %name, error = %e, "failed to create elevation artifact"),
        }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::quorum::ElevationReason;
    use chrono::Utc;

    fn event(run_id: Option<&str>) -> ElevationEvent {
        ElevationEvent {
            run_id: run_id.map(|r| r.to_string()),
            decision_ts: Utc::now(),
            witness_count: 3,
            mean_score: 0.85,
            p95_score: 0.95,
            threshold: 3,
            window_ms: 80,
            reason: ElevationReason::FastPath,
            confidence: 1.0,
        }
    }

    #[test]
    fn test_artifact_shape() {
        let record = build_artifact(&event(Some("run-9")), SignalSource::FastPath).unwrap();
        assert_eq!(record.name, "aswarm-elevated-run-9");
        assert_eq!(record.labels.get("type").unwrap(), "elevation");
        assert_eq!(record.labels.get("aswarm.ai/source").unwrap(), "fastpath");

        let json = record.data.get("elevation.json").unwrap();
        let artifact: ElevationArtifact = serde_json::from_str(json).unwrap();
        assert_eq!(artifact.run_id, "run-9");
        assert_eq!(artifact.reason, "fast_path");
        assert_eq!(artifact.witness_count, 3);
        assert_eq!(artifact.window_ms, 80);
    }

    #[test]
    fn test_no_run_id_no_artifact() {
        assert!(build_artifact(&event(None), SignalSource::Lease).is_none());
    }
}
