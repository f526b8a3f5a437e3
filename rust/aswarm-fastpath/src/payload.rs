// aswarm-fastpath: Elevation payload schema
//
// The JSON blob carried inside a fast-path datagram, promoted to a named
// schema with validation at the trust boundary. Unknown keys are ignored on
// decode; encoding is budgeted so the sealed packet never exceeds 1200 bytes.

use crate::error::{FastPathError, FastPathResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Anomaly summary inside an elevation payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub score: Option<f64>,
    pub witness_count: Option<u32>,
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_window_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sketch: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<Value>,
}

/// Wall-clock timestamp as carried on the wire: ISO-8601 string or epoch
/// seconds, both appear in the field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WallTs {
    Iso(String),
    Epoch(f64),
}

impl WallTs {
    /// Epoch seconds, if the value parses
    pub fn epoch_seconds(&self) -> Option<f64> {
        match self {
            WallTs::Epoch(secs) => Some(*secs),
            WallTs::Iso(text) => {
                let normalized = text.replace('Z', "+00:00");
                DateTime::parse_from_rfc3339(&normalized)
                    .ok()
                    .map(|dt| dt.timestamp_millis() as f64 / 1000.0)
            }
        }
    }
}

/// Elevation payload carried in a fast-path datagram
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevationPayload {
    pub node_id: Option<String>,
    pub wall_ts: Option<WallTs>,
    pub sequence32: Option<u32>,
    #[serde(default)]
    pub anomaly: AnomalySummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl ElevationPayload {
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Anomaly data handed to the sender by the Sentinel
#[derive(Debug, Clone, Default)]
pub struct AnomalyData {
    pub score: f64,
    pub witness_count: u32,
    pub selector: String,
    pub event_type: Option<String>,
    pub detection_window_ms: Option<u64>,
    pub sketch: Option<Value>,
    pub graph: Option<Value>,
}

/// Build a payload under the per-version budget
///
/// The base payload (node id, wall timestamp, sequence, score, witness count,
/// selector, run id) must fit or the build fails. Optional fields are then
/// added greedily in a fixed order, stopping at the first one that would push
/// the encoding past the budget.
pub fn build_budgeted_payload(
    node_id: &str,
    sequence32: u32,
    anomaly: &AnomalyData,
    run_id: Option<&str>,
    budget: usize,
) -> FastPathResult<Vec<u8>> {
    let mut payload = ElevationPayload {
        node_id: Some(node_id.to_string()),
        // Fixed-width timestamp keeps the budget math deterministic.
        wall_ts: Some(WallTs::Iso(
            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        )),
        sequence32: Some(sequence32),
        anomaly: AnomalySummary {
            score: Some(anomaly.score),
            witness_count: Some(anomaly.witness_count),
            selector: Some(anomaly.selector.clone()),
            ..AnomalySummary::default()
        },
        run_id: run_id.map(|r| r.to_string()),
    };

    let mut encoded = encode(&payload)?;
    if encoded.len() > budget {
        return Err(FastPathError::PayloadError(format!(
            "Payload {} exceeds budget {}",
            encoded.len(),
            budget
        )));
    }

    let optional: [(&str, Option<Value>); 4] = [
        (
            "detection_window_ms",
            anomaly.detection_window_ms.map(Value::from),
        ),
        (
            "event_type",
            anomaly.event_type.clone().map(Value::String),
        ),
        ("sketch", anomaly.sketch.clone()),
        ("graph", anomaly.graph.clone()),
    ];

    for (field, value) in optional {
        let Some(value) = value else { continue };
        let mut candidate = payload.clone();
        match field {
            "detection_window_ms" => candidate.anomaly.detection_window_ms = value.as_u64(),
            "event_type" => {
                candidate.anomaly.event_type = value.as_str().map(|s| s.to_string())
            }
            "sketch" => candidate.anomaly.sketch = Some(value),
            "graph" => candidate.anomaly.graph = Some(value),
            _ => {}
        }
        let candidate_encoded = encode(&candidate)?;
        if candidate_encoded.len() <= budget {
            payload = candidate;
            encoded = candidate_encoded;
        } else {
            break;
        }
    }

    Ok(encoded)
}

fn encode(payload: &ElevationPayload) -> FastPathResult<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|e| FastPathError::PayloadError(e.to_string()))
}
