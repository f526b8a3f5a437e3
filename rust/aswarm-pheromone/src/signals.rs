// aswarm-pheromone: Witness signal types
//
// One observation from one node, arriving over either transport, plus the
// windowed quorum statistics computed over them. Parsing is lenient at the
// trust boundary: records with unparseable score or sequence are ignored,
// never fatal.

use crate::error::{PheromoneError, PheromoneResult};
use aswarm_control::LeaseRecord;
use aswarm_fastpath::ValidPacket;
use chrono::{DateTime, Utc};

/// Lease name prefix for Sentinel records
pub const SENTINEL_LEASE_PREFIX: &str = "aswarm-sentinel-";

/// A single scored observation from one witness
#[derive(Debug, Clone)]
pub struct WitnessSignal {
    pub node: String,
    pub seq: u32,
    /// Anomaly score in [0, 1]
    pub score: f64,
    pub elevate: bool,
    pub client_ts: Option<DateTime<Utc>>,
    /// Server-observed timestamp; authoritative for ordering
    pub server_ts: Option<DateTime<Utc>>,
    pub elevate_ts: Option<DateTime<Utc>>,
    pub run_id: Option<String>,
}

impl WitnessSignal {
    /// Construct a validated signal; the score must be finite and is clamped
    /// to [0, 1].
    pub fn new(node: impl Into<String>, seq: u32, score: f64) -> PheromoneResult<Self> {
        if !score.is_finite() {
            return Err(PheromoneError::SignalError(format!(
                "Anomaly score must be finite, got {}",
                score
            )));
        }
        Ok(Self {
            node: node.into(),
            seq,
            score: score.clamp(0.0, 1.0),
            elevate: false,
            client_ts: None,
            server_ts: None,
            elevate_ts: None,
            run_id: None,
        })
    }
}

/// Parse a witness signal from a Sentinel lease record
///
/// Returns None when the record is not a Sentinel lease or its score or
/// sequence do not parse.
pub fn parse_lease_signal(record: &LeaseRecord) -> Option<WitnessSignal> {
    let node = record
        .name
        .strip_prefix(SENTINEL_LEASE_PREFIX)?
        .to_string();
    let ann = &record.annotations;

    let seq: u32 = ann.get("aswarm.ai/seq")?.parse().ok()?;
    let score: f64 = ann.get("aswarm.ai/score")?.parse().ok()?;
    if !score.is_finite() {
        return None;
    }

    let client_ts = ann
        .get("aswarm.ai/ts")
        .and_then(|ts| parse_rfc3339(ts));
    let elevate = ann.get("aswarm.ai/elevate").map(|v| v == "true").unwrap_or(false);
    let elevate_ts = if elevate {
        ann.get("aswarm.ai/elevate-ts").and_then(|ts| parse_rfc3339(ts))
    } else {
        None
    };

    Some(WitnessSignal {
        node,
        seq,
        score: score.clamp(0.0, 1.0),
        elevate,
        client_ts,
        server_ts: record.renew_time,
        elevate_ts,
        run_id: ann.get("aswarm.ai/run-id").cloned(),
    })
}

/// Build a witness signal from a validated fast-path packet
///
/// The server timestamp is assigned here, on receipt.
pub fn signal_from_fastpath(packet: &ValidPacket, now: DateTime<Utc>) -> Option<WitnessSignal> {
    let node = packet
        .payload
        .node_id
        .clone()
        .or_else(|| packet.meta.src_id.map(|id| format!("{:08x}", id)))?;
    let score = packet.payload.anomaly.score?;
    if !score.is_finite() {
        return None;
    }

    let client_ts = packet
        .payload
        .wall_ts
        .as_ref()
        .and_then(|ts| ts.epoch_seconds())
        .and_then(|secs| DateTime::<Utc>::from_timestamp_millis((secs * 1000.0) as i64));

    Some(WitnessSignal {
        node,
        seq: packet.payload.sequence32.unwrap_or(packet.meta.seq16 as u32),
        score: score.clamp(0.0, 1.0),
        elevate: true,
        client_ts,
        server_ts: Some(now),
        elevate_ts: None,
        run_id: packet.payload.run_id.clone(),
    })
}

fn parse_rfc3339(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&text.replace('Z', "+00:00"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Quorum statistics over the sliding window
#[derive(Debug, Clone)]
pub struct QuorumStats {
    /// Distinct witnesses in the window
    pub witness_count: usize,
    pub total_samples: usize,
    pub mean_score: f64,
    /// Nearest-rank p95, no interpolation
    pub p95_score: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// min(1, witnesses/3) * min(1, mean/0.8)
    pub confidence: f64,
}

impl QuorumStats {
    pub fn new(
        witness_count: usize,
        total_samples: usize,
        mean_score: f64,
        p95_score: f64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        let confidence = if witness_count > 0 && mean_score > 0.0 {
            let witness_factor = (witness_count as f64 / 3.0).min(1.0);
            let score_factor = (mean_score / 0.8).min(1.0);
            witness_factor * score_factor
        } else {
            0.0
        };
        Self {
            witness_count,
            total_samples,
            mean_score,
            p95_score,
            window_start,
            window_end,
            confidence,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lease(name: &str, ann: &[(&str, &str)]) -> LeaseRecord {
        let mut record = LeaseRecord::new(name);
        let mut map = BTreeMap::new();
        for (k, v) in ann {
            map.insert(k.to_string(), v.to_string());
        }
        record.annotations = map;
        record.renew_time = Some(Utc::now());
        record
    }

    #[test]
    fn test_non_finite_score_rejected() {
        assert!(WitnessSignal::new("n1", 0, f64::NAN).is_err());
        assert!(WitnessSignal::new("n1", 0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_score_clamped() {
        assert_eq!(WitnessSignal::new("n1", 0, 1.7).unwrap().score, 1.0);
        assert_eq!(WitnessSignal::new("n1", 0, -0.2).unwrap().score, 0.0);
    }

    #[test]
    fn test_parse_lease_signal_complete() {
        let record = lease(
            "aswarm-sentinel-node-a",
            &[
                ("aswarm.ai/seq", "17"),
                ("aswarm.ai/score", "0.842"),
                ("aswarm.ai/ts", "2025-06-01T10:00:00+00:00"),
                ("aswarm.ai/run-id", "run-7"),
                ("aswarm.ai/elevate", "true"),
                ("aswarm.ai/elevate-ts", "2025-06-01T10:00:00+00:00"),
            ],
        );
        let signal = parse_lease_signal(&record).unwrap();
        assert_eq!(signal.node, "node-a");
        assert_eq!(signal.seq, 17);
        assert!((signal.score - 0.842).abs() < 1e-9);
        assert!(signal.elevate);
        assert_eq!(signal.run_id.as_deref(), Some("run-7"));
        assert!(signal.server_ts.is_some());
    }

    #[test]
    fn test_unparseable_score_ignored() {
        let record = lease(
            "aswarm-sentinel-node-a",
            &[("aswarm.ai/seq", "1"), ("aswarm.ai/score", "high")],
        );
        assert!(parse_lease_signal(&record).is_none());
    }

    #[test]
    fn test_non_sentinel_record_ignored() {
        let record = lease("other-lease", &[("aswarm.ai/seq", "1"), ("aswarm.ai/score", "0.5")]);
        assert!(parse_lease_signal(&record).is_none());
    }

    #[test]
    fn test_confidence_formula() {
        let now = Utc::now();
        // 3 witnesses at mean 0.8 saturate both factors.
        let stats = QuorumStats::new(3, 5, 0.8, 0.9, now, now);
        assert!((stats.confidence - 1.0).abs() < 1e-9);

        // 1 witness at mean 0.4: (1/3) * (0.5) = 1/6
        let stats = QuorumStats::new(1, 1, 0.4, 0.4, now, now);
        assert!((stats.confidence - (1.0 / 3.0) * 0.5).abs() < 1e-9);

        let stats = QuorumStats::new(0, 0, 0.0, 0.0, now, now);
        assert_eq!(stats.confidence, 0.0);
    }
}
