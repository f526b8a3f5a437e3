// aswarm-sentinel: Dual-path telemetry loop
//
// One ticking task: sample, score, publish reliably via the per-node lease
// record, and - only for sustained high-confidence observations - emit on the
// UDP fast path. Cadence is jittered to avoid synchronized write herds.

use crate::error::{SentinelError, SentinelResult};
use crate::scoring::ScoreEngine;
use crate::source::TelemetrySource;
use aswarm_control::{is_retryable, ControlError, ControlPlane, LeasePatch, LeaseRecord};
use aswarm_fastpath::{AnomalyData, FastPathSender, SenderConfig};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Score above which a tick counts as "high" for hysteresis
const HIGH_SCORE: f64 = 0.7;
/// Score at which the fast path fires
const FASTPATH_SCORE: f64 = 0.90;
/// Scan-port count that classifies the event as a port scan
const PORT_SCAN_THRESHOLD: u32 = 5;
/// Lease duration advertised on the coordination record
const LEASE_DURATION_SECS: u32 = 5;
/// Control-plane retry attempts per tick
const LEASE_RETRIES: u32 = 3;

/// Sentinel tunables
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    /// Node identity; NODE_NAME env or the hostname when unset
    pub node_name: Option<String>,
    /// Tick cadence in milliseconds (30-150 recommended)
    pub cadence_ms: u64,
    pub run_id: Option<String>,
    /// Fast-path destination; None disables the UDP path
    pub fastpath: Option<SenderConfig>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            node_name: None,
            cadence_ms: 150,
            run_id: None,
            fastpath: None,
        }
    }
}

/// Sanitize a node name to RFC-1123: lowercase alphanumerics and dashes,
/// no leading/trailing or repeated dashes.
pub fn sanitize_node_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Lease record name for a node
pub fn lease_name_for(node: &str) -> String {
    format!("aswarm-sentinel-{}", sanitize_node_name(node))
}

/// What one tick did; returned for observability and tests
#[derive(Debug, Clone)]
pub struct TickReport {
    pub seq: u32,
    pub score: f64,
    pub elevate: bool,
    pub fastpath_sent: bool,
}

/// Per-node anomaly scorer and dual-path emitter
pub struct Sentinel {
    cp: Arc<dyn ControlPlane>,
    config: SentinelConfig,
    node_name: String,
    lease_name: String,
    sender: Option<FastPathSender>,
    source: Box<dyn TelemetrySource>,
    score_engine: ScoreEngine,
    sequence: u32,
    prev_high: bool,
}

impl Sentinel {
    pub fn new(
        cp: Arc<dyn ControlPlane>,
        config: SentinelConfig,
        source: Box<dyn TelemetrySource>,
    ) -> SentinelResult<Self> {
        let node_name = config
            .node_name
            .clone()
            .or_else(|| std::env::var("NODE_NAME").ok())
            .or_else(|| hostname::get().ok().map(|h| h.to_string_lossy().to_string()))
            .ok_or_else(|| {
                SentinelError::ConfigError("Could not determine node name".to_string())
            })?;

        let lease_name = lease_name_for(&node_name);
        let sender = match &config.fastpath {
            Some(sender_config) => {
                let mut sender_config = sender_config.clone();
                if sender_config.node_id.is_none() {
                    sender_config.node_id = Some(node_name.clone());
                }
                Some(FastPathSender::new(sender_config)?)
            }
            None => None,
        };

        info!(
            lease = %lease_name,
            cadence_ms = config.cadence_ms,
            fastpath = sender.is_some(),
            "sentinel telemetry initialized"
        );

        Ok(Self {
            cp,
            config,
            node_name,
            lease_name,
            sender,
            source,
            score_engine: ScoreEngine::new(),
            sequence: 0,
            prev_high: false,
        })
    }

    pub fn lease_name(&self) -> &str {
        &self.lease_name
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Run one cadence tick: sample, score, emit
    pub async fn tick(&mut self) -> TickReport {
        let (sketch, graph) = self.source.sample();
        let score = self.score_engine.update(&sketch, &graph);

        // Two consecutive high ticks before the elevate annotation goes out.
        let high = score > HIGH_SCORE;
        let elevate = high && self.prev_high;
        self.prev_high = high;

        self.sequence += 1;
        let seq = self.sequence;

        self.update_lease(seq, score, elevate).await;

        let mut fastpath_sent = false;
        if score >= FASTPATH_SCORE {
            if let Some(sender) = &self.sender {
                let event_type = if sketch.scan_ports() > PORT_SCAN_THRESHOLD {
                    "port_scan"
                } else {
                    "process_anomaly"
                };
                let anomaly = AnomalyData {
                    score,
                    witness_count: 1,
                    selector: format!("node={}", self.node_name),
                    event_type: Some(event_type.to_string()),
                    detection_window_ms: Some(self.config.cadence_ms),
                    sketch: Some(sketch.to_json()),
                    graph: Some(graph.to_json()),
                };
                match sender
                    .send_elevation(&anomaly, self.config.run_id.as_deref())
                    .await
                {
                    Ok(stats) => {
                        fastpath_sent = true;
                        debug!(
                            seq,
                            send_ms = format!("{:.1}", stats.send_ms_first),
                            "fast-path sent"
                        );
                    }
                    Err(e) => error!(error = %e, "fast-path send failed"),
                }
            }
        }

        info!(
            node = %self.node_name,
            seq,
            score = format!("{:.3}", score),
            elevate,
            fastpath = fastpath_sent,
            run_id = self.config.run_id.as_deref().unwrap_or(""),
            "sentinel tick"
        );

        TickReport {
            seq,
            score,
            elevate,
            fastpath_sent,
        }
    }

    /// Merge-patch the per-node lease; create on 404, short linear retries on
    /// transient failures. Tick-level failures log and the loop continues.
    async fn update_lease(&self, seq: u32, score: f64, elevate: bool) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut annotations = BTreeMap::new();
        annotations.insert("aswarm.ai/seq".to_string(), seq.to_string());
        annotations.insert("aswarm.ai/score".to_string(), format!("{:.3}", score));
        annotations.insert("aswarm.ai/ts".to_string(), now.clone());
        if let Some(run_id) = &self.config.run_id {
            annotations.insert("aswarm.ai/run-id".to_string(), run_id.clone());
        }
        if elevate {
            annotations.insert("aswarm.ai/elevate".to_string(), "true".to_string());
            annotations.insert("aswarm.ai/elevate-ts".to_string(), now);
        }

        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/component".to_string(),
            "sentinel".to_string(),
        );
        labels.insert(
            "aswarm.ai/node".to_string(),
            sanitize_node_name(&self.node_name),
        );
        if let Some(run_id) = &self.config.run_id {
            labels.insert("aswarm.ai/run-id".to_string(), run_id.clone());
        }

        let patch = LeasePatch {
            annotations,
            labels: labels.clone(),
            holder_identity: Some(format!("sentinel-{}", self.node_name)),
            lease_duration_seconds: Some(LEASE_DURATION_SECS),
        };

        for attempt in 0..LEASE_RETRIES {
            match self.cp.patch_lease(&self.lease_name, patch.clone()).await {
                Ok(_) => return,
                Err(ControlError::NotFound(_)) => {
                    let mut record = LeaseRecord::new(self.lease_name.clone());
                    record.labels = labels.clone();
                    record.holder_identity = Some(format!("sentinel-{}", self.node_name));
                    record.lease_duration_seconds = Some(LEASE_DURATION_SECS);
                    match self.cp.create_lease(record).await {
                        Ok(()) | Err(ControlError::Conflict(_)) => {
                            // Patch lands on the next attempt.
                        }
                        Err(e) => {
                            warn!(error = %e, "lease create failed");
                            return;
                        }
                    }
                }
                Err(e) if is_retryable(&e) => {
                    tokio::time::sleep(Duration::from_millis(10 * (attempt as u64 + 1))).await;
                }
                Err(e) => {
                    warn!(error = %e, "lease patch failed");
                    return;
                }
            }
        }
    }

    /// Tick until shutdown or the optional duration elapses
    pub async fn run(
        &mut self,
        duration: Option<Duration>,
        mut shutdown: watch::Receiver<bool>,
    ) -> SentinelResult<()> {
        let started = Instant::now();
        info!(
            cadence_ms = self.config.cadence_ms,
            run_id = self.config.run_id.as_deref().unwrap_or(""),
            "telemetry loop starting"
        );

        loop {
            let tick_start = Instant::now();
            self.tick().await;

            if let Some(limit) = duration {
                if started.elapsed() >= limit {
                    break;
                }
            }

            // Jittered cadence to avoid synchronized lease-write herds.
            let jitter_ms: i64 = rand::thread_rng().gen_range(-10..=20);
            let cadence_ms = self.config.cadence_ms as i64 + jitter_ms;
            let elapsed_ms = tick_start.elapsed().as_millis() as i64;
            let sleep_ms = (cadence_ms - elapsed_ms).max(0) as u64;

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(signals = self.sequence, "telemetry loop completed");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::source::{PacketSketch, ProcessGraph};
    use aswarm_control::MemoryControlPlane;

    /// Source with a scripted scan-port sequence
    struct ScriptedSource {
        scans: Vec<u32>,
        pos: usize,
    }

    impl ScriptedSource {
        fn new(scans: Vec<u32>) -> Self {
            Self { scans, pos: 0 }
        }
    }

    impl TelemetrySource for ScriptedSource {
        fn sample(&mut self) -> (PacketSketch, ProcessGraph) {
            let scan = self.scans.get(self.pos).copied().unwrap_or(0);
            self.pos += 1;
            let mut buckets = BTreeMap::new();
            if scan > 0 {
                buckets.insert("scan_ports".to_string(), scan);
            }
            (
                PacketSketch { buckets },
                ProcessGraph {
                    new_procs: if scan > 0 { 8 } else { 0 },
                    network_procs: if scan > 0 { 4 } else { 0 },
                    ..ProcessGraph::default()
                },
            )
        }
    }

    #[test]
    fn test_sanitize_node_name() {
        assert_eq!(sanitize_node_name("Worker_1.example.COM"), "worker-1-example-com");
        assert_eq!(sanitize_node_name("--node--a--"), "node-a");
        assert_eq!(sanitize_node_name("ok-name"), "ok-name");
    }

    #[test]
    fn test_lease_name() {
        assert_eq!(lease_name_for("Node.A"), "aswarm-sentinel-node-a");
    }

    #[tokio::test]
    async fn test_elevate_requires_two_consecutive_high_ticks() {
        let cp = MemoryControlPlane::new();
        let source = ScriptedSource::new(vec![25; 20]);
        let mut sentinel = Sentinel::new(
            cp,
            SentinelConfig {
                node_name: Some("node-a".to_string()),
                ..SentinelConfig::default()
            },
            Box::new(source),
        )
        .unwrap();

        let mut first_high_seq = None;
        let mut elevate_seq = None;
        for _ in 0..20 {
            let report = sentinel.tick().await;
            if report.score > HIGH_SCORE && first_high_seq.is_none() {
                first_high_seq = Some(report.seq);
            }
            if report.elevate {
                elevate_seq = Some(report.seq);
                break;
            }
        }

        let first = first_high_seq.expect("score should cross 0.7");
        let elevated = elevate_seq.expect("should elevate");
        assert_eq!(elevated, first + 1, "elevation on the second high tick");
    }

    #[tokio::test]
    async fn test_tick_writes_lease_annotations() {
        let cp = MemoryControlPlane::new();
        let source = ScriptedSource::new(vec![0, 0]);
        let mut sentinel = Sentinel::new(
            Arc::clone(&cp) as Arc<dyn ControlPlane>,
            SentinelConfig {
                node_name: Some("node-a".to_string()),
                run_id: Some("run-t".to_string()),
                ..SentinelConfig::default()
            },
            Box::new(source),
        )
        .unwrap();

        // First tick creates the lease (404 path); second patches it.
        sentinel.tick().await;
        sentinel.tick().await;

        let mut rx = cp.watch_leases(aswarm_control::LabelSelector::new());
        let record = loop {
            match rx.recv().await.expect("event") {
                aswarm_control::WatchEvent::Added(r)
                | aswarm_control::WatchEvent::Modified(r) => break r,
                _ => continue,
            }
        };
        assert_eq!(record.name, "aswarm-sentinel-node-a");
        assert_eq!(record.annotations.get("aswarm.ai/seq").unwrap(), "2");
        assert_eq!(record.annotations.get("aswarm.ai/score").unwrap(), "0.000");
        assert_eq!(record.annotations.get("aswarm.ai/run-id").unwrap(), "run-t");
        assert_eq!(
            record.labels.get("app.kubernetes.io/component").unwrap(),
            "sentinel"
        );
        assert_eq!(
            record.holder_identity.as_deref(),
            Some("sentinel-node-a")
        );
    }
}
