// aswarm-sentinel: Telemetry sources
//
// A packet-histogram sketch and a process-graph delta per tick. Real
// collection (eBPF maps, conntrack, CRI) is an external collaborator behind
// the trait; the shipped source simulates realistic traffic with a
// triggerable anomaly burst for drills and twin runs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Per-tick packet histogram sketch
#[derive(Debug, Clone, Default)]
pub struct PacketSketch {
    /// Connection counts per port/protocol bucket
    pub buckets: BTreeMap<String, u32>,
}

impl PacketSketch {
    /// Count of connection attempts to unusual ports this tick
    pub fn scan_ports(&self) -> u32 {
        self.buckets.get("scan_ports").copied().unwrap_or(0)
    }

    pub fn to_json(&self) -> Value {
        json!(self.buckets)
    }
}

/// Per-tick process graph delta
#[derive(Debug, Clone, Default)]
pub struct ProcessGraph {
    pub nodes: u32,
    pub edges: u32,
    pub new_procs: u32,
    pub term_procs: u32,
    pub network_procs: u32,
}

impl ProcessGraph {
    /// Process churn feeding the score
    pub fn churn(&self) -> u32 {
        self.new_procs + self.network_procs
    }

    pub fn to_json(&self) -> Value {
        json!({
            "nodes": self.nodes,
            "edges": self.edges,
            "new_procs": self.new_procs,
            "term_procs": self.term_procs,
            "network_procs": self.network_procs,
        })
    }
}

/// Source of per-tick observations
pub trait TelemetrySource: Send {
    fn sample(&mut self) -> (PacketSketch, ProcessGraph);
}

/// Simulated source with a triggerable anomaly burst
pub struct SimulatedSource {
    rng: StdRng,
    anomaly_ticks: u32,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            anomaly_ticks: 0,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            anomaly_ticks: 0,
        }
    }

    /// Make the next `ticks` samples look like an active port scan
    pub fn trigger_anomaly(&mut self, ticks: u32) {
        self.anomaly_ticks = ticks;
    }

    pub fn anomaly_active(&self) -> bool {
        self.anomaly_ticks > 0
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySource for SimulatedSource {
    fn sample(&mut self) -> (PacketSketch, ProcessGraph) {
        let rng = &mut self.rng;
        let mut buckets = BTreeMap::new();
        buckets.insert("tcp_22".to_string(), rng.gen_range(0..=5));
        buckets.insert("tcp_80".to_string(), rng.gen_range(5..=20));
        buckets.insert("tcp_443".to_string(), rng.gen_range(10..=30));
        buckets.insert("tcp_6443".to_string(), rng.gen_range(0..=8));
        buckets.insert("udp_53".to_string(), rng.gen_range(2..=10));
        buckets.insert("tcp_other".to_string(), rng.gen_range(0..=5));

        let mut graph = ProcessGraph {
            nodes: rng.gen_range(15..=25),
            edges: rng.gen_range(12..=22),
            new_procs: rng.gen_range(0..=3),
            term_procs: rng.gen_range(0..=2),
            network_procs: 0,
        };

        if self.anomaly_ticks > 0 {
            // Connection fan-out to unusual service ports plus process churn.
            buckets.insert("tcp_3306".to_string(), rng.gen_range(5..=15));
            buckets.insert("tcp_5432".to_string(), rng.gen_range(3..=12));
            buckets.insert("tcp_6379".to_string(), rng.gen_range(2..=8));
            buckets.insert("tcp_8080".to_string(), rng.gen_range(4..=16));
            buckets.insert("tcp_9200".to_string(), rng.gen_range(1..=6));
            buckets.insert("scan_ports".to_string(), rng.gen_range(8..=25));
            graph.new_procs = rng.gen_range(3..=8);
            graph.network_procs = rng.gen_range(2..=5);
            self.anomaly_ticks -= 1;
        }

        (PacketSketch { buckets }, graph)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_sample_has_no_scan_ports() {
        let mut source = SimulatedSource::with_seed(7);
        let (sketch, graph) = source.sample();
        assert_eq!(sketch.scan_ports(), 0);
        assert!(graph.churn() <= 3);
    }

    #[test]
    fn test_anomaly_burst_decrements() {
        let mut source = SimulatedSource::with_seed(7);
        source.trigger_anomaly(2);

        let (sketch, graph) = source.sample();
        assert!(sketch.scan_ports() >= 8);
        assert!(graph.churn() >= 5);
        assert!(source.anomaly_active());

        source.sample();
        assert!(!source.anomaly_active());

        let (sketch, _) = source.sample();
        assert_eq!(sketch.scan_ports(), 0);
    }
}
