// aswarm-sentinel: Anomaly scoring
//
// raw = 0.7 * min(1, scan_ports/10) + 0.3 * min(1, churn/8), smoothed with
// an EWMA (alpha 0.4) and clamped to [0, 1].

use crate::source::{PacketSketch, ProcessGraph};

const PORT_WEIGHT: f64 = 0.7;
const CHURN_WEIGHT: f64 = 0.3;
const PORT_SATURATION: f64 = 10.0;
const CHURN_SATURATION: f64 = 8.0;
const EWMA_ALPHA: f64 = 0.4;

/// EWMA-smoothed anomaly score
#[derive(Debug, Clone, Default)]
pub struct ScoreEngine {
    ewma: f64,
}

impl ScoreEngine {
    pub fn new() -> Self {
        Self { ewma: 0.0 }
    }

    /// Fold one tick's observations into the score
    pub fn update(&mut self, sketch: &PacketSketch, graph: &ProcessGraph) -> f64 {
        let ports = (sketch.scan_ports() as f64 / PORT_SATURATION).min(1.0);
        let churn = (graph.churn() as f64 / CHURN_SATURATION).min(1.0);
        let raw = PORT_WEIGHT * ports + CHURN_WEIGHT * churn;

        self.ewma = (EWMA_ALPHA * raw + (1.0 - EWMA_ALPHA) * self.ewma).clamp(0.0, 1.0);
        self.ewma
    }

    pub fn current(&self) -> f64 {
        self.ewma
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sketch(scan_ports: u32) -> PacketSketch {
        let mut buckets = BTreeMap::new();
        if scan_ports > 0 {
            buckets.insert("scan_ports".to_string(), scan_ports);
        }
        PacketSketch { buckets }
    }

    fn graph(new_procs: u32, network_procs: u32) -> ProcessGraph {
        ProcessGraph {
            new_procs,
            network_procs,
            ..ProcessGraph::default()
        }
    }

    #[test]
    fn test_quiet_tick_scores_zero() {
        let mut engine = ScoreEngine::new();
        assert_eq!(engine.update(&sketch(0), &graph(0, 0)), 0.0);
    }

    #[test]
    fn test_saturated_tick_converges_to_one() {
        let mut engine = ScoreEngine::new();
        let mut score = 0.0;
        for _ in 0..30 {
            score = engine.update(&sketch(25), &graph(8, 4));
        }
        assert!(score > 0.99);
    }

    #[test]
    fn test_single_hot_tick_is_smoothed() {
        let mut engine = ScoreEngine::new();
        // raw = 0.7*1 + 0.3*1 = 1.0; first EWMA step lands at alpha.
        let score = engine.update(&sketch(25), &graph(8, 4));
        assert!((score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_partial_saturation() {
        let mut engine = ScoreEngine::new();
        // raw = 0.7*(5/10) + 0.3*(4/8) = 0.5; EWMA = 0.2
        let score = engine.update(&sketch(5), &graph(2, 2));
        assert!((score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_score_decays_after_anomaly() {
        let mut engine = ScoreEngine::new();
        for _ in 0..10 {
            engine.update(&sketch(25), &graph(8, 4));
        }
        let peak = engine.current();
        for _ in 0..10 {
            engine.update(&sketch(0), &graph(0, 0));
        }
        assert!(engine.current() < peak * 0.05);
    }
}
