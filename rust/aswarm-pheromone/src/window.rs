// aswarm-pheromone: Sliding signal window
//
// Bounded in-memory list of recent witness signals fed by both transports.
// Statistics are computed over the signals whose server timestamps fall
// within the last W milliseconds and whose run id matches.

use crate::signals::{QuorumStats, WitnessSignal};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

/// Hard bound on retained signals
const WINDOW_CAP: usize = 1000;
/// Tail retained after hitting the bound
const WINDOW_RETAIN: usize = 500;

/// Bounded sliding window shared by the watcher and the fast-path callback
pub struct SignalWindow {
    signals: Mutex<Vec<WitnessSignal>>,
}

impl SignalWindow {
    pub fn new() -> Self {
        Self {
            signals: Mutex::new(Vec::new()),
        }
    }

    /// Append a signal, keeping the tail when the window overflows
    pub fn push(&self, signal: WitnessSignal) {
        let mut signals = self.signals.lock();
        signals.push(signal);
        if signals.len() > WINDOW_CAP {
            let excess = signals.len() - WINDOW_RETAIN;
            signals.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.signals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Quorum statistics over the last `window_ms`, scoped to `run_id`
    ///
    /// An unscoped query (`run_id = None`) considers every signal in the
    /// window; a scoped query considers only matching run ids.
    pub fn stats(
        &self,
        window_ms: u64,
        run_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<QuorumStats> {
        let cutoff = now - ChronoDuration::milliseconds(window_ms as i64);

        let signals = self.signals.lock();
        let in_window: Vec<&WitnessSignal> = signals
            .iter()
            .filter(|s| match s.server_ts {
                Some(ts) => ts >= cutoff,
                None => false,
            })
            .filter(|s| match run_id {
                Some(run) => s.run_id.as_deref() == Some(run),
                None => true,
            })
            .collect();

        if in_window.is_empty() {
            return None;
        }

        let mut scores: Vec<f64> = in_window.iter().map(|s| s.score).collect();
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        let p95_idx = ((scores.len() as f64 * 0.95) as usize).min(scores.len() - 1);
        let p95 = scores[p95_idx];

        let witnesses = {
            let mut nodes: Vec<&str> = in_window.iter().map(|s| s.node.as_str()).collect();
            nodes.sort_unstable();
            nodes.dedup();
            nodes.len()
        };

        Some(QuorumStats::new(
            witnesses,
            in_window.len(),
            mean,
            p95,
            cutoff,
            now,
        ))
    }
}

impl Default for SignalWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn signal(node: &str, score: f64, server_ts: DateTime<Utc>, run_id: Option<&str>) -> WitnessSignal {
        let mut s = WitnessSignal::new(node, 0, score).unwrap();
        s.server_ts = Some(server_ts);
        s.run_id = run_id.map(|r| r.to_string());
        s
    }

    #[test]
    fn test_empty_window_has_no_stats() {
        let window = SignalWindow::new();
        assert!(window.stats(80, None, Utc::now()).is_none());
    }

    #[test]
    fn test_stats_count_distinct_witnesses() {
        let window = SignalWindow::new();
        let now = Utc::now();
        window.push(signal("a", 0.8, now, None));
        window.push(signal("a", 0.9, now, None));
        window.push(signal("b", 0.7, now, None));

        let stats = window.stats(80, None, now).unwrap();
        assert_eq!(stats.witness_count, 2);
        assert_eq!(stats.total_samples, 3);
        assert!((stats.mean_score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_old_signals_fall_outside_window() {
        let window = SignalWindow::new();
        let now = Utc::now();
        window.push(signal("a", 0.9, now - ChronoDuration::milliseconds(200), None));
        window.push(signal("b", 0.5, now, None));

        let stats = window.stats(80, None, now).unwrap();
        assert_eq!(stats.witness_count, 1);
        assert!((stats.mean_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_run_scoping() {
        let window = SignalWindow::new();
        let now = Utc::now();
        window.push(signal("a", 0.9, now, Some("run-1")));
        window.push(signal("b", 0.5, now, Some("run-2")));

        let stats = window.stats(80, Some("run-1"), now).unwrap();
        assert_eq!(stats.witness_count, 1);
        assert!((stats.p95_score - 0.9).abs() < 1e-9);

        // Unscoped sees both runs.
        let stats = window.stats(80, None, now).unwrap();
        assert_eq!(stats.witness_count, 2);
    }

    #[test]
    fn test_p95_nearest_rank_single_sample() {
        let window = SignalWindow::new();
        let now = Utc::now();
        window.push(signal("a", 0.95, now, None));
        let stats = window.stats(80, None, now).unwrap();
        assert!((stats.p95_score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_overflow_retains_tail() {
        let window = SignalWindow::new();
        let now = Utc::now();
        for i in 0..(WINDOW_CAP + 1) {
            window.push(signal(&format!("n{}", i), 0.5, now, None));
        }
        assert_eq!(window.len(), WINDOW_RETAIN);
    }

    #[test]
    fn test_signal_without_server_ts_excluded() {
        let window = SignalWindow::new();
        let now = Utc::now();
        let mut s = WitnessSignal::new("a", 0, 0.9).unwrap();
        s.server_ts = None;
        window.push(s);
        assert!(window.stats(80, None, now).is_none());
    }
}
