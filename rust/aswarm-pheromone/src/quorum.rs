// aswarm-pheromone: Elevation decision engine
//
// Evaluated on every new signal. Two routes elevate: the fast path (quorum
// plus p95 at or above the fast-path score, immediately) and the hysteresis
// path (quorum plus mean at or above the node threshold for two consecutive
// evaluations). Everything else is diagnostic.

use crate::signals::QuorumStats;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Quorum tunables
#[derive(Debug, Clone)]
pub struct QuorumConfig {
    /// Sliding window width in milliseconds (50-500)
    pub window_ms: u64,
    /// Minimum distinct witnesses for elevation
    pub quorum_threshold: usize,
    /// Mean-score threshold for the hysteresis path
    pub node_score_threshold: f64,
    /// p95 threshold for single-window fast-path elevation
    pub fast_path_score: f64,
    /// Minimum spacing between elevations
    pub backoff: Duration,
    /// Consecutive qualifying evaluations required on the hysteresis path
    pub consecutive_required: u32,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            window_ms: 80,
            quorum_threshold: 3,
            node_score_threshold: 0.7,
            fast_path_score: 0.90,
            backoff: Duration::from_secs(2),
            consecutive_required: 2,
        }
    }
}

/// Why a decision went the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationReason {
    FastPath,
    Hysteresis,
    Building,
    Reset,
    Backoff,
    AlreadyElevated,
    NoMetrics,
    InsufficientQuorum,
}

impl ElevationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElevationReason::FastPath => "fast_path",
            ElevationReason::Hysteresis => "hysteresis",
            ElevationReason::Building => "building",
            ElevationReason::Reset => "reset",
            ElevationReason::Backoff => "backoff",
            ElevationReason::AlreadyElevated => "already_elevated",
            ElevationReason::NoMetrics => "no_metrics",
            ElevationReason::InsufficientQuorum => "insufficient_quorum",
        }
    }

    /// Whether this reason elevates
    pub fn elevates(&self) -> bool {
        matches!(self, ElevationReason::FastPath | ElevationReason::Hysteresis)
    }

    /// Whether this reason produces a decision record; the rest are
    /// diagnostic only.
    pub fn is_recorded(&self) -> bool {
        matches!(
            self,
            ElevationReason::FastPath
                | ElevationReason::Hysteresis
                | ElevationReason::Building
                | ElevationReason::Reset
        )
    }
}

/// Elevation decision record
#[derive(Debug, Clone)]
pub struct ElevationEvent {
    pub run_id: Option<String>,
    /// Server-clock decision timestamp
    pub decision_ts: DateTime<Utc>,
    pub witness_count: usize,
    pub mean_score: f64,
    pub p95_score: f64,
    pub threshold: usize,
    pub window_ms: u64,
    pub reason: ElevationReason,
    pub confidence: f64,
}

/// Outcome of evaluating one new signal
#[derive(Debug, Clone)]
pub struct Decision {
    pub elevated: bool,
    pub reason: ElevationReason,
    /// Present for recorded reasons (fast_path, hysteresis, building, reset)
    pub event: Option<ElevationEvent>,
}

struct EngineState {
    last_elevation: Option<Instant>,
    consecutive: u32,
    elevated_runs: HashSet<String>,
    elevated_unscoped: bool,
}

/// The quorum predicate with its hysteresis and backoff state
pub struct ElevationEngine {
    config: QuorumConfig,
    state: Mutex<EngineState>,
}

impl ElevationEngine {
    pub fn new(config: QuorumConfig) -> Self {
        Self {
            config,
            state: Mutex::new(EngineState {
                last_elevation: None,
                consecutive: 0,
                elevated_runs: HashSet::new(),
                elevated_unscoped: false,
            }),
        }
    }

    pub fn config(&self) -> &QuorumConfig {
        &self.config
    }

    /// Evaluate the predicate for the current window statistics
    pub fn decide(&self, stats: Option<&QuorumStats>, run_id: Option<&str>) -> Decision {
        let mut state = self.state.lock();

        let Some(stats) = stats else {
            return diagnostic(ElevationReason::NoMetrics);
        };

        if let Some(last) = state.last_elevation {
            if last.elapsed() < self.config.backoff {
                return diagnostic(ElevationReason::Backoff);
            }
        }

        let already = match run_id {
            Some(run) => state.elevated_runs.contains(run),
            None => state.elevated_unscoped,
        };
        if already {
            return diagnostic(ElevationReason::AlreadyElevated);
        }

        if stats.witness_count < self.config.quorum_threshold {
            return diagnostic(ElevationReason::InsufficientQuorum);
        }

        if stats.p95_score >= self.config.fast_path_score {
            self.mark_elevated(&mut state, run_id);
            return self.recorded(true, ElevationReason::FastPath, stats, run_id);
        }

        if stats.mean_score >= self.config.node_score_threshold {
            state.consecutive += 1;
            if state.consecutive >= self.config.consecutive_required {
                self.mark_elevated(&mut state, run_id);
                return self.recorded(true, ElevationReason::Hysteresis, stats, run_id);
            }
            return self.recorded(false, ElevationReason::Building, stats, run_id);
        }

        state.consecutive = 0;
        self.recorded(false, ElevationReason::Reset, stats, run_id)
    }

    fn mark_elevated(&self, state: &mut EngineState, run_id: Option<&str>) {
        state.last_elevation = Some(Instant::now());
        match run_id {
            Some(run) => {
                state.elevated_runs.insert(run.to_string());
            }
            None => state.elevated_unscoped = true,
        }
    }

    fn recorded(
        &self,
        elevated: bool,
        reason: ElevationReason,
        stats: &QuorumStats,
        run_id: Option<&str>,
    ) -> Decision {
        Decision {
            elevated,
            reason,
            event: Some(ElevationEvent {
                run_id: run_id.map(|r| r.to_string()),
                decision_ts: Utc::now(),
                witness_count: stats.witness_count,
                mean_score: stats.mean_score,
                p95_score: stats.p95_score,
                threshold: self.config.quorum_threshold,
                window_ms: self.config.window_ms,
                reason,
                confidence: stats.confidence,
            }),
        }
    }
}

fn diagnostic(reason: ElevationReason) -> Decision {
    Decision {
        elevated: false,
        reason,
        event: None,
    }
}
