// aswarm-fastpath: Back-pressure state machine
//
// NORMAL -> DEGRADED on sustained queue pressure or drop rate; DEGRADED is
// audit-only (elevation callbacks suppressed). OVERLOAD is a sub-mode of
// DEGRADED at extreme queue fill where workers sample 1-in-N packets.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Operating modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemMode {
    Normal,
    Degraded,
    Overload,
}

impl SystemMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemMode::Normal => "normal",
            SystemMode::Degraded => "degraded",
            SystemMode::Overload => "overload",
        }
    }

    pub fn as_gauge(&self) -> i64 {
        match self {
            SystemMode::Normal => 0,
            SystemMode::Degraded => 1,
            SystemMode::Overload => 2,
        }
    }
}

/// Back-pressure thresholds
#[derive(Debug, Clone)]
pub struct BackPressureConfig {
    /// Queue-fill ratio that starts the degrade timer
    pub queue_degrade_ratio: f64,
    /// How long the queue must stay hot before degrading
    pub queue_degrade_sustain: Duration,
    /// Drop rate that degrades outright
    pub drop_rate_degrade: f64,
    /// Warning-only drop rate
    pub drop_rate_warn: f64,
    /// Startup grace before drop-rate triggers apply
    pub drop_rate_grace: Duration,
    /// Recovery requires the queue below this ratio
    pub queue_recover_ratio: f64,
    /// Recovery requires the drop rate below this
    pub drop_rate_recover: f64,
    /// Queue ratio above which DEGRADED becomes OVERLOAD
    pub overload_ratio: f64,
    /// 1-in-N sampling divisor in OVERLOAD
    pub sample_divisor: u64,
}

impl Default for BackPressureConfig {
    fn default() -> Self {
        Self {
            queue_degrade_ratio: 0.9,
            queue_degrade_sustain: Duration::from_secs(3),
            drop_rate_degrade: 0.02,
            drop_rate_warn: 0.005,
            drop_rate_grace: Duration::from_secs(30),
            queue_recover_ratio: 0.2,
            drop_rate_recover: 0.0025,
            overload_ratio: 0.98,
            sample_divisor: 8,
        }
    }
}

/// A mode transition with its trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTransition {
    pub from: SystemMode,
    pub to: SystemMode,
    pub reason: &'static str,
}

struct ModeState {
    mode: SystemMode,
    queue_hot_since: Option<Instant>,
}

/// Back-pressure controller, polled at 1 Hz by the monitor loop
pub struct BackPressure {
    config: BackPressureConfig,
    state: Mutex<ModeState>,
    started: Instant,
}

impl BackPressure {
    pub fn new(config: BackPressureConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ModeState {
                mode: SystemMode::Normal,
                queue_hot_since: None,
            }),
            started: Instant::now(),
        }
    }

    /// Stored mode (never OVERLOAD; that is derived per packet)
    pub fn current(&self) -> SystemMode {
        self.state.lock().mode
    }

    /// Effective mode for a worker given the current queue ratio
    pub fn effective(&self, queue_ratio: f64) -> SystemMode {
        let mode = self.current();
        if mode == SystemMode::Degraded && queue_ratio > self.config.overload_ratio {
            SystemMode::Overload
        } else {
            mode
        }
    }

    pub fn sample_divisor(&self) -> u64 {
        self.config.sample_divisor
    }

    /// Whether a drop rate is worth a warning without degrading
    pub fn warn_level(&self, drop_rate: f64) -> bool {
        drop_rate > self.config.drop_rate_warn && drop_rate <= self.config.drop_rate_degrade
    }

    /// Feed one observation; returns a transition when the mode changes
    pub fn observe(&self, queue_ratio: f64, drop_rate: f64) -> Option<ModeTransition> {
        let now = Instant::now();
        let mut state = self.state.lock();

        match state.mode {
            SystemMode::Normal => {
                if queue_ratio > self.config.queue_degrade_ratio {
                    let hot_since = *state.queue_hot_since.get_or_insert(now);
                    if now.duration_since(hot_since) >= self.config.queue_degrade_sustain {
                        state.mode = SystemMode::Degraded;
                        state.queue_hot_since = None;
                        return Some(ModeTransition {
                            from: SystemMode::Normal,
                            to: SystemMode::Degraded,
                            reason: "queue_pressure",
                        });
                    }
                } else {
                    state.queue_hot_since = None;
                    if drop_rate > self.config.drop_rate_degrade
                        && self.started.elapsed() >= self.config.drop_rate_grace
                    {
                        state.mode = SystemMode::Degraded;
                        return Some(ModeTransition {
                            from: SystemMode::Normal,
                            to: SystemMode::Degraded,
                            reason: "high_drop_rate",
                        });
                    }
                }
                None
            }
            SystemMode::Degraded | SystemMode::Overload => {
                if queue_ratio < self.config.queue_recover_ratio
                    && drop_rate < self.config.drop_rate_recover
                {
                    state.mode = SystemMode::Normal;
                    state.queue_hot_since = None;
                    return Some(ModeTransition {
                        from: SystemMode::Degraded,
                        to: SystemMode::Normal,
                        reason: "queue_recovered",
                    });
                }
                None
            }
        }
    }
}
