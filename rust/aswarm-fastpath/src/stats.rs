// aswarm-fastpath: Receiver statistics
//
// Every received packet ends in exactly one terminal counter: valid, one of
// the invalid_* family, replays, stale, rate_limited, or one of the dropped_*
// family. Counters are prometheus registered; the windowed drop rate feeds
// the back-pressure monitor.

use crate::error::{FastPathError, FastPathResult};
use parking_lot::Mutex;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bounded latency sample buffer length
const LATENCY_SAMPLES: usize = 1024;
/// Drop-rate observation window
const DROP_RATE_WINDOW: Duration = Duration::from_secs(60);

/// Terminal outcome of processing one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    InvalidSize,
    InvalidMagic,
    InvalidVersion,
    InvalidType,
    InvalidLength,
    InvalidKey,
    InvalidHmac,
    InvalidJson,
    Replay,
    Stale,
    RateLimited,
    Filtered,
    DroppedSampled,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Valid => "valid",
            Verdict::InvalidSize => "invalid_size",
            Verdict::InvalidMagic => "invalid_magic",
            Verdict::InvalidVersion => "invalid_version",
            Verdict::InvalidType => "invalid_type",
            Verdict::InvalidLength => "invalid_length",
            Verdict::InvalidKey => "invalid_key",
            Verdict::InvalidHmac => "invalid_hmac",
            Verdict::InvalidJson => "invalid_json",
            Verdict::Replay => "replays",
            Verdict::Stale => "stale",
            Verdict::RateLimited => "rate_limited",
            Verdict::Filtered => "dropped_filtered",
            Verdict::DroppedSampled => "dropped_sampled",
        }
    }
}

struct RateWindow {
    start: Instant,
    received: u64,
    dropped: u64,
}

/// Point-in-time statistics snapshot for structured logs and tests
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub received: u64,
    pub valid: u64,
    pub replays: u64,
    pub stale: u64,
    pub rate_limited: u64,
    pub dropped_oldest: u64,
    pub worker_errors: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub drop_rate: f64,
    pub queue_depth: i64,
    pub ingest_dropped_total: u64,
}

/// Receiver statistics registry
pub struct FastPathStats {
    registry: Registry,
    received: IntCounter,
    valid: IntCounter,
    invalid_size: IntCounter,
    invalid_magic: IntCounter,
    invalid_version: IntCounter,
    invalid_type: IntCounter,
    invalid_length: IntCounter,
    invalid_key: IntCounter,
    invalid_hmac: IntCounter,
    invalid_json: IntCounter,
    replays: IntCounter,
    stale: IntCounter,
    rate_limited: IntCounter,
    dropped_filtered: IntCounter,
    dropped_sampled: IntCounter,
    dropped_oldest: IntCounter,
    worker_errors: IntCounter,
    queue_depth: IntGauge,
    mode: IntGauge,
    process_latency: Histogram,
    latencies: Mutex<VecDeque<f64>>,
    window: Mutex<RateWindow>,
}

impl FastPathStats {
    pub fn new() -> FastPathResult<Arc<Self>> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> FastPathResult<IntCounter> {
            IntCounter::with_opts(Opts::new(name, help))
                .map_err(|e| FastPathError::InternalError(e.to_string()))
        };

        let stats = Self {
            received: counter("aswarm_received_total", "Datagrams received")?,
            valid: counter("aswarm_valid_total", "Packets fully validated")?,
            invalid_size: counter("aswarm_invalid_size_total", "Undersized packets")?,
            invalid_magic: counter("aswarm_invalid_magic_total", "Bad magic")?,
            invalid_version: counter("aswarm_invalid_version_total", "Unsupported version")?,
            invalid_type: counter("aswarm_invalid_type_total", "Unsupported packet type")?,
            invalid_length: counter("aswarm_invalid_length_total", "Length mismatches")?,
            invalid_key: counter("aswarm_invalid_key_total", "Unknown key id")?,
            invalid_hmac: counter("aswarm_invalid_hmac_total", "HMAC mismatches")?,
            invalid_json: counter("aswarm_invalid_json_total", "Undecodable payloads")?,
            replays: counter("aswarm_replays_total", "Replayed packets")?,
            stale: counter("aswarm_stale_total", "Packets outside the age window")?,
            rate_limited: counter("aswarm_rate_limited_total", "Per-IP rate limit drops")?,
            dropped_filtered: counter(
                "aswarm_dropped_filtered_total",
                "Packets outside the source allow-list",
            )?,
            dropped_sampled: counter(
                "aswarm_dropped_sampled_total",
                "Packets skipped by overload sampling",
            )?,
            dropped_oldest: counter(
                "aswarm_dropped_oldest_total",
                "Ring-buffer drop-oldest evictions",
            )?,
            worker_errors: counter("aswarm_worker_errors_total", "Caught worker panics")?,
            queue_depth: IntGauge::with_opts(Opts::new(
                "aswarm_queue_depth",
                "Ring buffer occupancy",
            ))
            .map_err(|e| FastPathError::InternalError(e.to_string()))?,
            mode: IntGauge::with_opts(Opts::new(
                "aswarm_system_mode",
                "0=normal 1=degraded 2=overload",
            ))
            .map_err(|e| FastPathError::InternalError(e.to_string()))?,
            process_latency: Histogram::with_opts(
                HistogramOpts::new(
                    "aswarm_process_latency_ms",
                    "Per-packet processing latency in milliseconds",
                )
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0]),
            )
            .map_err(|e| FastPathError::InternalError(e.to_string()))?,
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_SAMPLES)),
            window: Mutex::new(RateWindow {
                start: Instant::now(),
                received: 0,
                dropped: 0,
            }),
            registry,
        };

        for collector in [
            &stats.received,
            &stats.valid,
            &stats.invalid_size,
            &stats.invalid_magic,
            &stats.invalid_version,
            &stats.invalid_type,
            &stats.invalid_length,
            &stats.invalid_key,
            &stats.invalid_hmac,
            &stats.invalid_json,
            &stats.replays,
            &stats.stale,
            &stats.rate_limited,
            &stats.dropped_filtered,
            &stats.dropped_sampled,
            &stats.dropped_oldest,
            &stats.worker_errors,
        ] {
            stats
                .registry
                .register(Box::new(collector.clone()))
                .map_err(|e| FastPathError::InternalError(e.to_string()))?;
        }
        stats
            .registry
            .register(Box::new(stats.queue_depth.clone()))
            .map_err(|e| FastPathError::InternalError(e.to_string()))?;
        stats
            .registry
            .register(Box::new(stats.mode.clone()))
            .map_err(|e| FastPathError::InternalError(e.to_string()))?;
        stats
            .registry
            .register(Box::new(stats.process_latency.clone()))
            .map_err(|e| FastPathError::InternalError(e.to_string()))?;

        Ok(Arc::new(stats))
    }

    /// Count a received datagram
    pub fn record_received(&self) {
        self.received.inc();
        self.window.lock().received += 1;
    }

    /// Count the single terminal verdict for one packet
    pub fn record(&self, verdict: Verdict) {
        match verdict {
            Verdict::Valid => self.valid.inc(),
            Verdict::InvalidSize => self.invalid_size.inc(),
            Verdict::InvalidMagic => self.invalid_magic.inc(),
            Verdict::InvalidVersion => self.invalid_version.inc(),
            Verdict::InvalidType => self.invalid_type.inc(),
            Verdict::InvalidLength => self.invalid_length.inc(),
            Verdict::InvalidKey => self.invalid_key.inc(),
            Verdict::InvalidHmac => self.invalid_hmac.inc(),
            Verdict::InvalidJson => self.invalid_json.inc(),
            Verdict::Replay => self.replays.inc(),
            Verdict::Stale => self.stale.inc(),
            Verdict::RateLimited => self.rate_limited.inc(),
            Verdict::Filtered => self.dropped_filtered.inc(),
            Verdict::DroppedSampled => self.dropped_sampled.inc(),
        }
        if matches!(verdict, Verdict::RateLimited) {
            self.window.lock().dropped += 1;
        }
    }

    /// Fold ring-buffer drop-oldest evictions into the counters
    pub fn record_dropped_oldest(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.dropped_oldest.inc_by(count);
        self.window.lock().dropped += count;
    }

    pub fn record_worker_error(&self) {
        self.worker_errors.inc();
    }

    pub fn record_latency_ms(&self, ms: f64) {
        self.process_latency.observe(ms);
        let mut samples = self.latencies.lock();
        samples.push_back(ms);
        if samples.len() > LATENCY_SAMPLES {
            samples.pop_front();
        }
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.queue_depth.set(depth);
    }

    pub fn set_mode(&self, mode: i64) {
        self.mode.set(mode);
    }

    /// Windowed drop rate and window age in seconds
    ///
    /// The window resets once it outgrows 60 s, so the rate always describes
    /// recent behavior.
    pub fn drop_rate(&self) -> (f64, u64) {
        let mut window = self.window.lock();
        let age = window.start.elapsed();
        if age > DROP_RATE_WINDOW {
            window.start = Instant::now();
            window.received = 0;
            window.dropped = 0;
            return (0.0, 0);
        }
        if window.received == 0 {
            return (0.0, age.as_secs());
        }
        (window.dropped as f64 / window.received as f64, age.as_secs())
    }

    /// Counter value for a verdict (test and snapshot support)
    pub fn count(&self, verdict: Verdict) -> u64 {
        match verdict {
            Verdict::Valid => self.valid.get(),
            Verdict::InvalidSize => self.invalid_size.get(),
            Verdict::InvalidMagic => self.invalid_magic.get(),
            Verdict::InvalidVersion => self.invalid_version.get(),
            Verdict::InvalidType => self.invalid_type.get(),
            Verdict::InvalidLength => self.invalid_length.get(),
            Verdict::InvalidKey => self.invalid_key.get(),
            Verdict::InvalidHmac => self.invalid_hmac.get(),
            Verdict::InvalidJson => self.invalid_json.get(),
            Verdict::Replay => self.replays.get(),
            Verdict::Stale => self.stale.get(),
            Verdict::RateLimited => self.rate_limited.get(),
            Verdict::Filtered => self.dropped_filtered.get(),
            Verdict::DroppedSampled => self.dropped_sampled.get(),
        }
    }

    /// Render all registered metrics in prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }

    /// Point-in-time snapshot
    pub fn snapshot(&self) -> StatsSnapshot {
        let (p50, p95, p99) = {
            let samples = self.latencies.lock();
            if samples.is_empty() {
                (0.0, 0.0, 0.0)
            } else {
                let mut sorted: Vec<f64> = samples.iter().copied().collect();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let pick = |q: f64| {
                    let idx = ((sorted.len() as f64 * q) as usize).min(sorted.len() - 1);
                    sorted[idx]
                };
                (pick(0.5), pick(0.95), pick(0.99))
            }
        };
        let (drop_rate, _) = self.drop_rate();
        StatsSnapshot {
            received: self.received.get(),
            valid: self.valid.get(),
            replays: self.replays.get(),
            stale: self.stale.get(),
            rate_limited: self.rate_limited.get(),
            dropped_oldest: self.dropped_oldest.get(),
            worker_errors: self.worker_errors.get(),
            p50_ms: p50,
            p95_ms: p95,
            p99_ms: p99,
            drop_rate,
            queue_depth: self.queue_depth.get(),
            ingest_dropped_total: self.dropped_oldest.get() + self.rate_limited.get(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_each_verdict_hits_its_counter() {
        let stats = FastPathStats::new().unwrap();
        let verdicts = [
            Verdict::Valid,
            Verdict::InvalidSize,
            Verdict::InvalidMagic,
            Verdict::InvalidVersion,
            Verdict::InvalidType,
            Verdict::InvalidLength,
            Verdict::InvalidKey,
            Verdict::InvalidHmac,
            Verdict::InvalidJson,
            Verdict::Replay,
            Verdict::Stale,
            Verdict::RateLimited,
            Verdict::Filtered,
            Verdict::DroppedSampled,
        ];
        for v in verdicts {
            stats.record(v);
        }
        for v in verdicts {
            assert_eq!(stats.count(v), 1, "counter for {}", v.as_str());
        }
    }

    #[test]
    fn test_drop_rate_reflects_window() {
        let stats = FastPathStats::new().unwrap();
        for _ in 0..100 {
            stats.record_received();
        }
        stats.record(Verdict::RateLimited);
        stats.record_dropped_oldest(1);
        let (rate, _) = stats.drop_rate();
        assert!((rate - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_latency_percentiles() {
        let stats = FastPathStats::new().unwrap();
        for i in 1..=100 {
            stats.record_latency_ms(i as f64);
        }
        let snap = stats.snapshot();
        assert!(snap.p50_ms >= 50.0 && snap.p50_ms <= 52.0);
        assert!(snap.p95_ms >= 95.0 && snap.p95_ms <= 97.0);
    }

    #[test]
    fn test_render_contains_counters() {
        let stats = FastPathStats::new().unwrap();
        stats.record_received();
        stats.record(Verdict::Valid);
        let text = stats.render();
        assert!(text.contains("aswarm_received_total 1"));
        assert!(text.contains("aswarm_valid_total 1"));
    }
}
