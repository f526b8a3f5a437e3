// aswarm-fastpath: UDP listener
//
// One receive loop feeding a bounded ring buffer, a fixed pool of worker
// threads running the validation pipeline, a 10 s maintenance loop pruning
// replay state, and a 1 Hz monitor driving the back-pressure state machine.
// Per-packet failures never propagate; they become counters.

use crate::backpressure::{BackPressure, BackPressureConfig, SystemMode};
use crate::error::{FastPathError, FastPathResult};
use crate::keys::KeyTable;
use crate::protocol::MAX_PACKET_SIZE;
use crate::ring::{RingBuffer, RingEntry};
use crate::stats::{FastPathStats, Verdict};
use crate::validator::{PacketValidator, ValidPacket, ValidatorConfig};
use ipnet::IpNet;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, UdpSocket};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Receive buffer sizes to attempt, largest first
const RECV_BUFFER_SIZES: [usize; 4] = [8 * 1024 * 1024, 4 * 1024 * 1024, 1024 * 1024, 262_144];
/// Socket read timeout; bounds shutdown latency and paces idle loops
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);
/// Worker pop timeout
const POP_TIMEOUT: Duration = Duration::from_secs(1);

/// Callback invoked for every validated elevation packet
pub type ElevationCallback = Arc<dyn Fn(ValidPacket) + Send + Sync>;

/// Listener tunables
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub ring_capacity: usize,
    pub num_workers: usize,
    pub stale_window_secs: u64,
    pub allow_cidrs: Vec<String>,
    pub rate_capacity: f64,
    pub rate_fill_per_sec: f64,
    pub backpressure: BackPressureConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8888,
            ring_capacity: 10_000,
            num_workers: default_workers(),
            stale_window_secs: 60,
            allow_cidrs: Vec::new(),
            rate_capacity: 100.0,
            rate_fill_per_sec: 50.0,
            backpressure: BackPressureConfig::default(),
        }
    }
}

/// Worker pool size: 2x CPU, floor 2, cap 32
pub fn default_workers() -> usize {
    (num_cpus::get() * 2).clamp(2, 32)
}

/// Authenticated UDP fast-path listener
pub struct FastPathListener {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    ring: Arc<RingBuffer>,
    validator: Arc<PacketValidator>,
    stats: Arc<FastPathStats>,
    backpressure: Arc<BackPressure>,
    keys: Arc<KeyTable>,
    callback: ElevationCallback,
    running: Arc<AtomicBool>,
    num_workers: usize,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl FastPathListener {
    pub fn new(
        config: ListenerConfig,
        keys: Arc<KeyTable>,
        callback: ElevationCallback,
    ) -> FastPathResult<Self> {
        let mut allow_nets = Vec::new();
        for cidr in &config.allow_cidrs {
            let net: IpNet = cidr
                .parse()
                .map_err(|e| FastPathError::ConfigError(format!("Invalid CIDR {}: {}", cidr, e)))?;
            allow_nets.push(net);
        }

        let validator_config = ValidatorConfig {
            stale_window: Duration::from_secs(config.stale_window_secs),
            allow_nets,
            rate_capacity: config.rate_capacity,
            rate_fill_per_sec: config.rate_fill_per_sec,
            ..ValidatorConfig::default()
        };

        let bind: SocketAddr = format!("{}:{}", config.bind_addr, config.port)
            .parse()
            .map_err(|e| {
                FastPathError::ConfigError(format!("Invalid bind address: {}", e))
            })?;
        let socket = bind_udp_socket(bind)?;
        let local_addr = socket.local_addr()?;

        let stats = FastPathStats::new()?;
        stats.set_queue_depth(0);
        stats.set_mode(SystemMode::Normal.as_gauge());

        info!(
            addr = %local_addr,
            workers = config.num_workers,
            ring = config.ring_capacity,
            keys = ?keys.ids(),
            "fast-path listener initialized"
        );

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            ring: Arc::new(RingBuffer::new(config.ring_capacity)),
            validator: Arc::new(PacketValidator::new(Arc::clone(&keys), validator_config)),
            stats,
            backpressure: Arc::new(BackPressure::new(config.backpressure.clone())),
            keys,
            callback,
            running: Arc::new(AtomicBool::new(false)),
            num_workers: config.num_workers,
            threads: Mutex::new(Vec::new()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<FastPathStats> {
        Arc::clone(&self.stats)
    }

    pub fn backpressure(&self) -> Arc<BackPressure> {
        Arc::clone(&self.backpressure)
    }

    /// True while the receive loop is live (health endpoint)
    pub fn is_live(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Reload HMAC keys from the environment without restart
    pub fn reload_keys(&self) {
        self.keys.reload_from_env();
    }

    /// Start receiver, workers, maintenance, and monitor threads
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut threads = self.threads.lock();

        {
            let socket = Arc::clone(&self.socket);
            let ring = Arc::clone(&self.ring);
            let stats = Arc::clone(&self.stats);
            let running = Arc::clone(&self.running);
            threads.push(std::thread::spawn(move || {
                receive_loop(&socket, &ring, &stats, &running);
            }));
        }

        for worker_id in 0..self.num_workers {
            let ring = Arc::clone(&self.ring);
            let validator = Arc::clone(&self.validator);
            let stats = Arc::clone(&self.stats);
            let backpressure = Arc::clone(&self.backpressure);
            let callback = Arc::clone(&self.callback);
            let running = Arc::clone(&self.running);
            threads.push(std::thread::spawn(move || {
                worker_loop(
                    worker_id,
                    &ring,
                    &validator,
                    &stats,
                    &backpressure,
                    &callback,
                    &running,
                );
            }));
        }

        {
            let ring = Arc::clone(&self.ring);
            let validator = Arc::clone(&self.validator);
            let stats = Arc::clone(&self.stats);
            let running = Arc::clone(&self.running);
            threads.push(std::thread::spawn(move || {
                maintenance_loop(&ring, &validator, &stats, &running);
            }));
        }

        {
            let ring = Arc::clone(&self.ring);
            let stats = Arc::clone(&self.stats);
            let backpressure = Arc::clone(&self.backpressure);
            let running = Arc::clone(&self.running);
            threads.push(std::thread::spawn(move || {
                monitor_loop(&ring, &stats, &backpressure, &running);
            }));
        }

        info!("fast-path listener started");
    }

    /// Stop all threads; in-flight packets finish, then workers drain
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        info!("fast-path listener stopped");
    }
}

fn bind_udp_socket(bind: SocketAddr) -> FastPathResult<UdpSocket> {
    let domain = Domain::for_address(bind);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    {
        let _ = socket.set_reuse_port(true);
    }
    for size in RECV_BUFFER_SIZES {
        if socket.set_recv_buffer_size(size).is_ok() {
            debug!(size, "set UDP receive buffer");
            break;
        }
    }
    socket.bind(&bind.into())?;
    socket.set_read_timeout(Some(SOCKET_TIMEOUT))?;
    Ok(socket.into())
}

fn receive_loop(
    socket: &UdpSocket,
    ring: &RingBuffer,
    stats: &FastPathStats,
    running: &AtomicBool,
) {
    let mut buf = [0u8; MAX_PACKET_SIZE * 2];
    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((len, addr)) => {
                stats.record_received();
                let entry = RingEntry {
                    data: buf[..len].to_vec(),
                    addr,
                    recv_time: Instant::now(),
                    recv_unix_nanos: unix_nanos(),
                };
                // Dropped-oldest is tracked inside the ring and collected by
                // the maintenance loop.
                ring.push(entry);
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    error!(error = %e, "receive error");
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    worker_id: usize,
    ring: &RingBuffer,
    validator: &PacketValidator,
    stats: &FastPathStats,
    backpressure: &BackPressure,
    callback: &ElevationCallback,
    running: &AtomicBool,
) {
    while running.load(Ordering::SeqCst) {
        let Some(entry) = ring.pop(POP_TIMEOUT) else {
            continue;
        };

        let result = catch_unwind(AssertUnwindSafe(|| {
            process_entry(&entry, ring, validator, stats, backpressure, callback);
        }));
        if result.is_err() {
            stats.record_worker_error();
            error!(worker_id, "worker caught panic; continuing");
        }
    }
}

fn process_entry(
    entry: &RingEntry,
    ring: &RingBuffer,
    validator: &PacketValidator,
    stats: &FastPathStats,
    backpressure: &BackPressure,
    callback: &ElevationCallback,
) {
    let start = Instant::now();

    // OVERLOAD sampling: a deterministic hash of receive time and source
    // port picks the 1-in-N packets that still get full processing.
    if backpressure.effective(ring.fill_ratio()) == SystemMode::Overload {
        let hash = entry.recv_unix_nanos.wrapping_add(entry.addr.port() as u64);
        if hash % backpressure.sample_divisor() != 0 {
            stats.record(Verdict::DroppedSampled);
            return;
        }
    }

    match validator.check(&entry.data, entry.addr) {
        Ok(valid) => {
            stats.record(Verdict::Valid);
            if backpressure.current() == SystemMode::Normal {
                (callback)(valid);
            } else {
                debug!(mode = backpressure.current().as_str(), "callback suppressed");
            }
        }
        Err(verdict) => {
            stats.record(verdict);
        }
    }

    stats.record_latency_ms(start.elapsed().as_secs_f64() * 1000.0);
}

fn maintenance_loop(
    ring: &RingBuffer,
    validator: &PacketValidator,
    stats: &FastPathStats,
    running: &AtomicBool,
) {
    let mut ticks = 0u32;
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(500));
        ticks += 1;
        if ticks < 20 {
            continue;
        }
        ticks = 0;

        validator.replay_guard().prune_expired();
        let dropped = ring.take_dropped();
        stats.record_dropped_oldest(dropped);
    }
}

fn monitor_loop(
    ring: &RingBuffer,
    stats: &FastPathStats,
    backpressure: &BackPressure,
    running: &AtomicBool,
) {
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs(1));

        let ratio = ring.fill_ratio();
        stats.set_queue_depth(ring.len() as i64);

        let (drop_rate, window_secs) = stats.drop_rate();
        // Drop-rate decisions need a settled window; queue pressure does not.
        let effective_drop_rate = if window_secs >= 10 { drop_rate } else { 0.0 };

        if backpressure.warn_level(effective_drop_rate) {
            warn!(
                drop_rate = format!("{:.2}%", effective_drop_rate * 100.0),
                window_secs, "high drop rate"
            );
        }

        if let Some(transition) = backpressure.observe(ratio, effective_drop_rate) {
            stats.set_mode(transition.to.as_gauge());
            warn!(
                from = transition.from.as_str(),
                to = transition.to.as_str(),
                reason = transition.reason,
                queue_ratio = format!("{:.2}", ratio),
                "system mode change"
            );
        }
    }
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
