// aswarm-fastpath: UDP sender
//
// One connected socket per destination with DSCP EF marking, an enlarged
// send buffer, and a low unicast TTL for intra-cluster traffic. Sends emit
// the packet 1-3 times on a jittered gap pattern to absorb single-drop loss
// without materially increasing rate.

use crate::error::{FastPathError, FastPathResult};
use crate::keys::{parse_keyval, ENV_KEY, ENV_KEYS};
use crate::payload::{build_budgeted_payload, AnomalyData};
use crate::protocol::{self, derive_src_id, seal, Header, V2, V3};
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// DSCP EF / TOS marking for latency-sensitive intra-cluster traffic
const TOS_EF: u32 = 0xb8;
/// Send buffer size
const SEND_BUFFER_SIZE: usize = 262_144;
/// Unicast TTL bound
const UNICAST_TTL: u32 = 16;

/// Sender tunables
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub host: String,
    pub port: u16,
    /// Explicit key value (raw/hex:/base64:); falls back to the environment
    pub shared_key: Option<String>,
    pub key_id: u8,
    /// Number of duplicate sends (1-3)
    pub dupes: u8,
    /// Gap between duplicates in milliseconds
    pub gap_ms: u64,
    pub protocol_version: u8,
    /// Overrides the node identity used for the stable src_id
    pub node_id: Option<String>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
            shared_key: None,
            key_id: 1,
            dupes: 3,
            gap_ms: 6,
            protocol_version: V3,
            node_id: None,
        }
    }
}

/// Statistics for one send operation
#[derive(Debug, Clone)]
pub struct SendStats {
    pub bytes: usize,
    pub send_ms_first: f64,
    pub dupes: u8,
    pub dropped_exceptions: u32,
}

/// UDP fast-path sender for high-confidence anomaly signals
pub struct FastPathSender {
    socket: tokio::net::UdpSocket,
    dest: SocketAddr,
    key: Vec<u8>,
    key_id: u8,
    dupes: u8,
    gap_ms: u64,
    version: u8,
    src_id: u32,
    node_name: String,
    sequence: AtomicU32,
    payload_budget: usize,
}

impl FastPathSender {
    pub fn new(config: SenderConfig) -> FastPathResult<Self> {
        if config.protocol_version != V2 && config.protocol_version != V3 {
            return Err(FastPathError::ConfigError(format!(
                "Unsupported protocol version {}",
                config.protocol_version
            )));
        }

        let key = resolve_sender_key(config.shared_key.as_deref(), config.key_id)?;

        // The src_id derives from the node identity, never the pod hostname,
        // so it survives pod restarts.
        let node_name = config
            .node_id
            .clone()
            .or_else(|| std::env::var("NODE_NAME").ok())
            .or_else(local_hostname)
            .ok_or_else(|| {
                FastPathError::ConfigError("Could not determine node name".to_string())
            })?;
        let src_id = derive_src_id(&node_name);

        let dest = resolve_dest(&config.host, config.port)?;
        let socket = connect_udp(dest)?;

        let payload_budget = protocol::payload_budget(config.protocol_version).ok_or_else(
            || FastPathError::ConfigError("Unsupported protocol version".to_string()),
        )?;

        info!(
            node = %node_name,
            dest = %dest,
            src_id = format!("{:08x}", src_id),
            proto = config.protocol_version,
            "fast-path sender initialized"
        );

        Ok(Self {
            socket,
            dest,
            key,
            key_id: config.key_id,
            dupes: config.dupes.clamp(1, 3),
            gap_ms: config.gap_ms,
            version: config.protocol_version,
            src_id,
            node_name,
            sequence: AtomicU32::new(0),
            payload_budget,
        })
    }

    pub fn src_id(&self) -> u32 {
        self.src_id
    }

    pub fn payload_budget(&self) -> usize {
        self.payload_budget
    }

    /// Send an elevation signal with duplicates
    pub async fn send_elevation(
        &self,
        anomaly: &AnomalyData,
        run_id: Option<&str>,
    ) -> FastPathResult<SendStats> {
        let seq32 = self.sequence.fetch_add(1, Ordering::SeqCst);
        let seq16 = (seq32 & 0xffff) as u16;

        let payload = build_budgeted_payload(
            &self.node_name,
            seq32,
            anomaly,
            run_id,
            self.payload_budget,
        )?;

        let header = self.build_header(seq32, seq16, payload.len() as u16);
        let packet = seal(&header, &payload, &self.key);

        let stats = self.send_with_dupes(&packet, seq16).await;

        info!(
            seq16,
            key_id = self.key_id,
            src_id = format!("{:08x}", self.src_id),
            dest = %self.dest,
            proto = self.version,
            bytes = stats.bytes,
            send_ms = format!("{:.1}", stats.send_ms_first),
            dupes = stats.dupes,
            "fast-path send"
        );

        Ok(stats)
    }

    fn build_header(&self, seq32: u32, seq16: u16, payload_len: u16) -> Header {
        match self.version {
            V3 => {
                // Random nonce XORed with the sequence to reduce collisions.
                let nonce32 = rand::thread_rng().gen::<u32>()
                    ^ ((seq16 as u32) | (seq32 << 16));
                Header::V3 {
                    ts_unix_ms: unix_millis(),
                    src_id: self.src_id,
                    seq16,
                    nonce32,
                    payload_len,
                    key_id: self.key_id,
                }
            }
            _ => Header::V2 {
                ts_ns: unix_nanos(),
                seq16,
                payload_len,
                key_id: self.key_id,
            },
        }
    }

    async fn send_with_dupes(&self, packet: &[u8], seq16: u16) -> SendStats {
        let gaps = [0u64, (self.gap_ms / 3).max(1), self.gap_ms];
        let mut dropped = 0u32;
        let start = Instant::now();

        for (i, gap) in gaps.iter().take(self.dupes as usize).enumerate() {
            if *gap > 0 {
                let jitter = rand::thread_rng().gen_range(0..2u64);
                tokio::time::sleep(Duration::from_millis(gap + jitter)).await;
            }
            if let Err(e) = self.socket.send(packet).await {
                warn!(dupe = i, seq16, error = %e, "duplicate send failed");
                dropped += 1;
            }
        }

        SendStats {
            bytes: packet.len(),
            send_ms_first: start.elapsed().as_secs_f64() * 1000.0,
            dupes: self.dupes,
            dropped_exceptions: dropped,
        }
    }
}

fn resolve_sender_key(explicit: Option<&str>, key_id: u8) -> FastPathResult<Vec<u8>> {
    if let Some(val) = explicit {
        return parse_keyval(val);
    }

    if let Ok(keys_json) = std::env::var(ENV_KEYS) {
        match serde_json::from_str::<HashMap<String, String>>(&keys_json) {
            Ok(map) => {
                if let Some(val) = map.get(&key_id.to_string()) {
                    return parse_keyval(val);
                }
            }
            Err(e) => warn!(error = %e, "failed to parse {}", ENV_KEYS),
        }
    }

    let single = std::env::var(ENV_KEY).map_err(|_| {
        FastPathError::ConfigError(format!(
            "HMAC key required: set {} or pass shared_key",
            ENV_KEY
        ))
    })?;
    parse_keyval(&single)
}

fn resolve_dest(host: &str, port: u16) -> FastPathResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| FastPathError::SocketError(format!("Resolve {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| {
            FastPathError::SocketError(format!("No address for {}:{}", host, port))
        })
}

fn connect_udp(dest: SocketAddr) -> FastPathResult<tokio::net::UdpSocket> {
    let domain = Domain::for_address(dest);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    // Best-effort QoS options; unsupported stacks just skip them.
    if dest.is_ipv4() {
        let _ = socket.set_tos(TOS_EF);
    }
    let _ = socket.set_send_buffer_size(SEND_BUFFER_SIZE);
    let _ = socket.set_ttl(UNICAST_TTL);

    socket.connect(&dest.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    tokio::net::UdpSocket::from_std(std_socket)
        .map_err(|e| FastPathError::SocketError(e.to_string()))
}

fn local_hostname() -> Option<String> {
    hostname::get().ok().map(|h| h.to_string_lossy().to_string())
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
