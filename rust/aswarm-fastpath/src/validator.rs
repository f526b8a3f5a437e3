// aswarm-fastpath: Packet validation pipeline
//
// The full per-packet check sequence, cheapest first: structure, declared
// lengths, timestamp age (before the HMAC so stale floods are rejected
// cheaply), key lookup, constant-time HMAC, sequence-window replay, hash
// replay, JSON decode, payload staleness, source allow-list, rate limit.
// Every rejection maps to exactly one Verdict.

use crate::keys::KeyTable;
use crate::payload::ElevationPayload;
use crate::protocol::{self, Header, PacketDefect, HMAC_SIZE, MAX_AGE_MS, V2_HEADER_SIZE};
use crate::rate_limit::RateLimiter;
use crate::replay::{source_key_v2, source_key_v3, ReplayGuard};
use crate::stats::Verdict;
use ipnet::IpNet;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Transport metadata attached to every delivered payload
#[derive(Debug, Clone)]
pub struct FastPathMeta {
    pub source_addr: SocketAddr,
    /// Stable source id (v3 packets only)
    pub src_id: Option<u32>,
    pub seq16: u16,
    /// Random nonce (v3 packets only)
    pub nonce32: Option<u32>,
    pub key_id: u8,
    /// Header timestamp normalized to Unix milliseconds. For v2 packets this
    /// is derived from the nanosecond field and is advisory only.
    pub timestamp_ms: u64,
    /// Age computed against the receiver clock (v3 packets only)
    pub age_ms: Option<u64>,
    pub version: u8,
}

/// A packet that survived the full pipeline
#[derive(Debug, Clone)]
pub struct ValidPacket {
    pub payload: ElevationPayload,
    pub meta: FastPathMeta,
}

/// Validator tunables
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Secondary staleness window applied to the payload wall_ts
    pub stale_window: Duration,
    /// Optional source allow-list; empty admits everything
    pub allow_nets: Vec<IpNet>,
    /// Token-bucket capacity per source IP
    pub rate_capacity: f64,
    /// Token-bucket fill rate per source IP
    pub rate_fill_per_sec: f64,
    /// Packet-hash replay cache bound
    pub replay_cache_size: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            stale_window: Duration::from_secs(60),
            allow_nets: Vec::new(),
            rate_capacity: 100.0,
            rate_fill_per_sec: 50.0,
            replay_cache_size: 10_000,
        }
    }
}

/// The per-packet validation pipeline
pub struct PacketValidator {
    keys: std::sync::Arc<KeyTable>,
    replay: ReplayGuard,
    limiter: RateLimiter,
    config: ValidatorConfig,
}

impl PacketValidator {
    pub fn new(keys: std::sync::Arc<KeyTable>, config: ValidatorConfig) -> Self {
        let replay = ReplayGuard::new(config.stale_window, config.replay_cache_size);
        let limiter = RateLimiter::new(config.rate_capacity, config.rate_fill_per_sec);
        Self {
            keys,
            replay,
            limiter,
            config,
        }
    }

    pub fn replay_guard(&self) -> &ReplayGuard {
        &self.replay
    }

    /// Validate one datagram against the current clock
    pub fn check(&self, data: &[u8], addr: SocketAddr) -> Result<ValidPacket, Verdict> {
        self.check_at(data, addr, unix_millis())
    }

    /// Validate one datagram against an explicit receiver clock (tests)
    pub fn check_at(
        &self,
        data: &[u8],
        addr: SocketAddr,
        now_ms: u64,
    ) -> Result<ValidPacket, Verdict> {
        if data.len() < V2_HEADER_SIZE + HMAC_SIZE {
            return Err(Verdict::InvalidSize);
        }

        let header = Header::decode(data).map_err(|defect| match defect {
            PacketDefect::TooShort => Verdict::InvalidSize,
            PacketDefect::BadMagic => Verdict::InvalidMagic,
            PacketDefect::BadVersion => Verdict::InvalidVersion,
            PacketDefect::BadType => Verdict::InvalidType,
            PacketDefect::BadLength => Verdict::InvalidLength,
        })?;

        let budget = protocol::payload_budget(header.version()).ok_or(Verdict::InvalidVersion)?;
        if header.payload_len() > budget {
            return Err(Verdict::InvalidLength);
        }
        let expected = header.size() + header.payload_len() + HMAC_SIZE;
        if data.len() != expected {
            return Err(Verdict::InvalidLength);
        }

        // Strict age window before the HMAC, v3 only: v2 nanosecond
        // timestamps mix clock sources across hosts and are advisory.
        let (timestamp_ms, age_ms) = match header {
            Header::V3 { ts_unix_ms, .. } => {
                let age = now_ms.abs_diff(ts_unix_ms);
                if age > MAX_AGE_MS {
                    return Err(Verdict::Stale);
                }
                (ts_unix_ms, Some(age))
            }
            Header::V2 { ts_ns, .. } => (ts_ns / 1_000_000, None),
        };

        let key = self.keys.get(header.key_id()).ok_or(Verdict::InvalidKey)?;
        let signed_len = header.size() + header.payload_len();
        if !protocol::verify_tag(&key, &data[..signed_len], &data[signed_len..]) {
            return Err(Verdict::InvalidHmac);
        }

        // Sequence window first so forged floods cannot fill the hash cache.
        let source = match header {
            Header::V3 { src_id, .. } => source_key_v3(src_id),
            Header::V2 { .. } => source_key_v2(&addr),
        };
        if !self.replay.check_sequence(source, header.seq16()) {
            return Err(Verdict::Replay);
        }
        if !self.replay.check_packet_hash(data) {
            return Err(Verdict::Replay);
        }

        let payload = ElevationPayload::decode(&data[header.size()..signed_len])
            .map_err(|_| Verdict::InvalidJson)?;

        // Secondary staleness from the payload wall clock; parse failures
        // pass rather than reject.
        if let Some(epoch_secs) = payload.wall_ts.as_ref().and_then(|ts| ts.epoch_seconds()) {
            let now_secs = now_ms as f64 / 1000.0;
            let approx_age = (now_secs - epoch_secs).max(0.0);
            if approx_age > self.config.stale_window.as_secs_f64() {
                return Err(Verdict::Stale);
            }
        }

        if !self.config.allow_nets.is_empty()
            && !self
                .config
                .allow_nets
                .iter()
                .any(|net| net.contains(&addr.ip()))
        {
            return Err(Verdict::Filtered);
        }

        if !self.limiter.allow(addr.ip()) {
            return Err(Verdict::RateLimited);
        }

        let meta = match header {
            Header::V3 {
                src_id,
                seq16,
                nonce32,
                key_id,
                ..
            } => FastPathMeta {
                source_addr: addr,
                src_id: Some(src_id),
                seq16,
                nonce32: Some(nonce32),
                key_id,
                timestamp_ms,
                age_ms,
                version: protocol::V3,
            },
            Header::V2 { seq16, key_id, .. } => FastPathMeta {
                source_addr: addr,
                src_id: None,
                seq16,
                nonce32: None,
                key_id,
                timestamp_ms,
                age_ms,
                version: protocol::V2,
            },
        };

        Ok(ValidPacket { payload, meta })
    }
}

/// Current Unix time in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::{seal, V3};
    use std::collections::HashMap;
    use std::sync::Arc;

    const KEY: &[u8] = b"unit-test-key";

    fn keys() -> Arc<KeyTable> {
        let mut map = HashMap::new();
        map.insert(1u8, String::from_utf8(KEY.to_vec()).unwrap());
        Arc::new(KeyTable::from_map(&map).unwrap())
    }

    fn validator() -> PacketValidator {
        PacketValidator::new(keys(), ValidatorConfig::default())
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn v3_packet(ts_unix_ms: u64, seq16: u16, payload: &[u8]) -> Vec<u8> {
        let header = Header::V3 {
            ts_unix_ms,
            src_id: 0xab12_cd34,
            seq16,
            nonce32: 7,
            payload_len: payload.len() as u16,
            key_id: 1,
        };
        seal(&header, payload, KEY)
    }

    const NOW_MS: u64 = 1_700_000_000_000;

    fn payload_json() -> Vec<u8> {
        br#"{"node_id":"n1","anomaly":{"score":0.95,"witness_count":1,"selector":"node=n1"}}"#
            .to_vec()
    }

    #[test]
    fn test_valid_packet_passes_with_meta() {
        let v = validator();
        let packet = v3_packet(NOW_MS - 100, 1, &payload_json());
        let valid = v.check_at(&packet, addr(), NOW_MS).unwrap();
        assert_eq!(valid.meta.src_id, Some(0xab12_cd34));
        assert_eq!(valid.meta.seq16, 1);
        assert_eq!(valid.meta.age_ms, Some(100));
        assert_eq!(valid.meta.version, V3);
        assert_eq!(valid.payload.anomaly.score, Some(0.95));
    }

    #[test]
    fn test_short_packet_is_invalid_size() {
        let v = validator();
        assert_eq!(
            v.check_at(&[0u8; 10], addr(), NOW_MS).unwrap_err(),
            Verdict::InvalidSize
        );
    }

    #[test]
    fn test_bad_magic() {
        let v = validator();
        let mut packet = v3_packet(NOW_MS, 1, &payload_json());
        packet[0] = b'Z';
        assert_eq!(
            v.check_at(&packet, addr(), NOW_MS).unwrap_err(),
            Verdict::InvalidMagic
        );
    }

    #[test]
    fn test_truncated_packet_is_length_mismatch() {
        let v = validator();
        let packet = v3_packet(NOW_MS, 1, &payload_json());
        assert_eq!(
            v.check_at(&packet[..packet.len() - 1], addr(), NOW_MS)
                .unwrap_err(),
            Verdict::InvalidLength
        );
    }

    #[test]
    fn test_oversize_declared_payload_rejected() {
        let header = Header::V3 {
            ts_unix_ms: NOW_MS,
            src_id: 1,
            seq16: 1,
            nonce32: 0,
            payload_len: 1500,
            key_id: 1,
        };
        let mut packet = header.encode();
        packet.extend_from_slice(&[0u8; 64]);
        let v = validator();
        assert_eq!(
            v.check_at(&packet, addr(), NOW_MS).unwrap_err(),
            Verdict::InvalidLength
        );
    }

    #[test]
    fn test_age_boundary_5000_accepted_5001_rejected() {
        let v = validator();

        let packet = v3_packet(NOW_MS - 5000, 1, &payload_json());
        assert!(v.check_at(&packet, addr(), NOW_MS).is_ok());

        let packet = v3_packet(NOW_MS - 5001, 2, &payload_json());
        assert_eq!(
            v.check_at(&packet, addr(), NOW_MS).unwrap_err(),
            Verdict::Stale
        );
    }

    #[test]
    fn test_unknown_key_id_distinct_from_hmac_mismatch() {
        let v = validator();

        let header = Header::V3 {
            ts_unix_ms: NOW_MS,
            src_id: 1,
            seq16: 1,
            nonce32: 0,
            payload_len: payload_json().len() as u16,
            key_id: 9,
        };
        let packet = seal(&header, &payload_json(), KEY);
        assert_eq!(
            v.check_at(&packet, addr(), NOW_MS).unwrap_err(),
            Verdict::InvalidKey
        );

        let forged = {
            let header = Header::V3 {
                ts_unix_ms: NOW_MS,
                src_id: 1,
                seq16: 1,
                nonce32: 0,
                payload_len: payload_json().len() as u16,
                key_id: 1,
            };
            seal(&header, &payload_json(), b"attacker-key")
        };
        assert_eq!(
            v.check_at(&forged, addr(), NOW_MS).unwrap_err(),
            Verdict::InvalidHmac
        );
    }

    #[test]
    fn test_replayed_packet_rejected_once_delivered_once() {
        let v = validator();
        let packet = v3_packet(NOW_MS, 5, &payload_json());
        assert!(v.check_at(&packet, addr(), NOW_MS).is_ok());
        assert_eq!(
            v.check_at(&packet, addr(), NOW_MS).unwrap_err(),
            Verdict::Replay
        );
    }

    #[test]
    fn test_invalid_json_payload() {
        let v = validator();
        let packet = v3_packet(NOW_MS, 1, b"{not json");
        assert_eq!(
            v.check_at(&packet, addr(), NOW_MS).unwrap_err(),
            Verdict::InvalidJson
        );
    }

    #[test]
    fn test_stale_payload_wall_ts_rejected() {
        let v = validator();
        let old = r#"{"node_id":"n1","wall_ts":"2020-01-01T00:00:00Z","anomaly":{"score":0.9}}"#;
        let packet = v3_packet(NOW_MS, 1, old.as_bytes());
        assert_eq!(
            v.check_at(&packet, addr(), NOW_MS).unwrap_err(),
            Verdict::Stale
        );
    }

    #[test]
    fn test_allow_list_filters_sources() {
        let config = ValidatorConfig {
            allow_nets: vec!["10.0.0.0/8".parse().unwrap()],
            ..ValidatorConfig::default()
        };
        let v = PacketValidator::new(keys(), config);
        let packet = v3_packet(NOW_MS, 1, &payload_json());
        assert_eq!(
            v.check_at(&packet, addr(), NOW_MS).unwrap_err(),
            Verdict::Filtered
        );

        let allowed: SocketAddr = "10.1.2.3:40000".parse().unwrap();
        let packet = v3_packet(NOW_MS, 2, &payload_json());
        assert!(v.check_at(&packet, allowed, NOW_MS).is_ok());
    }

    #[test]
    fn test_rate_limit_rejects_when_bucket_empty() {
        let config = ValidatorConfig {
            rate_capacity: 1.0,
            rate_fill_per_sec: 0.0,
            ..ValidatorConfig::default()
        };
        let v = PacketValidator::new(keys(), config);
        let first = v3_packet(NOW_MS, 1, &payload_json());
        assert!(v.check_at(&first, addr(), NOW_MS).is_ok());
        let second = v3_packet(NOW_MS, 2, &payload_json());
        assert_eq!(
            v.check_at(&second, addr(), NOW_MS).unwrap_err(),
            Verdict::RateLimited
        );
    }

    #[test]
    fn test_v2_packet_accepted_with_advisory_timestamp() {
        let v = validator();
        let payload = payload_json();
        // A v2 timestamp far in the past still passes: advisory only.
        let header = Header::V2 {
            ts_ns: 1_000_000_000,
            seq16: 1,
            payload_len: payload.len() as u16,
            key_id: 1,
        };
        let packet = seal(&header, &payload, KEY);
        let valid = v.check_at(&packet, addr(), NOW_MS).unwrap();
        assert_eq!(valid.meta.version, 2);
        assert_eq!(valid.meta.age_ms, None);
        assert_eq!(valid.meta.src_id, None);
    }

    #[test]
    fn test_exactly_one_verdict_per_packet() {
        // Representative packets, each with its single terminal verdict.
        let v = validator();
        let cases: Vec<(Vec<u8>, Result<(), Verdict>)> = vec![
            (v3_packet(NOW_MS, 1, &payload_json()), Ok(())),
            (vec![0u8; 20], Err(Verdict::InvalidSize)),
            (v3_packet(NOW_MS - 9000, 2, &payload_json()), Err(Verdict::Stale)),
        ];
        for (packet, expected) in cases {
            let got = v.check_at(&packet, addr(), NOW_MS).map(|_| ());
            assert_eq!(got, expected);
        }
    }
}
