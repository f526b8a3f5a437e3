// aswarm-fastpath: Replay defense
//
// Two layers, in a fixed order: the per-source sequence window runs first so
// a flood of forged packets cannot fill the hash cache, then a packet-hash
// cache catches byte-identical duplicates whose sequence state was lost.
// Both run only after HMAC verification.

use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Max sequences remembered per source
const SEQ_WINDOW: usize = 256;

/// Replay key for a source
///
/// v3 packets carry a stable 32-bit src_id. v2 packets do not, so the
/// receiver keys them on a hash of the sender address instead; the high bit
/// keeps the two spaces from colliding.
pub fn source_key_v3(src_id: u32) -> u64 {
    src_id as u64
}

pub fn source_key_v2(addr: &SocketAddr) -> u64 {
    let digest = Sha256::digest(addr.to_string().as_bytes());
    let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (1u64 << 32) | hash as u64
}

struct SeqWindow {
    highest: u16,
    seen: BTreeSet<u16>,
}

struct HashCache {
    seen: HashSet<[u8; 16]>,
    expire: VecDeque<([u8; 16], Instant)>,
}

/// Per-source sequence windows plus a bounded packet-hash cache
pub struct ReplayGuard {
    sequences: DashMap<u64, SeqWindow>,
    hashes: Mutex<HashCache>,
    hash_ttl: Duration,
    hash_capacity: usize,
}

impl ReplayGuard {
    pub fn new(hash_ttl: Duration, hash_capacity: usize) -> Self {
        Self {
            sequences: DashMap::new(),
            hashes: Mutex::new(HashCache {
                seen: HashSet::new(),
                expire: VecDeque::new(),
            }),
            hash_ttl,
            hash_capacity,
        }
    }

    /// Check and record a sequence for a source. Returns true when fresh.
    ///
    /// A sequence is a replay when it falls behind the 256-wide window
    /// (strictly below highest - 256) or was already seen. On acceptance the
    /// window advances and old sequences are pruned.
    pub fn check_sequence(&self, source: u64, seq: u16) -> bool {
        let mut entry = self.sequences.entry(source).or_insert_with(|| SeqWindow {
            highest: 0,
            seen: BTreeSet::new(),
        });

        let floor = entry.highest as i64 - SEQ_WINDOW as i64;
        if (seq as i64) < floor {
            return false;
        }
        if entry.seen.contains(&seq) {
            return false;
        }

        if seq > entry.highest {
            entry.highest = seq;
        }
        entry.seen.insert(seq);

        if entry.seen.len() > SEQ_WINDOW {
            let min_keep = entry.highest as i64 - (SEQ_WINDOW as i64 - 1);
            if min_keep > 0 {
                let keep = min_keep as u16;
                entry.seen = entry.seen.split_off(&keep);
            }
        }

        true
    }

    /// Check and record a packet hash. Returns true when fresh.
    pub fn check_packet_hash(&self, data: &[u8]) -> bool {
        let digest = Sha256::digest(data);
        let mut hash = [0u8; 16];
        hash.copy_from_slice(&digest[..16]);

        let mut cache = self.hashes.lock();
        if cache.seen.contains(&hash) {
            return false;
        }
        cache.seen.insert(hash);
        let deadline = Instant::now() + self.hash_ttl;
        cache.expire.push_back((hash, deadline));
        true
    }

    /// Drop expired hash entries; called by the maintenance loop
    pub fn prune_expired(&self) {
        let now = Instant::now();
        let mut cache = self.hashes.lock();
        while let Some((hash, deadline)) = cache.expire.front().copied() {
            if deadline >= now {
                break;
            }
            cache.expire.pop_front();
            cache.seen.remove(&hash);
        }
        // Emergency trim when the cache outgrows its bound.
        while cache.seen.len() > self.hash_capacity {
            match cache.expire.pop_front() {
                Some((hash, _)) => {
                    cache.seen.remove(&hash);
                }
                None => break,
            }
        }
    }

    pub fn tracked_sources(&self) -> usize {
        self.sequences.len()
    }
}
