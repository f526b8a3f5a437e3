// aswarm-fastpath: Per-source-IP token buckets

use dashmap::DashMap;
use std::net::IpAddr;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Token-bucket rate limiter keyed by source IP
///
/// Defaults: capacity 100 tokens, fill 50/s. A packet needs one full token.
pub struct RateLimiter {
    buckets: DashMap<IpAddr, Bucket>,
    capacity: f64,
    fill_per_sec: f64,
}

impl RateLimiter {
    pub fn new(capacity: f64, fill_per_sec: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
            fill_per_sec,
        }
    }

    /// Check whether a packet from `ip` is allowed; consumes one token
    pub fn allow(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(ip).or_insert(Bucket {
            tokens: self.capacity,
            last: now,
        });

        let delta = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + delta * self.fill_per_sec).min(self.capacity);
        bucket.last = now;

        if bucket.tokens < 1.0 {
            return false;
        }
        bucket.tokens -= 1.0;
        true
    }

    #[cfg(test)]
    fn set_tokens(&self, ip: IpAddr, tokens: f64) {
        self.buckets.insert(
            ip,
            Bucket {
                tokens,
                last: Instant::now(),
            },
        );
    }
}
