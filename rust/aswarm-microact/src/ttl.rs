// aswarm-microact: TTL auto-revert
//
// Revert handles live in an in-memory table keyed by handle, ordered by a
// deadline heap. One 1 Hz monitor task pops expired entries and runs their
// reverts. A handle is removed before its revert runs, so a failed revert is
// logged once and never retried: SCHEDULED -> REVERTING -> DONE | FAILED.

use crate::executor::ActionExecutor;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Monitor wake cadence
const MONITOR_TICK: Duration = Duration::from_secs(1);

/// A scheduled revert
#[derive(Debug, Clone)]
pub struct RevertInfo {
    pub action_id: String,
    pub applied_at: DateTime<Utc>,
    pub deadline: Instant,
}

#[derive(PartialEq, Eq)]
struct Scheduled {
    deadline: Instant,
    handle: String,
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.handle.cmp(&other.handle))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct TtlInner {
    heap: BinaryHeap<Reverse<Scheduled>>,
    active: HashMap<String, RevertInfo>,
}

/// Deadline-ordered table of pending reverts
pub struct TtlTable {
    inner: Mutex<TtlInner>,
}

impl TtlTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TtlInner {
                heap: BinaryHeap::new(),
                active: HashMap::new(),
            }),
        }
    }

    /// Schedule a revert; rescheduling a handle replaces its deadline
    pub fn schedule(&self, handle: String, action_id: String, ttl: Duration) {
        let deadline = Instant::now() + ttl;
        let mut inner = self.inner.lock();
        inner.active.insert(
            handle.clone(),
            RevertInfo {
                action_id,
                applied_at: Utc::now(),
                deadline,
            },
        );
        inner.heap.push(Reverse(Scheduled { deadline, handle }));
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.inner.lock().active.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every entry whose deadline has passed
    ///
    /// Heap entries whose handle was rescheduled are stale and skipped
    /// (lazy deletion).
    pub fn pop_expired(&self, now: Instant) -> Vec<(String, RevertInfo)> {
        let mut inner = self.inner.lock();
        let mut expired = Vec::new();

        while let Some(Reverse(next)) = inner.heap.peek() {
            if next.deadline > now {
                break;
            }
            let Some(Reverse(entry)) = inner.heap.pop() else {
                break;
            };
            let still_current = inner
                .active
                .get(&entry.handle)
                .map(|info| info.deadline == entry.deadline)
                .unwrap_or(false);
            if still_current {
                if let Some(info) = inner.active.remove(&entry.handle) {
                    expired.push((entry.handle, info));
                }
            }
        }

        expired
    }
}

impl Default for TtlTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the 1 Hz revert monitor until shutdown
///
/// Shutdown does not cancel in-flight reverts; each drained batch is
/// fire-and-complete.
pub fn spawn_ttl_monitor(
    table: Arc<TtlTable>,
    executor: Arc<dyn ActionExecutor>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(MONITOR_TICK) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("ttl monitor stopping");
                        return;
                    }
                    continue;
                }
            }

            for (handle, info) in table.pop_expired(Instant::now()) {
                info!(
                    action_id = %info.action_id,
                    handle = %handle,
                    "TTL expired, reverting"
                );
                if let Err(e) = executor.revert(&info.action_id, &handle).await {
                    error!(
                        action_id = %info.action_id,
                        handle = %handle,
                        error = %e,
                        "revert failed; not retried"
                    );
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_and_contains() {
        let table = TtlTable::new();
        table.schedule("ns/p1".to_string(), "networkpolicy_isolate".to_string(), Duration::from_secs(5));
        assert!(table.contains("ns/p1"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_pop_expired_only_past_deadlines() {
        let table = TtlTable::new();
        table.schedule("a".to_string(), "x".to_string(), Duration::from_millis(0));
        table.schedule("b".to_string(), "x".to_string(), Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(5));
        let expired = table.pop_expired(Instant::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "a");
        assert!(!table.contains("a"));
        assert!(table.contains("b"));
    }

    #[test]
    fn test_pop_expired_is_drain_once() {
        let table = TtlTable::new();
        table.schedule("a".to_string(), "x".to_string(), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(table.pop_expired(Instant::now()).len(), 1);
        assert!(table.pop_expired(Instant::now()).is_empty());
    }

    #[test]
    fn test_reschedule_replaces_deadline() {
        let table = TtlTable::new();
        table.schedule("a".to_string(), "x".to_string(), Duration::from_millis(0));
        table.schedule("a".to_string(), "x".to_string(), Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(5));
        // The stale heap entry is skipped; the handle stays scheduled.
        assert!(table.pop_expired(Instant::now()).is_empty());
        assert!(table.contains("a"));
    }

    #[test]
    fn test_expiry_order_is_deadline_order() {
        let table = TtlTable::new();
        table.schedule("later".to_string(), "x".to_string(), Duration::from_millis(20));
        table.schedule("sooner".to_string(), "x".to_string(), Duration::from_millis(1));

        std::thread::sleep(Duration::from_millis(30));
        let expired = table.pop_expired(Instant::now());
        let handles: Vec<&str> = expired.iter().map(|(h, _)| h.as_str()).collect();
        assert_eq!(handles, vec!["sooner", "later"]);
    }
}
