// aswarm-control: In-process control plane
//
// Backs self-contained deployments and every test. A cluster-backed
// implementation lives behind the same trait in the deployment repo.

use crate::error::{ControlError, ControlResult};
use crate::types::{ConfigRecord, LabelSelector, LeasePatch, LeaseRecord, WatchEvent};
use crate::ControlPlane;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// In-memory control plane
///
/// Lease mutations are stamped with a server-observed `renew_time` and fanned
/// out to watchers. Config creation is create-only; a second create returns
/// `Conflict` exactly like the cluster API does.
pub struct MemoryControlPlane {
    leases: RwLock<HashMap<String, LeaseRecord>>,
    configs: RwLock<HashMap<String, ConfigRecord>>,
    events: broadcast::Sender<WatchEvent>,
}

impl MemoryControlPlane {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            leases: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
            events,
        })
    }

    /// Number of leases currently stored
    pub fn lease_count(&self) -> usize {
        self.leases.read().len()
    }

    fn emit(&self, event: WatchEvent) {
        // No receivers is fine; watchers come and go.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn patch_lease(&self, name: &str, patch: LeasePatch) -> ControlResult<DateTime<Utc>> {
        let now = Utc::now();
        let updated = {
            let mut leases = self.leases.write();
            let record = leases
                .get_mut(name)
                .ok_or_else(|| ControlError::NotFound(name.to_string()))?;
            for (k, v) in patch.annotations {
                record.annotations.insert(k, v);
            }
            for (k, v) in patch.labels {
                record.labels.insert(k, v);
            }
            if patch.holder_identity.is_some() {
                record.holder_identity = patch.holder_identity;
            }
            if patch.lease_duration_seconds.is_some() {
                record.lease_duration_seconds = patch.lease_duration_seconds;
            }
            record.renew_time = Some(now);
            record.clone()
        };
        self.emit(WatchEvent::Modified(updated));
        Ok(now)
    }

    async fn create_lease(&self, mut record: LeaseRecord) -> ControlResult<()> {
        let now = Utc::now();
        {
            let mut leases = self.leases.write();
            if leases.contains_key(&record.name) {
                return Err(ControlError::Conflict(record.name));
            }
            record.renew_time = Some(now);
            leases.insert(record.name.clone(), record.clone());
        }
        self.emit(WatchEvent::Added(record));
        Ok(())
    }

    async fn delete_lease(&self, name: &str) -> ControlResult<()> {
        let removed = self.leases.write().remove(name);
        match removed {
            Some(_) => {
                self.emit(WatchEvent::Deleted(name.to_string()));
                Ok(())
            }
            None => Err(ControlError::NotFound(name.to_string())),
        }
    }

    async fn create_config(&self, mut record: ConfigRecord) -> ControlResult<()> {
        let mut configs = self.configs.write();
        if configs.contains_key(&record.name) {
            return Err(ControlError::Conflict(record.name));
        }
        record.created_at = Some(Utc::now());
        debug!(name = %record.name, "config record created");
        configs.insert(record.name.clone(), record);
        Ok(())
    }

    async fn get_config(&self, name: &str) -> ControlResult<ConfigRecord> {
        self.configs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ControlError::NotFound(name.to_string()))
    }

    fn watch_leases(&self, selector: LabelSelector) -> mpsc::Receiver<WatchEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Initial snapshot, then live events - list-watch semantics.
        let snapshot: Vec<LeaseRecord> = self
            .leases
            .read()
            .values()
            .filter(|r| selector.matches(&r.labels))
            .cloned()
            .collect();
        let mut live = self.events.subscribe();

        tokio::spawn(async move {
            for record in snapshot {
                if tx.send(WatchEvent::Added(record)).await.is_err() {
                    return;
                }
            }
            loop {
                match live.recv().await {
                    Ok(event) => {
                        let matches = match &event {
                            WatchEvent::Added(r) | WatchEvent::Modified(r) => {
                                selector.matches(&r.labels)
                            }
                            WatchEvent::Deleted(_) => true,
                        };
                        if matches && tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "watch stream lagged, continuing");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        rx
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_patch_missing_lease_is_not_found() {
        let cp = MemoryControlPlane::new();
        let err = cp
            .patch_lease("aswarm-sentinel-ghost", LeasePatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_then_patch_assigns_server_time() {
        let cp = MemoryControlPlane::new();
        cp.create_lease(LeaseRecord::new("aswarm-sentinel-node-a"))
            .await
            .unwrap();

        let mut patch = LeasePatch::default();
        patch
            .annotations
            .insert("aswarm.ai/score".to_string(), "0.500".to_string());
        let ts = cp
            .patch_lease("aswarm-sentinel-node-a", patch)
            .await
            .unwrap();

        assert!(ts <= Utc::now());
    }

    #[tokio::test]
    async fn test_config_create_is_create_only() {
        let cp = MemoryControlPlane::new();
        cp.create_config(ConfigRecord::new("aswarm-elevated-run1"))
            .await
            .unwrap();
        let err = cp
            .create_config(ConfigRecord::new("aswarm-elevated-run1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_watch_delivers_snapshot_and_live_events() {
        let cp = MemoryControlPlane::new();

        let mut existing = LeaseRecord::new("aswarm-sentinel-node-a");
        existing.labels.insert(
            "app.kubernetes.io/component".to_string(),
            "sentinel".to_string(),
        );
        cp.create_lease(existing).await.unwrap();

        let selector = LabelSelector::new().with("app.kubernetes.io/component", "sentinel");
        let mut rx = cp.watch_leases(selector);

        match rx.recv().await.unwrap() {
            WatchEvent::Added(r) => assert_eq!(r.name, "aswarm-sentinel-node-a"),
            other => panic!("expected snapshot Added, got {:?}", other),
        }

        let mut patch = LeasePatch::default();
        patch
            .annotations
            .insert("aswarm.ai/seq".to_string(), "1".to_string());
        cp.patch_lease("aswarm-sentinel-node-a", patch)
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            WatchEvent::Modified(r) => {
                assert_eq!(r.annotations.get("aswarm.ai/seq").unwrap(), "1")
            }
            other => panic!("expected Modified, got {:?}", other),
        }
    }
}
