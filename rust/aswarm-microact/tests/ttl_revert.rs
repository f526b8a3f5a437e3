// aswarm-microact: TTL auto-revert end to end

use aswarm_microact::{
    spawn_ttl_monitor, ActionExecutor, ApplyOutcome, MicroActCatalog, MicroActConfig,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Records applies and reverts; delegates shapes to the dry-run defaults
struct RecordingExecutor {
    inner: aswarm_microact::DefaultExecutor,
    reverted: Mutex<Vec<(String, String)>>,
    fail_reverts: bool,
}

impl RecordingExecutor {
    fn new(fail_reverts: bool) -> Self {
        Self {
            inner: aswarm_microact::DefaultExecutor::new(true),
            reverted: Mutex::new(Vec::new()),
            fail_reverts,
        }
    }

    fn reverted(&self) -> Vec<(String, String)> {
        self.reverted.lock().clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn apply(
        &self,
        action_id: &str,
        params: &BTreeMap<String, Value>,
        ttl_seconds: u64,
    ) -> ApplyOutcome {
        self.inner.apply(action_id, params, ttl_seconds).await
    }

    async fn revert(&self, action_id: &str, handle: &str) -> Result<(), String> {
        self.reverted
            .lock()
            .push((action_id.to_string(), handle.to_string()));
        if self.fail_reverts {
            Err("synthetic revert failure".to_string())
        } else {
            Ok(())
        }
    }

    async fn probe(&self, endpoint: &str) -> Value {
        self.inner.probe(endpoint).await
    }
}

fn isolate_params(ttl: u64) -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("namespace".to_string(), json!("prod")),
        ("selector".to_string(), json!("app=anomaly")),
        ("ttl_seconds".to_string(), json!(ttl)),
    ])
}

fn test_config(certs: &tempfile::TempDir) -> MicroActConfig {
    MicroActConfig {
        certificate_dir: certs.path().to_path_buf(),
        ..MicroActConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ttl_auto_revert_fires_and_clears_handle() {
    let certs = tempfile::tempdir().unwrap();
    let executor = Arc::new(RecordingExecutor::new(false));
    let catalog = MicroActCatalog::with_executor(test_config(&certs), Arc::clone(&executor) as Arc<dyn ActionExecutor>);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let monitor = spawn_ttl_monitor(catalog.ttl_table(), catalog.executor(), shutdown_rx);

    let applied = Instant::now();
    let result = catalog
        .execute("networkpolicy_isolate", &isolate_params(1))
        .await;
    assert!(result.success, "{}", result.message);
    let handle = result.revert_handle.clone().unwrap();

    // Handle present in the table immediately after application.
    assert!(catalog.ttl_table().contains(&handle));

    // The revert runs within ttl + one monitor tick.
    let deadline = Instant::now() + Duration::from_secs(3);
    while executor.reverted().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let reverted = executor.reverted();
    assert_eq!(reverted.len(), 1);
    assert_eq!(reverted[0].0, "networkpolicy_isolate");
    assert_eq!(reverted[0].1, handle);
    assert!(!catalog.ttl_table().contains(&handle));

    let elapsed = applied.elapsed();
    assert!(elapsed >= Duration::from_secs(1), "reverted early: {:?}", elapsed);
    assert!(elapsed <= Duration::from_secs(3), "reverted late: {:?}", elapsed);

    // Certificate-facing timestamps bracket the TTL.
    let delta = result.expires_at.unwrap() - result.applied_at.unwrap();
    assert_eq!(delta.num_seconds(), 1);

    shutdown_tx.send(true).unwrap();
    monitor.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_revert_not_retried() {
    let certs = tempfile::tempdir().unwrap();
    let executor = Arc::new(RecordingExecutor::new(true));
    let catalog = MicroActCatalog::with_executor(test_config(&certs), Arc::clone(&executor) as Arc<dyn ActionExecutor>);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let monitor = spawn_ttl_monitor(catalog.ttl_table(), catalog.executor(), shutdown_rx);

    let result = catalog
        .execute("networkpolicy_isolate", &isolate_params(1))
        .await;
    let handle = result.revert_handle.clone().unwrap();

    // Let the monitor fire the failing revert, then keep watching: the
    // handle is gone, so no second attempt happens.
    let deadline = Instant::now() + Duration::from_secs(3);
    while executor.reverted().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(executor.reverted().len(), 1);
    assert!(!catalog.ttl_table().contains(&handle));

    shutdown_tx.send(true).unwrap();
    monitor.await.unwrap();
}
