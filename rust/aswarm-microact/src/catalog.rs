// aswarm-microact: Containment action catalog
//
// Fixed at process start. Ring 1 observes, Ring 2 applies reversible network
// actions, Ring 3 disrupts. Rings 4 and 5 are reserved. Execution validates
// parameters, computes the proof, applies the primitive through the
// executor, and schedules the TTL auto-revert.

use crate::certificate::{
    ActionCertificate, ActionDescriptor, ActionOutcome, CertificateRecord, CertificateStore,
    DetectionContext, PipelineTimings, PolicyRef,
};
use crate::config::MicroActConfig;
use crate::executor::{ActionExecutor, DefaultExecutor};
use crate::proof::{compute_proof, Proof};
use crate::ttl::TtlTable;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Defense rings by blast radius
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Ring {
    /// Logs, alerts, metrics
    Observe,
    /// Network isolation, rate limits
    Reversible,
    /// Process freeze, token revoke, container pause
    Disruptive,
    /// Reserved: ban lists, config changes
    Persistent,
    /// Reserved: power cycle, console access
    Physical,
}

impl Ring {
    pub fn value(&self) -> u8 {
        match self {
            Ring::Observe => 1,
            Ring::Reversible => 2,
            Ring::Disruptive => 3,
            Ring::Persistent => 4,
            Ring::Physical => 5,
        }
    }

    pub fn from_value(value: u8) -> Option<Ring> {
        match value {
            1 => Some(Ring::Observe),
            2 => Some(Ring::Reversible),
            3 => Some(Ring::Disruptive),
            4 => Some(Ring::Persistent),
            5 => Some(Ring::Physical),
            _ => None,
        }
    }
}

/// Definition of one micro-containment action
#[derive(Debug, Clone)]
pub struct MicroAct {
    pub id: String,
    pub ring: Ring,
    pub name: String,
    pub description: String,
    pub ttl_seconds: u64,
    pub supports_probe: bool,
    pub requires_params: Vec<String>,
    pub optional_params: Vec<String>,
}

/// Result of executing a micro-act
#[derive(Debug, Clone)]
pub struct ActuationResult {
    pub success: bool,
    pub message: String,
    pub revert_handle: Option<String>,
    pub probe_endpoint: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub proof: Option<Proof>,
    /// Written action certificate; absent on failure or when the evidence
    /// write itself failed
    pub certificate: Option<CertificateRecord>,
}

impl ActuationResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            revert_handle: None,
            probe_endpoint: None,
            applied_at: None,
            expires_at: None,
            proof: None,
            certificate: None,
        }
    }
}

/// The catalog with its policy envelope, TTL table, and certificate store
pub struct MicroActCatalog {
    config: MicroActConfig,
    actions: BTreeMap<String, MicroAct>,
    executor: Arc<dyn ActionExecutor>,
    ttl_table: Arc<TtlTable>,
    certificates: CertificateStore,
}

impl MicroActCatalog {
    pub fn new(config: MicroActConfig) -> Self {
        let executor = Arc::new(DefaultExecutor::new(config.dry_run));
        Self::with_executor(config, executor)
    }

    pub fn with_executor(config: MicroActConfig, executor: Arc<dyn ActionExecutor>) -> Self {
        let certificates =
            CertificateStore::new(&config.certificate_dir, config.signing_key.clone());
        let mut catalog = Self {
            config,
            actions: BTreeMap::new(),
            executor,
            ttl_table: Arc::new(TtlTable::new()),
            certificates,
        };
        catalog.register_builtin_actions();
        catalog
    }

    pub fn config(&self) -> &MicroActConfig {
        &self.config
    }

    pub fn executor(&self) -> Arc<dyn ActionExecutor> {
        Arc::clone(&self.executor)
    }

    pub fn ttl_table(&self) -> Arc<TtlTable> {
        Arc::clone(&self.ttl_table)
    }

    fn register(&mut self, action: MicroAct) {
        debug!(id = %action.id, ring = action.ring.value(), "registered micro-act");
        self.actions.insert(action.id.clone(), action);
    }

    fn register_builtin_actions(&mut self) {
        self.register(MicroAct {
            id: "log_anomaly".to_string(),
            ring: Ring::Observe,
            name: "Log Anomaly".to_string(),
            description: "Write structured anomaly event to SIEM".to_string(),
            ttl_seconds: 0,
            supports_probe: false,
            requires_params: str_vec(&["asset_id", "anomaly_type", "score"]),
            optional_params: Vec::new(),
        });

        self.register(MicroAct {
            id: "networkpolicy_isolate".to_string(),
            ring: Ring::Reversible,
            name: "Pod Network Isolation".to_string(),
            description: "Apply deny-all NetworkPolicy with DNS egress".to_string(),
            ttl_seconds: 300,
            supports_probe: true,
            requires_params: str_vec(&["namespace", "selector"]),
            optional_params: str_vec(&["ttl_seconds"]),
        });

        self.register(MicroAct {
            id: "egress_rate_limit".to_string(),
            ring: Ring::Reversible,
            name: "Egress Rate Limit".to_string(),
            description: "Apply per-host egress bandwidth limit".to_string(),
            ttl_seconds: 300,
            supports_probe: true,
            requires_params: str_vec(&["host", "rate_mbps"]),
            optional_params: str_vec(&["interface", "ttl_seconds"]),
        });

        self.register(MicroAct {
            id: "dns_sinkhole".to_string(),
            ring: Ring::Reversible,
            name: "DNS Sinkhole".to_string(),
            description: "Redirect DNS queries to sinkhole for analysis".to_string(),
            ttl_seconds: 600,
            supports_probe: true,
            requires_params: str_vec(&["namespace", "selector"]),
            optional_params: str_vec(&["sinkhole_ip", "ttl_seconds"]),
        });

        self.register(MicroAct {
            id: "process_freeze".to_string(),
            ring: Ring::Disruptive,
            name: "Process Freeze".to_string(),
            description: "Freeze process execution via cgroups freezer".to_string(),
            ttl_seconds: 120,
            supports_probe: true,
            requires_params: str_vec(&["host", "pid"]),
            optional_params: str_vec(&["ttl_seconds"]),
        });

        self.register(MicroAct {
            id: "token_revoke".to_string(),
            ring: Ring::Disruptive,
            name: "IdP Token Revoke".to_string(),
            description: "Revoke tokens for a compromised identity".to_string(),
            ttl_seconds: 3600,
            supports_probe: true,
            requires_params: str_vec(&["provider", "user_id"]),
            optional_params: str_vec(&["scope", "ttl_seconds"]),
        });

        self.register(MicroAct {
            id: "container_pause".to_string(),
            ring: Ring::Disruptive,
            name: "Container Pause".to_string(),
            description: "Pause container execution preserving state".to_string(),
            ttl_seconds: 180,
            supports_probe: true,
            requires_params: str_vec(&["namespace", "pod", "container"]),
            optional_params: str_vec(&["ttl_seconds"]),
        });
    }

    /// List actions, optionally filtered by ring, ordered by (ring, id)
    pub fn list(&self, ring: Option<Ring>) -> Vec<&MicroAct> {
        let mut actions: Vec<&MicroAct> = self
            .actions
            .values()
            .filter(|a| ring.map(|r| a.ring == r).unwrap_or(true))
            .collect();
        actions.sort_by(|a, b| (a.ring, &a.id).cmp(&(b.ring, &b.id)));
        actions
    }

    pub fn get(&self, action_id: &str) -> Option<&MicroAct> {
        self.actions.get(action_id)
    }

    /// Execute a micro-act
    ///
    /// Failures come back as values with a human message and no revert
    /// handle; nothing is thrown.
    pub async fn execute(
        &self,
        action_id: &str,
        params: &BTreeMap<String, Value>,
    ) -> ActuationResult {
        self.execute_with_context(action_id, params, None).await
    }

    /// Execute a micro-act with the detection context that authorized it
    ///
    /// The context threads the elevation event and its timings into the
    /// certificate; without one the detection stages collapse onto the
    /// actuation start.
    pub async fn execute_with_context(
        &self,
        action_id: &str,
        params: &BTreeMap<String, Value>,
        detection: Option<DetectionContext>,
    ) -> ActuationResult {
        let Some(action) = self.actions.get(action_id) else {
            return ActuationResult::failure(format!("Unknown action: {}", action_id));
        };

        if action.ring.value() > self.config.max_ring {
            return ActuationResult::failure(format!(
                "Action {} ring {} exceeds max ring {}",
                action_id,
                action.ring.value(),
                self.config.max_ring
            ));
        }

        let missing: Vec<&str> = action
            .requires_params
            .iter()
            .map(String::as_str)
            .filter(|p| !params.contains_key(*p))
            .collect();
        if !missing.is_empty() {
            return ActuationResult::failure(format!(
                "Missing required parameters: {:?}",
                missing
            ));
        }

        if let Some(err) = validate_param_values(params) {
            return ActuationResult::failure(err);
        }

        let ttl_seconds = params
            .get("ttl_seconds")
            .and_then(Value::as_u64)
            .unwrap_or(action.ttl_seconds);

        let mut proof = compute_proof(action_id, params, self.config.dry_run);

        info!(action_id, dry_run = self.config.dry_run, ttl_seconds, "executing micro-act");
        let actuation_start_wall = Utc::now();
        let actuation_start_mono = Instant::now();
        let outcome = self.executor.apply(action_id, params, ttl_seconds).await;
        let actuation_effective_wall = Utc::now();
        let actuation_effective_mono = Instant::now();

        if !outcome.success {
            return ActuationResult::failure(outcome.message);
        }

        proof.resource = outcome.resource.clone();
        let applied_at = actuation_effective_wall;
        let expires_at = (ttl_seconds > 0)
            .then(|| applied_at + ChronoDuration::seconds(ttl_seconds as i64));

        let mut revert_scheduled_wall = None;
        if let Some(handle) = &outcome.revert_handle {
            if ttl_seconds > 0 {
                self.ttl_table.schedule(
                    handle.clone(),
                    action_id.to_string(),
                    Duration::from_secs(ttl_seconds),
                );
                revert_scheduled_wall = Some(Utc::now());
                info!(action_id, handle = %handle, ttl_seconds, "scheduled auto-revert");
            }
        }

        let timings = PipelineTimings {
            anomaly_start_wall: detection
                .as_ref()
                .map(|d| d.anomaly_start_wall)
                .unwrap_or(actuation_start_wall),
            anomaly_start_mono: detection
                .as_ref()
                .map(|d| d.anomaly_start_mono)
                .unwrap_or(actuation_start_mono),
            detect_elevated_wall: detection
                .as_ref()
                .map(|d| d.detect_elevated_wall)
                .unwrap_or(actuation_start_wall),
            detect_elevated_mono: detection
                .as_ref()
                .map(|d| d.detect_elevated_mono)
                .unwrap_or(actuation_start_mono),
            actuation_start_wall,
            actuation_start_mono,
            actuation_effective_wall,
            actuation_effective_mono,
            revert_scheduled_wall,
        };
        let certificate =
            self.emit_certificate(action, params, ttl_seconds, &proof, detection, &timings);

        ActuationResult {
            success: true,
            message: outcome.message,
            revert_handle: outcome.revert_handle,
            probe_endpoint: outcome.probe_endpoint,
            applied_at: Some(applied_at),
            expires_at,
            proof: Some(proof),
            certificate,
        }
    }

    /// Assemble and persist the action certificate for one completed
    /// actuation. An evidence-write failure logs and leaves the containment
    /// in place.
    fn emit_certificate(
        &self,
        action: &MicroAct,
        params: &BTreeMap<String, Value>,
        ttl_seconds: u64,
        proof: &Proof,
        detection: Option<DetectionContext>,
        timings: &PipelineTimings,
    ) -> Option<CertificateRecord> {
        let (run_id, asset_id, elevation, policy) = match detection {
            Some(ctx) => (
                ctx.run_id,
                ctx.asset_id.unwrap_or_else(|| asset_id_from_params(params)),
                ctx.elevation,
                ctx.policy,
            ),
            None => (None, asset_id_from_params(params), None, None),
        };
        let policy = policy.unwrap_or_else(|| PolicyRef {
            policy_id: action.id.clone(),
            version_hash: proof.params_hash.clone(),
            selector: params
                .get("selector")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        });

        let status = if self.config.dry_run {
            "simulated"
        } else {
            "applied"
        };
        let containment_delay_ms = timings
            .actuation_effective_mono
            .duration_since(timings.actuation_start_mono)
            .as_secs_f64()
            * 1000.0;

        let certificate = ActionCertificate::assemble(
            self.config.site_id.clone(),
            asset_id,
            run_id,
            elevation,
            policy,
            ActionDescriptor {
                ring: action.ring.value(),
                kind: action.id.clone(),
                params: params.clone(),
                ttl_seconds,
            },
            ActionOutcome {
                status: status.to_string(),
                probe_attempts: 0,
                containment_delay_ms,
                notes: None,
            },
            timings,
        );

        match self.certificates.write(&certificate) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    action_id = %action.id,
                    error = %e,
                    "certificate write failed; actuation stands"
                );
                None
            }
        }
    }

    /// Probe action effectiveness; the probe JSON is returned uninterpreted
    pub async fn probe(&self, result: &ActuationResult) -> Value {
        let Some(endpoint) = &result.probe_endpoint else {
            return serde_json::json!({
                "status": "no_probe",
                "message": "No probe endpoint available",
            });
        };

        let now = Utc::now().to_rfc3339();
        if self.config.dry_run {
            return serde_json::json!({
                "status": "dry_run",
                "probe_time": now,
                "endpoint": endpoint,
            });
        }

        self.executor.probe(endpoint).await
    }
}

/// Best-effort asset identity from the action's own natural keys
fn asset_id_from_params(params: &BTreeMap<String, Value>) -> String {
    for key in ["asset_id", "pod", "host", "user_id", "selector", "namespace"] {
        if let Some(Value::String(value)) = params.get(key) {
            if !value.is_empty() {
                return value.clone();
            }
        }
    }
    "unknown".to_string()
}

fn validate_param_values(params: &BTreeMap<String, Value>) -> Option<String> {
    if let Some(rate) = params.get("rate_mbps") {
        match rate.as_f64() {
            Some(mbps) if mbps > 0.0 => {}
            _ => return Some("Invalid rate_mbps: must be positive".to_string()),
        }
    }

    if let Some(selector) = params.get("selector") {
        let ok = selector
            .as_str()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        if !ok {
            return Some("Invalid selector: cannot be empty".to_string());
        }
    }

    if let Some(pid) = params.get("pid") {
        let ok = match pid {
            Value::Number(n) => n.is_i64() || n.is_u64(),
            Value::String(s) => s.parse::<i64>().is_ok(),
            _ => false,
        };
        if !ok {
            return Some("Invalid pid: must be integer".to_string());
        }
    }

    None
}

fn str_vec(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::certificate::verify_bytes;
    use serde_json::json;

    fn catalog_with(config: MicroActConfig) -> (MicroActCatalog, tempfile::TempDir) {
        let certs = tempfile::tempdir().unwrap();
        let config = MicroActConfig {
            certificate_dir: certs.path().to_path_buf(),
            ..config
        };
        (MicroActCatalog::new(config), certs)
    }

    fn catalog() -> (MicroActCatalog, tempfile::TempDir) {
        catalog_with(MicroActConfig::default())
    }

    fn isolate_params() -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("namespace".to_string(), json!("prod")),
            ("selector".to_string(), json!("app=payments")),
        ])
    }

    #[test]
    fn test_catalog_has_seven_actions() {
        let (c, _certs) = catalog();
        assert_eq!(c.list(None).len(), 7);
        assert_eq!(c.list(Some(Ring::Observe)).len(), 1);
        assert_eq!(c.list(Some(Ring::Reversible)).len(), 3);
        assert_eq!(c.list(Some(Ring::Disruptive)).len(), 3);
    }

    #[test]
    fn test_list_sorted_by_ring_then_id() {
        let (c, _certs) = catalog();
        let ids: Vec<&str> = c.list(None).iter().map(|a| a.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "log_anomaly",
                "dns_sinkhole",
                "egress_rate_limit",
                "networkpolicy_isolate",
                "container_pause",
                "process_freeze",
                "token_revoke",
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let (c, _certs) = catalog();
        let result = c.execute("warp_core_eject", &BTreeMap::new()).await;
        assert!(!result.success);
        assert!(result.message.contains("Unknown action"));
        assert!(result.certificate.is_none());
    }

    #[tokio::test]
    async fn test_ring_above_max_fails_fast() {
        let (c, _certs) = catalog_with(MicroActConfig {
            max_ring: 2,
            ..MicroActConfig::default()
        });
        let params = BTreeMap::from([
            ("host".to_string(), json!("node-a")),
            ("pid".to_string(), json!(4242)),
        ]);
        let result = c.execute("process_freeze", &params).await;
        assert!(!result.success);
        assert!(result.message.contains("exceeds max ring"));
        assert!(result.revert_handle.is_none());
        assert!(result.certificate.is_none());
    }

    #[tokio::test]
    async fn test_missing_required_params() {
        let (c, _certs) = catalog();
        let params = BTreeMap::from([("namespace".to_string(), json!("prod"))]);
        let result = c.execute("networkpolicy_isolate", &params).await;
        assert!(!result.success);
        assert!(result.message.contains("Missing required parameters"));
        assert!(result.message.contains("selector"));
    }

    #[tokio::test]
    async fn test_nonpositive_rate_rejected() {
        let (c, _certs) = catalog();
        let params = BTreeMap::from([
            ("host".to_string(), json!("node-a")),
            ("rate_mbps".to_string(), json!(0)),
        ]);
        let result = c.execute("egress_rate_limit", &params).await;
        assert!(!result.success);
        assert!(result.message.contains("rate_mbps"));
    }

    #[tokio::test]
    async fn test_blank_selector_rejected() {
        let (c, _certs) = catalog();
        let params = BTreeMap::from([
            ("namespace".to_string(), json!("prod")),
            ("selector".to_string(), json!("   ")),
        ]);
        let result = c.execute("networkpolicy_isolate", &params).await;
        assert!(!result.success);
        assert!(result.message.contains("selector"));
    }

    #[tokio::test]
    async fn test_non_integer_pid_rejected() {
        let (c, _certs) = catalog();
        let params = BTreeMap::from([
            ("host".to_string(), json!("node-a")),
            ("pid".to_string(), json!("not-a-pid")),
        ]);
        let result = c.execute("process_freeze", &params).await;
        assert!(!result.success);
        assert!(result.message.contains("pid"));
    }

    #[tokio::test]
    async fn test_dry_run_isolation_succeeds_with_proof_and_handle() {
        let (c, _certs) = catalog();
        let result = c.execute("networkpolicy_isolate", &isolate_params()).await;
        assert!(result.success, "{}", result.message);

        let proof = result.proof.unwrap();
        assert!(proof.dry_run);
        assert_eq!(proof.action_id, "networkpolicy_isolate");
        assert_eq!(proof.params_hash.len(), 16);
        assert!(proof.resource.unwrap().starts_with("NetworkPolicy/prod/"));

        let handle = result.revert_handle.unwrap();
        assert!(handle.starts_with("prod/"));
        assert!(result.applied_at.is_some());
        assert!(result.expires_at.is_some());

        let certificate = result.certificate.unwrap();
        assert!(certificate.json_path.exists());
    }

    #[tokio::test]
    async fn test_ttl_override_from_params() {
        let (c, _certs) = catalog();
        let mut params = isolate_params();
        params.insert("ttl_seconds".to_string(), json!(5));
        let result = c.execute("networkpolicy_isolate", &params).await;
        assert!(result.success);
        let delta = result.expires_at.unwrap() - result.applied_at.unwrap();
        assert_eq!(delta.num_seconds(), 5);
        assert!(c.ttl_table().contains(result.revert_handle.as_deref().unwrap()));
    }

    #[tokio::test]
    async fn test_log_anomaly_has_no_revert_handle() {
        let (c, _certs) = catalog();
        let params = BTreeMap::from([
            ("asset_id".to_string(), json!("pod-1")),
            ("anomaly_type".to_string(), json!("port_scan")),
            ("score".to_string(), json!(0.93)),
        ]);
        let result = c.execute("log_anomaly", &params).await;
        assert!(result.success);
        assert!(result.revert_handle.is_none());
        assert!(result.expires_at.is_none());
        assert_eq!(c.ttl_table().len(), 0);
        // Every completed actuation still leaves a certificate.
        assert!(result.certificate.is_some());
    }

    #[tokio::test]
    async fn test_execute_emits_signed_certificate() {
        let key = b"cert-key-k".to_vec();
        let (c, _certs) = catalog_with(MicroActConfig {
            signing_key: Some(key.clone()),
            ..MicroActConfig::default()
        });

        let result = c.execute("networkpolicy_isolate", &isolate_params()).await;
        assert!(result.success, "{}", result.message);

        let record = result.certificate.unwrap();
        let bytes = std::fs::read(&record.json_path).unwrap();
        let certificate: ActionCertificate = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(certificate.certificate_id, record.certificate_id);
        assert_eq!(certificate.action.kind, "networkpolicy_isolate");
        assert_eq!(certificate.action.ring, 2);
        assert_eq!(certificate.outcome.status, "simulated");
        assert_eq!(certificate.asset_id, "app=payments");
        assert_eq!(certificate.policy.policy_id, "networkpolicy_isolate");

        // The recorded signature is the HMAC over the exact document bytes.
        let signature = record.signature.unwrap();
        assert!(verify_bytes(&key, &bytes, &signature));
        assert!(!verify_bytes(b"other-key", &bytes, &signature));
        let stored = std::fs::read_to_string(record.signature_path.unwrap()).unwrap();
        assert_eq!(stored, signature);
    }

    #[tokio::test]
    async fn test_unsigned_certificate_without_key() {
        let (c, _certs) = catalog();
        let result = c.execute("networkpolicy_isolate", &isolate_params()).await;
        let record = result.certificate.unwrap();
        assert!(record.signature.is_none());
        assert!(record.json_path.exists());
    }

    #[tokio::test]
    async fn test_detection_context_flows_into_certificate() {
        let (c, _certs) = catalog();
        let wall = Utc::now();
        let mono = Instant::now();
        let detection = DetectionContext {
            run_id: Some("run-ctx".to_string()),
            asset_id: Some("pod/anomaly-1".to_string()),
            elevation: Some(json!({ "reason": "fast_path", "witness_count": 3 })),
            policy: None,
            anomaly_start_wall: wall - ChronoDuration::milliseconds(180),
            anomaly_start_mono: mono - Duration::from_millis(180),
            detect_elevated_wall: wall - ChronoDuration::milliseconds(100),
            detect_elevated_mono: mono - Duration::from_millis(100),
        };

        let result = c
            .execute_with_context("networkpolicy_isolate", &isolate_params(), Some(detection))
            .await;
        assert!(result.success);

        let record = result.certificate.unwrap();
        let bytes = std::fs::read(&record.json_path).unwrap();
        let certificate: ActionCertificate = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(certificate.run_id.as_deref(), Some("run-ctx"));
        assert_eq!(certificate.asset_id, "pod/anomaly-1");
        assert_eq!(certificate.elevation_context.unwrap()["reason"], "fast_path");
        assert!((certificate.metrics.mttd_ms_monotonic - 80.0).abs() < 20.0);
    }

    #[tokio::test]
    async fn test_probe_no_endpoint() {
        let (c, _certs) = catalog();
        let result = ActuationResult::failure("x");
        let probe = c.probe(&result).await;
        assert_eq!(probe["status"], "no_probe");
    }

    #[tokio::test]
    async fn test_probe_dry_run() {
        let (c, _certs) = catalog();
        let result = c.execute("networkpolicy_isolate", &isolate_params()).await;
        let probe = c.probe(&result).await;
        assert_eq!(probe["status"], "dry_run");
    }
}
