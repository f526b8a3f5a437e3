// aswarm-microact: Primitive executors
//
// The trait is the seam between the catalog and the outside world. The
// default executor simulates everything in dry-run; in live mode it applies
// pod network isolation through the orchestrator CLI and reports the
// primitives that need a node agent or IdP integration as explicit failures.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

/// What applying a primitive produced
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub success: bool,
    pub message: String,
    /// Opaque string sufficient to undo the action
    pub revert_handle: Option<String>,
    pub probe_endpoint: Option<String>,
    /// External resource touched, recorded on the proof
    pub resource: Option<String>,
}

impl ApplyOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            revert_handle: None,
            probe_endpoint: None,
            resource: None,
        }
    }
}

/// Applies and reverts containment primitives
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn apply(
        &self,
        action_id: &str,
        params: &BTreeMap<String, Value>,
        ttl_seconds: u64,
    ) -> ApplyOutcome;

    /// Revert a previously applied action. Idempotent: a missing target is
    /// success.
    async fn revert(&self, action_id: &str, handle: &str) -> Result<(), String>;

    /// Query an effectiveness probe endpoint; the JSON comes back
    /// uninterpreted
    async fn probe(&self, endpoint: &str) -> Value;
}

/// The shipped executor
pub struct DefaultExecutor {
    dry_run: bool,
}

impl DefaultExecutor {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    fn str_param(params: &BTreeMap<String, Value>, key: &str) -> String {
        match params.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string().trim_matches('"').to_string(),
            None => String::new(),
        }
    }

    async fn apply_pod_isolate(
        &self,
        params: &BTreeMap<String, Value>,
        ttl_seconds: u64,
    ) -> ApplyOutcome {
        let namespace = Self::str_param(params, "namespace");
        let selector = Self::str_param(params, "selector");
        let policy_name = format!("aswarm-isolate-{}", unix_secs());
        let policy = network_policy_document(&policy_name, &namespace, &selector, ttl_seconds);

        if self.dry_run {
            info!(policy = %policy_name, namespace = %namespace, "[dry-run] would apply NetworkPolicy");
        } else {
            match apply_manifest(&policy).await {
                Ok(()) => {}
                Err(e) => return ApplyOutcome::failure(format!("Failed to apply NetworkPolicy: {}", e)),
            }
        }

        ApplyOutcome {
            success: true,
            message: format!(
                "Applied network isolation to {} in {}",
                selector, namespace
            ),
            revert_handle: Some(format!("{}/{}", namespace, policy_name)),
            probe_endpoint: Some(format!("http://probe.{}.svc:8080/network", namespace)),
            resource: Some(format!("NetworkPolicy/{}/{}", namespace, policy_name)),
        }
    }

    fn apply_stub(
        &self,
        handle: String,
        resource: String,
        probe_endpoint: Option<String>,
        dry_message: String,
        live_error: &str,
    ) -> ApplyOutcome {
        if self.dry_run {
            info!("{}", dry_message);
            ApplyOutcome {
                success: true,
                message: dry_message,
                revert_handle: Some(handle),
                probe_endpoint,
                resource: Some(resource),
            }
        } else {
            ApplyOutcome::failure(live_error.to_string())
        }
    }
}

#[async_trait]
impl ActionExecutor for DefaultExecutor {
    async fn apply(
        &self,
        action_id: &str,
        params: &BTreeMap<String, Value>,
        ttl_seconds: u64,
    ) -> ApplyOutcome {
        match action_id {
            "log_anomaly" => {
                let event = serde_json::json!({
                    "event_type": "aswarm.anomaly_detected",
                    "asset_id": Self::str_param(params, "asset_id"),
                    "anomaly_type": Self::str_param(params, "anomaly_type"),
                    "anomaly_score": params.get("score").cloned().unwrap_or(Value::Null),
                    "severity": params.get("score").and_then(Value::as_f64).map(
                        |s| if s > 0.8 { "high" } else { "medium" }
                    ),
                    "source": "aswarm-microact",
                });
                warn!(anomaly = %event, "ANOMALY");
                ApplyOutcome {
                    success: true,
                    message: format!(
                        "Logged anomaly for {}",
                        Self::str_param(params, "asset_id")
                    ),
                    revert_handle: None,
                    probe_endpoint: None,
                    resource: None,
                }
            }

            "networkpolicy_isolate" => self.apply_pod_isolate(params, ttl_seconds).await,

            "egress_rate_limit" => {
                let host = Self::str_param(params, "host");
                let interface = {
                    let iface = Self::str_param(params, "interface");
                    if iface.is_empty() { "eth0".to_string() } else { iface }
                };
                let rate = Self::str_param(params, "rate_mbps");
                self.apply_stub(
                    format!("{}/{}/{}", host, interface, rate),
                    format!("tc/{}/{}", host, interface),
                    Some(format!("http://{}:9100/metrics", host)),
                    format!("[dry-run] would apply {}Mbps egress limit on {}", rate, host),
                    "Egress rate limiting requires node agent",
                )
            }

            "dns_sinkhole" => {
                let namespace = Self::str_param(params, "namespace");
                let selector = Self::str_param(params, "selector");
                let sinkhole_ip = {
                    let ip = Self::str_param(params, "sinkhole_ip");
                    if ip.is_empty() { "10.0.0.254".to_string() } else { ip }
                };
                self.apply_stub(
                    format!("{}/{}/{}", namespace, selector, sinkhole_ip),
                    format!("coredns/{}", namespace),
                    Some(format!("http://dns-probe.{}.svc:8053/metrics", namespace)),
                    format!(
                        "[dry-run] would sinkhole DNS for {} to {}",
                        selector, sinkhole_ip
                    ),
                    "DNS sinkhole requires CoreDNS integration",
                )
            }

            "process_freeze" => {
                let host = Self::str_param(params, "host");
                let pid = Self::str_param(params, "pid");
                self.apply_stub(
                    format!("{}/{}", host, pid),
                    format!("cgroup/{}/pid/{}", host, pid),
                    Some(format!("http://{}:9100/metrics", host)),
                    format!("[dry-run] would freeze process {} on {}", pid, host),
                    "Process freeze requires node agent",
                )
            }

            "token_revoke" => {
                let provider = Self::str_param(params, "provider");
                let user_id = Self::str_param(params, "user_id");
                let scope = {
                    let s = Self::str_param(params, "scope");
                    if s.is_empty() { "all".to_string() } else { s }
                };
                self.apply_stub(
                    format!("{}/{}/{}", provider, user_id, scope),
                    format!("idp/{}/user/{}", provider, user_id),
                    Some(format!(
                        "https://{}/api/v1/users/{}/status",
                        provider, user_id
                    )),
                    format!(
                        "[dry-run] would revoke {} tokens for {} on {}",
                        scope, user_id, provider
                    ),
                    "Token revocation requires IdP integration",
                )
            }

            "container_pause" => {
                let namespace = Self::str_param(params, "namespace");
                let pod = Self::str_param(params, "pod");
                let container = Self::str_param(params, "container");
                self.apply_stub(
                    format!("{}/{}/{}", namespace, pod, container),
                    format!("container/{}/{}/{}", namespace, pod, container),
                    Some(format!(
                        "http://probe.{}.svc:8080/container/{}",
                        namespace, container
                    )),
                    format!(
                        "[dry-run] would pause container {} in {}/{}",
                        container, namespace, pod
                    ),
                    "Container pause requires node agent",
                )
            }

            other => ApplyOutcome::failure(format!("Action {} not implemented", other)),
        }
    }

    async fn revert(&self, action_id: &str, handle: &str) -> Result<(), String> {
        info!(action_id, handle, "reverting action");

        match action_id {
            "networkpolicy_isolate" => {
                let Some((namespace, policy_name)) = handle.split_once('/') else {
                    return Err(format!("Malformed revert handle: {}", handle));
                };
                if self.dry_run {
                    info!(
                        "[dry-run] would delete NetworkPolicy {}/{}",
                        namespace, policy_name
                    );
                    return Ok(());
                }
                delete_network_policy(namespace, policy_name).await
            }
            "egress_rate_limit" | "dns_sinkhole" | "process_freeze" | "token_revoke"
            | "container_pause" => {
                if self.dry_run {
                    info!(action_id, handle, "[dry-run] would revert");
                } else {
                    // These primitives revert through their external agents;
                    // the in-process executor can only record the intent.
                    warn!(action_id, handle, "revert requires external integration");
                }
                Ok(())
            }
            other => Err(format!("No revert defined for action {}", other)),
        }
    }

    async fn probe(&self, endpoint: &str) -> Value {
        // Simulated result; real probing belongs to the node agent.
        info!(endpoint, "probing effectiveness");
        serde_json::json!({
            "status": "effective",
            "probe_time": chrono::Utc::now().to_rfc3339(),
            "endpoint": endpoint,
        })
    }
}

/// Deny-all NetworkPolicy that still allows DNS egress to kube-system
fn network_policy_document(
    policy_name: &str,
    namespace: &str,
    selector: &str,
    ttl_seconds: u64,
) -> Value {
    let match_labels: BTreeMap<String, String> = selector
        .split(',')
        .filter_map(|part| {
            part.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    serde_json::json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "NetworkPolicy",
        "metadata": {
            "name": policy_name,
            "namespace": namespace,
            "labels": {
                "aswarm.ai/action": "networkpolicy-isolate",
                "aswarm.ai/ttl": ttl_seconds.to_string(),
            },
        },
        "spec": {
            "podSelector": { "matchLabels": match_labels },
            "policyTypes": ["Ingress", "Egress"],
            "ingress": [],
            "egress": [
                {
                    "to": [
                        {
                            "namespaceSelector": {
                                "matchLabels": { "kubernetes.io/metadata.name": "kube-system" }
                            },
                            "podSelector": {
                                "matchLabels": { "k8s-app": "kube-dns" }
                            }
                        }
                    ],
                    "ports": [
                        { "protocol": "UDP", "port": 53 },
                        { "protocol": "TCP", "port": 53 }
                    ]
                }
            ]
        }
    })
}

async fn apply_manifest(manifest: &Value) -> Result<(), String> {
    use tokio::io::AsyncWriteExt;

    let mut child = tokio::process::Command::new("kubectl")
        .args(["apply", "-f", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("spawn kubectl: {}", e))?;

    let body = serde_json::to_vec(manifest).map_err(|e| e.to_string())?;
    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(&body).await.map_err(|e| e.to_string())?;
    }
    drop(child.stdin.take());

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| format!("kubectl: {}", e))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(stderr = %stderr, "kubectl apply failed");
        return Err(stderr.trim().to_string());
    }
    Ok(())
}

async fn delete_network_policy(namespace: &str, policy_name: &str) -> Result<(), String> {
    let output = tokio::process::Command::new("kubectl")
        .args([
            "delete",
            "networkpolicy",
            policy_name,
            "-n",
            namespace,
            "--ignore-not-found=true",
        ])
        .output()
        .await
        .map_err(|e| format!("kubectl: {}", e))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(stderr.trim().to_string());
    }
    Ok(())
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
