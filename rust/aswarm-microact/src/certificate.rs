// aswarm-microact: Action certificates
//
// The tamper-evident record of one detection -> actuation cycle. Serialized
// as JSON with an HMAC-SHA-256 signature over the exact document bytes. The
// monotonic MTTD/MTTR values are authoritative; the wall-clock twins and the
// skew between them exist for audit.

use crate::error::{MicroActError, MicroActResult};
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Pipeline timestamps carried on a certificate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertTimestamps {
    pub anomaly_start: String,
    pub detect_elevated: String,
    pub actuation_start: String,
    pub actuation_effective: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revert_scheduled: Option<String>,
}

/// Reference to the policy that authorized the action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRef {
    pub policy_id: String,
    pub version_hash: String,
    pub selector: String,
}

/// What was done
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub ring: u8,
    pub kind: String,
    pub params: BTreeMap<String, Value>,
    pub ttl_seconds: u64,
}

/// How it went
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub status: String,
    pub probe_attempts: u32,
    pub containment_delay_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Detection and response metrics from both clocks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertMetrics {
    /// Authoritative detection latency
    pub mttd_ms_monotonic: f64,
    /// Authoritative response time
    pub mttr_s_monotonic: f64,
    /// Audit-only wall-clock twin
    pub mttd_ms_wall: f64,
    /// Audit-only wall-clock twin
    pub mttr_s_wall: f64,
    pub clock_skew_ms: f64,
}

/// Signed record of one detection -> actuation cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCertificate {
    pub certificate_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub site_id: String,
    pub asset_id: String,
    pub timestamps: CertTimestamps,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation_context: Option<Value>,
    pub policy: PolicyRef,
    pub action: ActionDescriptor,
    pub outcome: ActionOutcome,
    pub metrics: CertMetrics,
}

/// Monotonic and wall observations of each pipeline stage
#[derive(Debug, Clone)]
pub struct PipelineTimings {
    pub anomaly_start_wall: DateTime<Utc>,
    pub anomaly_start_mono: Instant,
    pub detect_elevated_wall: DateTime<Utc>,
    pub detect_elevated_mono: Instant,
    pub actuation_start_wall: DateTime<Utc>,
    pub actuation_start_mono: Instant,
    pub actuation_effective_wall: DateTime<Utc>,
    pub actuation_effective_mono: Instant,
    pub revert_scheduled_wall: Option<DateTime<Utc>>,
}

impl PipelineTimings {
    pub fn metrics(&self) -> CertMetrics {
        let mttd_ms_monotonic = self
            .detect_elevated_mono
            .duration_since(self.anomaly_start_mono)
            .as_secs_f64()
            * 1000.0;
        let mttr_s_monotonic = self
            .actuation_effective_mono
            .duration_since(self.detect_elevated_mono)
            .as_secs_f64();

        let mttd_ms_wall = (self.detect_elevated_wall - self.anomaly_start_wall)
            .num_microseconds()
            .unwrap_or(0) as f64
            / 1000.0;
        let mttr_s_wall = (self.actuation_effective_wall - self.detect_elevated_wall)
            .num_microseconds()
            .unwrap_or(0) as f64
            / 1_000_000.0;

        CertMetrics {
            mttd_ms_monotonic,
            mttr_s_monotonic,
            mttd_ms_wall,
            mttr_s_wall,
            clock_skew_ms: mttd_ms_wall - mttd_ms_monotonic,
        }
    }

    fn timestamps(&self) -> CertTimestamps {
        let iso = |dt: &DateTime<Utc>| dt.to_rfc3339_opts(SecondsFormat::Micros, true);
        CertTimestamps {
            anomaly_start: iso(&self.anomaly_start_wall),
            detect_elevated: iso(&self.detect_elevated_wall),
            actuation_start: iso(&self.actuation_start_wall),
            actuation_effective: iso(&self.actuation_effective_wall),
            revert_scheduled: self.revert_scheduled_wall.as_ref().map(iso),
        }
    }
}

impl ActionCertificate {
    /// Assemble a certificate for one completed actuation
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        site_id: impl Into<String>,
        asset_id: impl Into<String>,
        run_id: Option<String>,
        elevation_context: Option<Value>,
        policy: PolicyRef,
        action: ActionDescriptor,
        outcome: ActionOutcome,
        timings: &PipelineTimings,
    ) -> Self {
        Self {
            certificate_id: Uuid::new_v4().to_string(),
            run_id,
            site_id: site_id.into(),
            asset_id: asset_id.into(),
            timestamps: timings.timestamps(),
            elevation_context,
            policy,
            action,
            outcome,
            metrics: timings.metrics(),
        }
    }
}

/// Detection-side context threaded into certificate assembly
///
/// Carries the elevation that authorized the actuation and its timings.
/// Standalone executions have none; their detection stages collapse onto the
/// actuation start.
#[derive(Debug, Clone)]
pub struct DetectionContext {
    pub run_id: Option<String>,
    pub asset_id: Option<String>,
    /// Copy of the elevation event, recorded verbatim
    pub elevation: Option<Value>,
    pub policy: Option<PolicyRef>,
    pub anomaly_start_wall: DateTime<Utc>,
    pub anomaly_start_mono: Instant,
    pub detect_elevated_wall: DateTime<Utc>,
    pub detect_elevated_mono: Instant,
}

/// A written certificate with its optional signature
#[derive(Debug, Clone)]
pub struct CertificateRecord {
    pub certificate_id: String,
    pub json_path: PathBuf,
    pub signature_path: Option<PathBuf>,
    /// Hex HMAC-SHA-256 over the exact document bytes
    pub signature: Option<String>,
}

/// Writes certificates and their signatures to the evidence directory
pub struct CertificateStore {
    dir: PathBuf,
    signing_key: Option<Vec<u8>>,
}

impl CertificateStore {
    pub fn new(dir: impl Into<PathBuf>, signing_key: Option<Vec<u8>>) -> Self {
        Self {
            dir: dir.into(),
            signing_key,
        }
    }

    /// Serialize, sign, and persist one certificate
    pub fn write(&self, certificate: &ActionCertificate) -> MicroActResult<CertificateRecord> {
        std::fs::create_dir_all(&self.dir)?;

        let bytes = serde_json::to_vec_pretty(certificate)
            .map_err(|e| MicroActError::CertificateError(e.to_string()))?;
        let json_path = self.dir.join(format!("{}.json", certificate.certificate_id));
        std::fs::write(&json_path, &bytes)?;

        let (signature, signature_path) = match &self.signing_key {
            Some(key) => {
                let signature = sign_bytes(key, &bytes);
                let signature_path = self
                    .dir
                    .join(format!("{}.sig", certificate.certificate_id));
                std::fs::write(&signature_path, &signature)?;
                (Some(signature), Some(signature_path))
            }
            None => {
                warn!(
                    certificate_id = %certificate.certificate_id,
                    "no signing key configured, certificate emitted unsigned"
                );
                (None, None)
            }
        };

        info!(
            certificate_id = %certificate.certificate_id,
            path = %json_path.display(),
            signed = signature.is_some(),
            "action certificate written"
        );

        Ok(CertificateRecord {
            certificate_id: certificate.certificate_id.clone(),
            json_path,
            signature_path,
            signature,
        })
    }

    /// Verify a stored certificate against its signature file
    pub fn verify(&self, json_path: &Path, signature_hex: &str) -> MicroActResult<bool> {
        let key = self.signing_key.as_ref().ok_or_else(|| {
            MicroActError::ConfigError("No signing key configured".to_string())
        })?;
        let bytes = std::fs::read(json_path)?;
        Ok(verify_bytes(key, &bytes, signature_hex))
    }
}

/// Hex HMAC-SHA-256 over exact document bytes
pub fn sign_bytes(key: &[u8], bytes: &[u8]) -> String {
    let mut mac = new_mac(key);
    mac.update(bytes);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time signature comparison
pub fn verify_bytes(key: &[u8], bytes: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac = new_mac(key);
    mac.update(bytes);
    let computed = mac.finalize().into_bytes();
    computed.as_slice().ct_eq(expected.as_slice()).into()
}

// HMAC-SHA-256 accepts keys of any length, so this cannot fail.
#[allow(clippy::expect_used)]
fn new_mac(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC accepts any key length")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn timings() -> PipelineTimings {
        let wall = Utc::now();
        let mono = Instant::now();
        PipelineTimings {
            anomaly_start_wall: wall,
            anomaly_start_mono: mono,
            detect_elevated_wall: wall + chrono::Duration::milliseconds(150),
            detect_elevated_mono: mono + Duration::from_millis(150),
            actuation_start_wall: wall + chrono::Duration::milliseconds(200),
            actuation_start_mono: mono + Duration::from_millis(200),
            actuation_effective_wall: wall + chrono::Duration::milliseconds(2200),
            actuation_effective_mono: mono + Duration::from_millis(2200),
            revert_scheduled_wall: Some(wall + chrono::Duration::milliseconds(2300)),
        }
    }

    fn certificate() -> ActionCertificate {
        ActionCertificate::assemble(
            "aswarm",
            "pod/anomaly-1",
            Some("run-c".to_string()),
            Some(json!({ "reason": "fast_path", "witness_count": 3 })),
            PolicyRef {
                policy_id: "aswarm-quarantine".to_string(),
                version_hash: "deadbeef".to_string(),
                selector: "app=anomaly".to_string(),
            },
            ActionDescriptor {
                ring: 2,
                kind: "networkpolicy_isolate".to_string(),
                params: BTreeMap::from([("namespace".to_string(), json!("prod"))]),
                ttl_seconds: 300,
            },
            ActionOutcome {
                status: "contained".to_string(),
                probe_attempts: 3,
                containment_delay_ms: 2000.0,
                notes: None,
            },
            &timings(),
        )
    }

    #[test]
    fn test_metrics_monotonic_authoritative() {
        let metrics = timings().metrics();
        assert!((metrics.mttd_ms_monotonic - 150.0).abs() < 1.0);
        assert!((metrics.mttr_s_monotonic - 2.05).abs() < 0.01);
        // Synthetic timings share a base, so the skew is near zero.
        assert!(metrics.clock_skew_ms.abs() < 1.0);
    }

    #[test]
    fn test_certificate_roundtrips_as_json() {
        let cert = certificate();
        let bytes = serde_json::to_vec_pretty(&cert).unwrap();
        let parsed: ActionCertificate = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.certificate_id, cert.certificate_id);
        assert_eq!(parsed.action.kind, "networkpolicy_isolate");
        assert_eq!(parsed.outcome.status, "contained");
    }

    #[test]
    fn test_signature_matches_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path(), Some(b"cert-key".to_vec()));

        let record = store.write(&certificate()).unwrap();
        let signature = record.signature.unwrap();

        let bytes = std::fs::read(&record.json_path).unwrap();
        assert!(verify_bytes(b"cert-key", &bytes, &signature));
        assert!(!verify_bytes(b"wrong-key", &bytes, &signature));
        assert!(store.verify(&record.json_path, &signature).unwrap());

        let stored_sig = std::fs::read_to_string(record.signature_path.unwrap()).unwrap();
        assert_eq!(stored_sig, signature);
    }

    #[test]
    fn test_tampered_document_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path(), Some(b"cert-key".to_vec()));
        let record = store.write(&certificate()).unwrap();
        let signature = record.signature.unwrap();

        let mut bytes = std::fs::read(&record.json_path).unwrap();
        let len = bytes.len();
        bytes[len / 2] ^= 0x01;
        assert!(!verify_bytes(b"cert-key", &bytes, &signature));
    }

    #[test]
    fn test_unsigned_when_no_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::new(dir.path(), None);
        let record = store.write(&certificate()).unwrap();
        assert!(record.signature.is_none());
        assert!(record.json_path.exists());
    }
}
