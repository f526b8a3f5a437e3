// aswarm-microact: Actuation proof
//
// Computed before execution: a truncated SHA-256 over the canonicalized
// (sorted-key) parameter map, bound to the action id.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Controller name stamped on every proof
pub const CONTROLLER: &str = "microact-v2";
/// Hex characters kept from the parameter hash
const HASH_PREFIX_LEN: usize = 16;

/// Proof object attached to actuation results and certificates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
    pub action_id: String,
    pub params_hash: String,
    pub controller: String,
    pub dry_run: bool,
    pub timestamp: String,
    /// External resource touched, filled in after application
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

/// Truncated SHA-256 over `action_id:canonical_params`
///
/// The parameter map is a BTreeMap, so serialization is key-sorted at every
/// nesting level and the hash is stable under key reordering.
pub fn params_hash(action_id: &str, params: &BTreeMap<String, Value>) -> String {
    let canonical = serde_json::to_string(params).unwrap_or_default();
    let digest = Sha256::digest(format!("{}:{}", action_id, canonical).as_bytes());
    hex::encode(digest)[..HASH_PREFIX_LEN].to_string()
}

/// Build the proof for an actuation request
pub fn compute_proof(action_id: &str, params: &BTreeMap<String, Value>, dry_run: bool) -> Proof {
    Proof {
        action_id: action_id.to_string(),
        params_hash: params_hash(action_id, params),
        controller: CONTROLLER.to_string(),
        dry_run,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        resource: None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_truncated_hex() {
        let params = BTreeMap::from([("a".to_string(), json!(1))]);
        let hash = params_hash("log_anomaly", &params);
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_binds_action_id() {
        let params = BTreeMap::from([("a".to_string(), json!(1))]);
        assert_ne!(
            params_hash("log_anomaly", &params),
            params_hash("container_pause", &params)
        );
    }

    #[test]
    fn test_hash_stable_under_key_reordering() {
        let mut forward = BTreeMap::new();
        forward.insert("namespace".to_string(), json!("prod"));
        forward.insert("selector".to_string(), json!("app=payments"));
        forward.insert("ttl_seconds".to_string(), json!(300));

        let mut reversed = BTreeMap::new();
        reversed.insert("ttl_seconds".to_string(), json!(300));
        reversed.insert("selector".to_string(), json!("app=payments"));
        reversed.insert("namespace".to_string(), json!("prod"));

        assert_eq!(
            params_hash("networkpolicy_isolate", &forward),
            params_hash("networkpolicy_isolate", &reversed)
        );
    }

    proptest! {
        // Permuting insertion order never changes the hash.
        #[test]
        fn prop_hash_invariant_under_permutation(
            pairs in proptest::collection::vec(("[a-z]{1,8}", 0i64..1000), 1..8)
        ) {
            let forward: BTreeMap<String, Value> =
                pairs.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let backward: BTreeMap<String, Value> =
                pairs.iter().rev().map(|(k, v)| (k.clone(), json!(v))).collect();
            prop_assert_eq!(
                params_hash("egress_rate_limit", &forward),
                params_hash("egress_rate_limit", &backward)
            );
        }
    }

    #[test]
    fn test_proof_shape() {
        let params = BTreeMap::from([("asset_id".to_string(), json!("pod-1"))]);
        let proof = compute_proof("log_anomaly", &params, true);
        assert_eq!(proof.controller, "microact-v2");
        assert!(proof.dry_run);
        assert_eq!(proof.params_hash.len(), 16);
        assert!(proof.resource.is_none());
    }
}
