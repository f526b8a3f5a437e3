// aswarm-fastpath: HMAC key table
//
// Multiple active keys addressed by a one-byte id, reloadable without
// restart. Key values accept raw bytes, hex:-prefixed, or base64:-prefixed
// encodings.

use crate::error::{FastPathError, FastPathResult};
use base64::Engine;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::info;

/// Environment variable holding a single key value
pub const ENV_KEY: &str = "ASWARM_FASTPATH_KEY";
/// Environment variable holding the id for the single key (default 1)
pub const ENV_KEY_ID: &str = "ASWARM_FASTPATH_KEY_ID";
/// Environment variable holding a JSON object mapping id to key value
pub const ENV_KEYS: &str = "ASWARM_FASTPATH_KEYS";

/// Parse a key value from its wire encoding
pub fn parse_keyval(val: &str) -> FastPathResult<Vec<u8>> {
    if let Some(b64) = val.strip_prefix("base64:") {
        return base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| FastPathError::KeyError(format!("Invalid base64 key: {}", e)));
    }
    if let Some(hex_str) = val.strip_prefix("hex:") {
        return hex::decode(hex_str)
            .map_err(|e| FastPathError::KeyError(format!("Invalid hex key: {}", e)));
    }
    Ok(val.as_bytes().to_vec())
}

/// Reloadable table of active HMAC keys
pub struct KeyTable {
    keys: RwLock<HashMap<u8, Vec<u8>>>,
}

impl KeyTable {
    /// Build from an explicit id -> value map
    pub fn from_map(shared_keys: &HashMap<u8, String>) -> FastPathResult<Self> {
        let mut keys = HashMap::new();
        for (id, val) in shared_keys {
            keys.insert(*id, parse_keyval(val)?);
        }
        if keys.is_empty() {
            return Err(FastPathError::ConfigError(
                "No HMAC keys configured".to_string(),
            ));
        }
        Ok(Self {
            keys: RwLock::new(keys),
        })
    }

    /// Build from the environment
    ///
    /// Priority: ASWARM_FASTPATH_KEY (+ ASWARM_FASTPATH_KEY_ID), then
    /// ASWARM_FASTPATH_KEYS as a JSON id -> value map. Fails fast when no key
    /// is available.
    pub fn from_env() -> FastPathResult<Self> {
        let keys = Self::load_env_keys()?;
        if keys.is_empty() {
            return Err(FastPathError::ConfigError(
                "No HMAC keys configured: set ASWARM_FASTPATH_KEY or ASWARM_FASTPATH_KEYS"
                    .to_string(),
            ));
        }
        Ok(Self {
            keys: RwLock::new(keys),
        })
    }

    fn load_env_keys() -> FastPathResult<HashMap<u8, Vec<u8>>> {
        let mut keys = HashMap::new();

        if let Ok(single) = std::env::var(ENV_KEY) {
            let key_id: u8 = std::env::var(ENV_KEY_ID)
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .map_err(|e| {
                    FastPathError::ConfigError(format!("Invalid {}: {}", ENV_KEY_ID, e))
                })?;
            keys.insert(key_id, parse_keyval(&single)?);
            return Ok(keys);
        }

        if let Ok(keys_json) = std::env::var(ENV_KEYS) {
            let key_map: HashMap<String, String> =
                serde_json::from_str(&keys_json).map_err(|e| {
                    FastPathError::ConfigError(format!("Failed to parse {}: {}", ENV_KEYS, e))
                })?;
            for (id_str, val) in key_map {
                let id: u8 = id_str.parse().map_err(|e| {
                    FastPathError::ConfigError(format!("Invalid key id {}: {}", id_str, e))
                })?;
                keys.insert(id, parse_keyval(&val)?);
            }
        }

        Ok(keys)
    }

    /// Look up a key by id
    pub fn get(&self, key_id: u8) -> Option<Vec<u8>> {
        self.keys.read().get(&key_id).cloned()
    }

    /// Active key ids
    pub fn ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.keys.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Reload the table from the environment without restart
    ///
    /// An empty or unparseable environment leaves the current table in place.
    pub fn reload_from_env(&self) {
        match Self::load_env_keys() {
            Ok(new_keys) if !new_keys.is_empty() => {
                let ids: Vec<u8> = {
                    let mut sorted: Vec<u8> = new_keys.keys().copied().collect();
                    sorted.sort_unstable();
                    sorted
                };
                *self.keys.write() = new_keys;
                info!(?ids, "reloaded HMAC keys");
            }
            Ok(_) => info!("key reload skipped: no keys in environment"),
            Err(e) => info!(error = %e, "key reload skipped"),
        }
    }
}
