// aswarm-microact: Policy envelope
//
// One typed configuration object threaded through the catalog constructor.
// The environment feeds it only at the binary edge.

use std::path::PathBuf;

/// Environment variable gating real execution
pub const ENV_DRY_RUN: &str = "ASWARM_DRY_RUN";
/// Environment variable bounding actuation blast radius
pub const ENV_MAX_RING: &str = "ASWARM_MAX_RING";

/// Catalog policy envelope
#[derive(Debug, Clone)]
pub struct MicroActConfig {
    /// Requests for rings above this fail fast
    pub max_ring: u8,
    /// No external command runs in dry-run; results keep their shape
    pub dry_run: bool,
    /// Where certificates are written
    pub certificate_dir: PathBuf,
    /// HMAC key for certificate signatures; absent emits unsigned with a
    /// warning
    pub signing_key: Option<Vec<u8>>,
    pub site_id: String,
}

impl Default for MicroActConfig {
    fn default() -> Self {
        Self {
            max_ring: 3,
            dry_run: true,
            certificate_dir: PathBuf::from("ActionCertificates"),
            signing_key: None,
            site_id: "aswarm".to_string(),
        }
    }
}

impl MicroActConfig {
    /// Apply ASWARM_DRY_RUN and ASWARM_MAX_RING overrides
    pub fn from_env(mut self) -> Self {
        if let Ok(raw) = std::env::var(ENV_DRY_RUN) {
            self.dry_run = matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(raw) = std::env::var(ENV_MAX_RING) {
            if let Ok(ring) = raw.parse::<u8>() {
                self.max_ring = ring;
            }
        }
        self
    }
}
