// aswarm-control: Record and watch-event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lease-style coordination record
///
/// One per Sentinel node (`aswarm-sentinel-<node>`). Annotations carry the
/// witness signal; `renew_time` is the server-observed timestamp assigned on
/// every mutation and is authoritative for ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub holder_identity: Option<String>,
    pub lease_duration_seconds: Option<u32>,
    pub renew_time: Option<DateTime<Utc>>,
}

impl LeaseRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotations: BTreeMap::new(),
            labels: BTreeMap::new(),
            holder_identity: None,
            lease_duration_seconds: None,
            renew_time: None,
        }
    }
}

/// Merge-patch for a lease record
///
/// Annotations and labels are merged key-by-key; `holder_identity` and
/// `lease_duration_seconds` replace when present. The server assigns the new
/// `renew_time`.
#[derive(Debug, Clone, Default)]
pub struct LeasePatch {
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub holder_identity: Option<String>,
    pub lease_duration_seconds: Option<u32>,
}

/// Config record holding a named artifact
///
/// Elevation artifacts are written here (`aswarm-elevated-<runid>`) with a
/// single `elevation.json` data field, create-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ConfigRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            data: BTreeMap::new(),
            created_at: None,
        }
    }
}

/// Label selector for watch streams
///
/// All listed key/value pairs must match.
#[derive(Debug, Clone, Default)]
pub struct LabelSelector(pub BTreeMap<String, String>);

impl LabelSelector {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0
            .iter()
            .all(|(k, v)| labels.get(k).map(|lv| lv == v).unwrap_or(false))
    }
}

/// Watch event delivered on lease mutations
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(LeaseRecord),
    Modified(LeaseRecord),
    Deleted(String),
}
