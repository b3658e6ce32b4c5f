//! Chart values describing the runtime's roles.
//!
//! Rendering these into container specs happens elsewhere; this crate only
//! reads the worker's level-0 tiered-store entry for capacity reporting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeValues {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fullname_override: String,
    #[serde(default, rename = "placement", skip_serializing_if = "String::is_empty")]
    pub placement_mode: String,
    #[serde(default)]
    pub master: MasterValues,
    #[serde(default)]
    pub worker: WorkerValues,
    #[serde(default)]
    pub fuse: FuseValues,
    #[serde(default)]
    pub init_fuse: ImageInfo,
    #[serde(default)]
    pub os_advise: OsAdvise,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_pull_policy: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsAdvise {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os_version: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ports {
    #[serde(default)]
    pub rpc: i32,
    #[serde(default)]
    pub monitor: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterValues {
    #[serde(flatten)]
    pub image: ImageInfo,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mount_point: String,
    #[serde(default, rename = "count")]
    pub replicas: i32,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "option", skip_serializing_if = "String::is_empty")]
    pub options: String,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub host_network: bool,
    #[serde(default, rename = "tieredstore")]
    pub tiered_store: TieredStore,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerValues {
    #[serde(flatten)]
    pub image: ImageInfo,
    #[serde(default)]
    pub port: Ports,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "option", skip_serializing_if = "String::is_empty")]
    pub options: String,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub host_network: bool,
    #[serde(default, rename = "tieredstore")]
    pub tiered_store: TieredStore,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuseValues {
    #[serde(flatten)]
    pub image: ImageInfo,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mount_point: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_mount_path: String,
    #[serde(default)]
    pub port: Ports,
    #[serde(default, rename = "option", skip_serializing_if = "String::is_empty")]
    pub options: String,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub host_network: bool,
    #[serde(default, rename = "tieredstore")]
    pub tiered_store: TieredStore,
    #[serde(default)]
    pub critical_pod: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieredStore {
    #[serde(default)]
    pub levels: Vec<Level>,
}

/// One tier of the cache store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    #[serde(default)]
    pub alias: String,
    pub level: i32,
    #[serde(default, rename = "mediumtype")]
    pub medium_type: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub quota: String,
    #[serde(default)]
    pub high: String,
    #[serde(default)]
    pub low: String,
}

impl TieredStore {
    /// The first configured level-0 tier.
    pub fn level0(&self) -> Option<&Level> {
        self.levels.iter().find(|l| l.level == 0)
    }
}

impl WorkerValues {
    pub fn tiered_store_level0_path(&self) -> &str {
        self.tiered_store.level0().map_or("", |l| l.path.as_str())
    }

    pub fn tiered_store_level0_type(&self) -> &str {
        self.tiered_store.level0().map_or("", |l| l.kind.as_str())
    }

    pub fn tiered_store_level0_quota(&self) -> &str {
        self.tiered_store.level0().map_or("", |l| l.quota.as_str())
    }
}

/// Parse a resource quantity such as `10Gi`, `512Mi`, `2G` or `1024` into bytes.
pub fn parse_quantity(raw: &str) -> EngineResult<i64> {
    let trimmed = raw.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);

    let multiplier: i64 = match suffix {
        "" => 1,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        _ => return Err(EngineError::InvalidQuantity(raw.to_string())),
    };

    digits
        .parse::<i64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| EngineError::InvalidQuantity(raw.to_string()))
}
