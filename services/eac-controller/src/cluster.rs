//! Interfaces to the cluster-side collaborators.
//!
//! - `RuntimeStore`: the runtime record and its conditional status update
//! - `ConfigStore`: shared key/value config records
//! - `WorkerSource`: read-only snapshots of the worker pod group
//!
//! Every read hands back a version token; every write is conditional on it
//! and fails with `ReconcileError::Conflict` when the token is stale.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use eac_reconcile::{ReconcileError, Versioned};
use serde::{Deserialize, Serialize};

use crate::api::Runtime;

/// Label identifying the runtime kind on worker pods.
pub const RUNTIME_APP_LABEL: &str = "eac";

/// Label key carrying a pod's role.
pub const POD_ROLE_LABEL: &str = "role";

/// Role label value of worker pods.
pub const WORKER_POD_ROLE: &str = "eac-worker";

#[async_trait]
pub trait RuntimeStore: Send + Sync {
    async fn get_runtime(&self, namespace: &str, name: &str) -> Result<Versioned<Runtime>, ReconcileError>;

    /// Replace the runtime's status; only `status` of the candidate is written.
    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        candidate: Versioned<Runtime>,
    ) -> Result<(), ReconcileError>;
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_config(&self, namespace: &str, name: &str) -> Result<Versioned<ConfigRecord>, ReconcileError>;

    async fn update_config(
        &self,
        namespace: &str,
        name: &str,
        candidate: Versioned<ConfigRecord>,
    ) -> Result<(), ReconcileError>;
}

#[async_trait]
pub trait WorkerSource: Send + Sync {
    async fn get_worker_group(&self, namespace: &str, name: &str) -> Result<WorkerGroupObservation, ReconcileError>;

    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<WorkerPod>, ReconcileError>;
}

/// A string-valued shared config record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Snapshot of the replicated pod group running the workers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerGroupObservation {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub desired_replicas: i32,
    #[serde(default)]
    pub current_replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    #[serde(default)]
    pub name: String,
    pub container_port: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPod {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub pod_ip: String,
    /// Whether the pod reports the Ready condition.
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub containers: Vec<Container>,
}

/// Equality-based label selector (logical AND of all pairs).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            match_labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Selector of the worker pods belonging to a runtime.
    pub fn workers_of(runtime_name: &str) -> Self {
        Self::new([
            ("release", runtime_name),
            (POD_ROLE_LABEL, WORKER_POD_ROLE),
            ("app", RUNTIME_APP_LABEL),
        ])
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        write!(f, "{}", rendered.join(","))
    }
}
