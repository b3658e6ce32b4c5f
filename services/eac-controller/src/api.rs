//! Runtime record types.
//!
//! The runtime record is owned by the external store; this crate only ever
//! reads it whole and writes its status back through a conditional update.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::values::RuntimeValues;

/// Namespaced name of the runtime being reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuntimeRef {
    pub namespace: String,
    pub name: String,
}

impl RuntimeRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Name of the replicated pod group running the workers.
    pub fn worker_group_name(&self) -> String {
        format!("{}-worker", self.name)
    }

    /// Name of the shared config record holding the endpoint document.
    pub fn endpoints_config_name(&self) -> String {
        format!("{}-worker-endpoints", self.name)
    }
}

impl fmt::Display for RuntimeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Coarse lifecycle stage of a runtime component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimePhase {
    #[default]
    #[serde(rename = "")]
    None,
    NotReady,
    PartialReady,
    Ready,
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Condition type set once the workers are set up.
pub const WORKERS_INITIALIZED: &str = "WorkersInitialized";

/// Condition type set once the workers are ready.
pub const WORKERS_READY: &str = "WorkersReady";

pub const WORKERS_INITIALIZED_REASON: &str = "Workers are initialized";
pub const WORKERS_READY_REASON: &str = "Workers are ready";

/// A named, reason-coded status fact attached to a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeCondition {
    /// Open-ended; master and fuse conditions share the list.
    #[serde(rename = "type")]
    pub kind: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_probe_time: DateTime<Utc>,
    pub last_transition_time: DateTime<Utc>,
}

impl RuntimeCondition {
    pub fn new(
        kind: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
        status: ConditionStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            kind: kind.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_probe_time: now,
            last_transition_time: now,
        }
    }

    fn same_fact(&self, other: &Self) -> bool {
        self.status == other.status && self.reason == other.reason && self.message == other.message
    }
}

/// Observed state of a runtime's worker group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    #[serde(default)]
    pub worker_phase: RuntimePhase,
    #[serde(default)]
    pub desired_worker_number_scheduled: i32,
    #[serde(default)]
    pub current_worker_number_scheduled: i32,
    #[serde(default)]
    pub conditions: Vec<RuntimeCondition>,
}

impl RuntimeStatus {
    pub fn condition(&self, kind: &str) -> Option<&RuntimeCondition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    /// Upsert a condition by type.
    ///
    /// A condition that restates the stored fact keeps the stored timestamps,
    /// so a repeated reconcile yields an equal status. A changed reason or
    /// message with the same status keeps the transition time.
    pub fn upsert_condition(&mut self, condition: RuntimeCondition) {
        match self.conditions.iter_mut().find(|c| c.kind == condition.kind) {
            None => self.conditions.push(condition),
            Some(existing) if existing.same_fact(&condition) => {}
            Some(existing) => {
                let last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time
                } else {
                    condition.last_transition_time
                };
                *existing = RuntimeCondition {
                    last_transition_time,
                    ..condition
                };
            }
        }
    }
}

/// Credentials and location of the backing store, as configured.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountSpec {
    pub mount_point: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub access_key_secret: String,
}

impl fmt::Debug for MountSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountSpec")
            .field("mount_point", &self.mount_point)
            .field("access_key_id", &"<redacted>")
            .field("access_key_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSpec {
    /// Configured worker replica count.
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub mount: MountSpec,
    #[serde(default)]
    pub values: RuntimeValues,
}

/// The runtime's control-plane record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runtime {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub spec: RuntimeSpec,
    #[serde(default)]
    pub status: RuntimeStatus,
}

impl Runtime {
    pub fn new(target: &RuntimeRef, spec: RuntimeSpec) -> Self {
        Self {
            namespace: target.namespace.clone(),
            name: target.name.clone(),
            spec,
            status: RuntimeStatus::default(),
        }
    }

    pub fn target(&self) -> RuntimeRef {
        RuntimeRef::new(&self.namespace, &self.name)
    }

    pub fn replicas(&self) -> i32 {
        self.spec.replicas
    }
}
