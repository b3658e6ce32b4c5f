//! In-memory cluster backends.
//!
//! Used by tests and by local runs seeded from a JSON snapshot. Writes follow
//! the same optimistic-concurrency contract as a real API server: a stale
//! version token is rejected with a conflict. Conflicts and failures can be
//! injected to exercise retry paths.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use eac_reconcile::{ReconcileError, Versioned};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::api::Runtime;
use crate::cluster::{
    ConfigRecord, ConfigStore, LabelSelector, RuntimeStore, WorkerGroupObservation, WorkerPod,
    WorkerSource,
};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Versioned records of one kind plus injected faults and write counters.
#[derive(Debug)]
struct VersionedMap<T> {
    kind: &'static str,
    records: BTreeMap<Key, Versioned<T>>,
    pending_conflicts: u32,
    pending_failure: Option<ReconcileError>,
    write_attempts: u32,
    writes: u32,
}

impl<T: Clone> VersionedMap<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            records: BTreeMap::new(),
            pending_conflicts: 0,
            pending_failure: None,
            write_attempts: 0,
            writes: 0,
        }
    }

    fn get(&self, namespace: &str, name: &str) -> Result<Versioned<T>, ReconcileError> {
        self.records
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ReconcileError::NotFound(format!("{} {namespace}/{name}", self.kind)))
    }

    fn insert(&mut self, namespace: &str, name: &str, value: T) {
        let version = self
            .records
            .get(&key(namespace, name))
            .map_or(1, |r| r.version + 1);
        self.records
            .insert(key(namespace, name), Versioned::new(value, version));
    }

    fn write(
        &mut self,
        namespace: &str,
        name: &str,
        candidate: Versioned<T>,
        merge: impl FnOnce(&mut T, T),
    ) -> Result<(), ReconcileError> {
        self.write_attempts += 1;
        if let Some(err) = self.pending_failure.take() {
            return Err(err);
        }

        let kind = self.kind;
        let Some(stored) = self.records.get_mut(&key(namespace, name)) else {
            return Err(ReconcileError::NotFound(format!("{kind} {namespace}/{name}")));
        };

        if self.pending_conflicts > 0 {
            // Simulate another writer landing first.
            self.pending_conflicts -= 1;
            stored.version += 1;
        }

        if stored.version != candidate.version {
            return Err(ReconcileError::Conflict(format!(
                "{kind} {namespace}/{name}: version {} is stale (current {})",
                candidate.version, stored.version
            )));
        }

        merge(&mut stored.value, candidate.value);
        stored.version += 1;
        self.writes += 1;
        Ok(())
    }
}

/// Shared config record entry of a [`ClusterSnapshot`].
#[derive(Debug, Clone, Deserialize)]
pub struct NamedConfig {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Serialized cluster state used to seed a [`MemoryCluster`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    #[serde(default)]
    pub runtimes: Vec<Runtime>,
    #[serde(default)]
    pub configs: Vec<NamedConfig>,
    #[serde(default)]
    pub worker_groups: Vec<WorkerGroupObservation>,
    #[serde(default)]
    pub pods: Vec<WorkerPod>,
}

impl ClusterSnapshot {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cluster snapshot {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid cluster snapshot {}", path.display()))
    }
}

/// In-memory runtime, config and worker-group store.
#[derive(Debug)]
pub struct MemoryCluster {
    runtimes: Mutex<VersionedMap<Runtime>>,
    configs: Mutex<VersionedMap<ConfigRecord>>,
    worker_groups: Mutex<BTreeMap<Key, WorkerGroupObservation>>,
    pods: Mutex<Vec<WorkerPod>>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            runtimes: Mutex::new(VersionedMap::new("runtime")),
            configs: Mutex::new(VersionedMap::new("configmap")),
            worker_groups: Mutex::new(BTreeMap::new()),
            pods: Mutex::new(Vec::new()),
        }
    }

    pub fn from_snapshot(snapshot: ClusterSnapshot) -> Self {
        let mut runtimes = VersionedMap::new("runtime");
        for runtime in snapshot.runtimes {
            let (namespace, name) = (runtime.namespace.clone(), runtime.name.clone());
            runtimes.insert(&namespace, &name, runtime);
        }

        let mut configs = VersionedMap::new("configmap");
        for config in snapshot.configs {
            configs.insert(
                &config.namespace,
                &config.name,
                ConfigRecord { data: config.data },
            );
        }

        let worker_groups = snapshot
            .worker_groups
            .into_iter()
            .map(|g| (key(&g.namespace, &g.name), g))
            .collect();

        Self {
            runtimes: Mutex::new(runtimes),
            configs: Mutex::new(configs),
            worker_groups: Mutex::new(worker_groups),
            pods: Mutex::new(snapshot.pods),
        }
    }

    pub async fn put_runtime(&self, runtime: Runtime) {
        let (namespace, name) = (runtime.namespace.clone(), runtime.name.clone());
        self.runtimes.lock().await.insert(&namespace, &name, runtime);
    }

    pub async fn runtime(&self, namespace: &str, name: &str) -> Option<Runtime> {
        self.runtimes
            .lock()
            .await
            .get(namespace, name)
            .ok()
            .map(|r| r.value)
    }

    pub async fn put_config(&self, namespace: &str, name: &str, record: ConfigRecord) {
        self.configs.lock().await.insert(namespace, name, record);
    }

    pub async fn config(&self, namespace: &str, name: &str) -> Option<ConfigRecord> {
        self.configs
            .lock()
            .await
            .get(namespace, name)
            .ok()
            .map(|r| r.value)
    }

    pub async fn put_worker_group(&self, group: WorkerGroupObservation) {
        self.worker_groups
            .lock()
            .await
            .insert(key(&group.namespace, &group.name), group);
    }

    pub async fn set_pods(&self, pods: Vec<WorkerPod>) {
        *self.pods.lock().await = pods;
    }

    /// Make the next `n` status writes lose the race against another writer.
    pub async fn inject_status_conflicts(&self, n: u32) {
        self.runtimes.lock().await.pending_conflicts = n;
    }

    pub async fn inject_config_conflicts(&self, n: u32) {
        self.configs.lock().await.pending_conflicts = n;
    }

    /// Fail the next status write with `err`.
    pub async fn fail_next_status_write(&self, err: ReconcileError) {
        self.runtimes.lock().await.pending_failure = Some(err);
    }

    pub async fn fail_next_config_write(&self, err: ReconcileError) {
        self.configs.lock().await.pending_failure = Some(err);
    }

    /// Status writes submitted, rejected ones included.
    pub async fn status_write_attempts(&self) -> u32 {
        self.runtimes.lock().await.write_attempts
    }

    /// Status writes that were applied.
    pub async fn status_writes(&self) -> u32 {
        self.runtimes.lock().await.writes
    }

    pub async fn config_write_attempts(&self) -> u32 {
        self.configs.lock().await.write_attempts
    }

    pub async fn config_writes(&self) -> u32 {
        self.configs.lock().await.writes
    }
}

#[async_trait]
impl RuntimeStore for MemoryCluster {
    async fn get_runtime(&self, namespace: &str, name: &str) -> Result<Versioned<Runtime>, ReconcileError> {
        self.runtimes.lock().await.get(namespace, name)
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        candidate: Versioned<Runtime>,
    ) -> Result<(), ReconcileError> {
        self.runtimes
            .lock()
            .await
            .write(namespace, name, candidate, |stored, candidate| {
                stored.status = candidate.status;
            })
    }
}

#[async_trait]
impl ConfigStore for MemoryCluster {
    async fn get_config(&self, namespace: &str, name: &str) -> Result<Versioned<ConfigRecord>, ReconcileError> {
        self.configs.lock().await.get(namespace, name)
    }

    async fn update_config(
        &self,
        namespace: &str,
        name: &str,
        candidate: Versioned<ConfigRecord>,
    ) -> Result<(), ReconcileError> {
        self.configs
            .lock()
            .await
            .write(namespace, name, candidate, |stored, candidate| {
                *stored = candidate;
            })
    }
}

#[async_trait]
impl WorkerSource for MemoryCluster {
    async fn get_worker_group(&self, namespace: &str, name: &str) -> Result<WorkerGroupObservation, ReconcileError> {
        self.worker_groups
            .lock()
            .await
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ReconcileError::NotFound(format!("statefulset {namespace}/{name}")))
    }

    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<WorkerPod>, ReconcileError> {
        Ok(self
            .pods
            .lock()
            .await
            .iter()
            .filter(|p| p.namespace == namespace && selector.matches(&p.labels))
            .cloned()
            .collect())
    }
}
