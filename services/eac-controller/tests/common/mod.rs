//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eac_controller::api::{MountSpec, Runtime, RuntimeRef, RuntimeSpec};
use eac_controller::cluster::{
    ConfigRecord, Container, ContainerPort, WorkerGroupObservation, WorkerPod,
};
use eac_controller::quota::{QuotaClient, UnconfiguredQuotaClient};
use eac_controller::{EacEngine, EngineDeps, MemoryCluster, WorkerSetHelper};
use eac_reconcile::BackoffPolicy;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

pub const NAMESPACE: &str = "fluid";
pub const NAME: &str = "demo";

pub fn target() -> RuntimeRef {
    RuntimeRef::new(NAMESPACE, NAME)
}

/// Four attempts, millisecond delays.
pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial: Duration::from_millis(1),
        max: Duration::from_millis(10),
        factor: 2.0,
        steps: 4,
        jitter: 0.0,
    }
}

pub fn runtime(replicas: i32) -> Runtime {
    Runtime::new(
        &target(),
        RuntimeSpec {
            replicas,
            mount: MountSpec {
                mount_point: "eac://0a1b2c-k3j4.cn-hangzhou.nas.aliyuncs.com:/cache".to_string(),
                access_key_id: String::new(),
                access_key_secret: String::new(),
            },
            ..RuntimeSpec::default()
        },
    )
}

pub fn worker_group(replicas: i32, ready: i32) -> WorkerGroupObservation {
    WorkerGroupObservation {
        namespace: NAMESPACE.to_string(),
        name: target().worker_group_name(),
        desired_replicas: replicas,
        current_replicas: replicas,
        ready_replicas: ready,
    }
}

pub fn worker_pod(ip: &str, ready: bool, rpc_port: i32) -> WorkerPod {
    let labels: BTreeMap<String, String> = [
        ("release", NAME),
        ("role", "eac-worker"),
        ("app", "eac"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    WorkerPod {
        namespace: NAMESPACE.to_string(),
        name: format!("{NAME}-worker-{ip}"),
        labels,
        pod_ip: ip.to_string(),
        ready,
        containers: vec![Container {
            name: "eac-worker".to_string(),
            ports: vec![ContainerPort {
                name: "rpc".to_string(),
                container_port: rpc_port,
            }],
        }],
    }
}

/// Cluster holding the runtime, its worker group and an empty endpoints record.
pub async fn cluster(replicas: i32) -> Arc<MemoryCluster> {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.put_runtime(runtime(replicas)).await;
    cluster.put_worker_group(worker_group(replicas, 0)).await;
    cluster
        .put_config(
            NAMESPACE,
            &target().endpoints_config_name(),
            ConfigRecord::default(),
        )
        .await;
    cluster
}

pub fn engine(cluster: &Arc<MemoryCluster>, helper: Arc<dyn WorkerSetHelper>) -> EacEngine {
    engine_with_quota(cluster, helper, Arc::new(UnconfiguredQuotaClient))
}

pub fn engine_with_quota(
    cluster: &Arc<MemoryCluster>,
    helper: Arc<dyn WorkerSetHelper>,
    quota: Arc<dyn QuotaClient>,
) -> EacEngine {
    let deps = EngineDeps {
        runtimes: cluster.clone(),
        configs: cluster.clone(),
        workers: cluster.clone(),
        helper,
        quota,
    };
    EacEngine::new(target(), deps, fast_backoff())
}

/// Collects formatted log lines emitted on the current thread.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route this thread's events here until the guard drops.
    pub fn install(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
