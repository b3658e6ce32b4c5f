//! The per-runtime engine.
//!
//! Bundles the worker reconciler, the endpoint publisher and the quota
//! gateway for one runtime. Every call is independent and level-triggered;
//! nothing is cached between calls.

use std::sync::Arc;

use eac_reconcile::BackoffPolicy;

use crate::api::RuntimeRef;
use crate::cluster::{ConfigStore, RuntimeStore, WorkerSource};
use crate::endpoints::EndpointPublisher;
use crate::error::EngineResult;
use crate::quota::{QuotaClient, QuotaGateway, UfsToUpdate};
use crate::workers::{WorkerPhaseReconciler, WorkerSetHelper};

/// External collaborators the engine talks to.
#[derive(Clone)]
pub struct EngineDeps {
    pub runtimes: Arc<dyn RuntimeStore>,
    pub configs: Arc<dyn ConfigStore>,
    pub workers: Arc<dyn WorkerSource>,
    pub helper: Arc<dyn WorkerSetHelper>,
    pub quota: Arc<dyn QuotaClient>,
}

pub struct EacEngine {
    target: RuntimeRef,
    workers: WorkerPhaseReconciler,
    endpoints: EndpointPublisher,
    quota: QuotaGateway,
}

impl EacEngine {
    pub fn new(target: RuntimeRef, deps: EngineDeps, backoff: BackoffPolicy) -> Self {
        let workers = WorkerPhaseReconciler::new(
            target.clone(),
            deps.runtimes.clone(),
            deps.workers.clone(),
            deps.helper,
            backoff.clone(),
        );
        let endpoints = EndpointPublisher::new(target.clone(), deps.configs, deps.workers, backoff);
        let quota = QuotaGateway::new(target.clone(), deps.runtimes, deps.quota);

        Self {
            target,
            workers,
            endpoints,
            quota,
        }
    }

    pub fn target(&self) -> &RuntimeRef {
        &self.target
    }

    pub async fn should_setup_workers(&self) -> EngineResult<bool> {
        self.workers.should_setup_workers().await
    }

    pub async fn setup_workers(&self) -> EngineResult<()> {
        self.workers.setup_workers().await
    }

    pub async fn check_workers_ready(&self) -> EngineResult<bool> {
        self.workers.check_workers_ready().await
    }

    pub async fn sync_workers_endpoints(&self) -> EngineResult<bool> {
        self.endpoints.sync_workers_endpoints().await
    }

    pub async fn used_storage_bytes(&self) -> EngineResult<i64> {
        self.quota.used_storage_bytes().await
    }

    pub async fn free_storage_bytes(&self) -> EngineResult<i64> {
        self.quota.free_storage_bytes().await
    }

    pub async fn total_storage_bytes(&self) -> EngineResult<i64> {
        self.quota.total_storage_bytes().await
    }

    pub async fn total_file_nums(&self) -> EngineResult<i64> {
        self.quota.total_file_nums().await
    }

    pub async fn should_check_ufs(&self) -> EngineResult<bool> {
        self.quota.should_check_ufs().await
    }

    pub async fn prepare_ufs(&self) -> EngineResult<()> {
        self.quota.prepare_ufs().await
    }

    pub fn should_update_ufs(&self) -> Option<UfsToUpdate> {
        self.quota.should_update_ufs()
    }

    pub async fn update_on_ufs_change(&self, ufs_to_update: &UfsToUpdate) -> EngineResult<bool> {
        self.quota.update_on_ufs_change(ufs_to_update).await
    }

    pub async fn cache_capacity_bytes(&self) -> EngineResult<i64> {
        self.quota.cache_capacity_bytes().await
    }
}
