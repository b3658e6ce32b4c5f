//! Worker endpoint discovery.
//!
//! Publishes the RPC addresses of ready worker pods into the shared config
//! record `<runtime>-worker-endpoints` so clients can find them. The document
//! is recomputed from the live pod list on every sync; not-ready pods never
//! make it in.

use std::sync::Arc;

use eac_reconcile::{apply_if_changed, BackoffPolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::api::RuntimeRef;
use crate::cluster::{ConfigRecord, ConfigStore, LabelSelector, WorkerPod, WorkerSource};
use crate::error::{log_error_except_conflict, EngineError, EngineResult};

/// Name of the worker container inside a worker pod.
pub const WORKER_CONTAINER_NAME: &str = "eac-worker";

/// Name of the worker container's RPC port.
pub const RPC_PORT_NAME: &str = "rpc";

/// Key of the endpoint document inside the config record.
pub const ENDPOINTS_DATA_KEY: &str = "eac-worker-endpoints.json";

/// Reachable worker addresses, `ip:port`, in pod order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDocument {
    #[serde(
        rename = "containerendpoints",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub container_endpoints: Vec<String>,
}

impl EndpointDocument {
    /// Collect the RPC endpoint of every ready pod's worker container.
    pub fn from_pods(pods: &[WorkerPod]) -> Self {
        let container_endpoints = pods
            .iter()
            .filter(|pod| pod.ready)
            .flat_map(|pod| {
                pod.containers
                    .iter()
                    .filter(|c| c.name == WORKER_CONTAINER_NAME)
                    .flat_map(|c| c.ports.iter())
                    .filter(|p| p.name == RPC_PORT_NAME)
                    .map(move |p| format!("{}:{}", pod.pod_ip, p.container_port))
            })
            .collect();

        Self {
            container_endpoints,
        }
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Publishes the endpoint document of one runtime.
pub struct EndpointPublisher {
    target: RuntimeRef,
    configs: Arc<dyn ConfigStore>,
    workers: Arc<dyn WorkerSource>,
    backoff: BackoffPolicy,
}

impl EndpointPublisher {
    pub fn new(
        target: RuntimeRef,
        configs: Arc<dyn ConfigStore>,
        workers: Arc<dyn WorkerSource>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            target,
            configs,
            workers,
            backoff,
        }
    }

    /// Recompute the endpoint document and store it if it changed.
    ///
    /// Returns whether a write happened. A missing config record is an error;
    /// it has to be provisioned before the first sync.
    #[instrument(skip(self), fields(runtime = %self.target))]
    pub async fn sync_workers_endpoints(&self) -> EngineResult<bool> {
        self.try_sync()
            .await
            .map_err(|e| log_error_except_conflict(e, "Failed to sync worker endpoints", &self.target))
    }

    async fn try_sync(&self) -> EngineResult<bool> {
        let namespace = self.target.namespace.as_str();
        let config_name = self.target.endpoints_config_name();
        let config_name = config_name.as_str();

        self.configs.get_config(namespace, config_name).await?;

        let selector = LabelSelector::workers_of(&self.target.name);
        let pods = self.workers.list_pods(namespace, &selector).await?;
        let document = EndpointDocument::from_pods(&pods).to_json()?;
        info!(worker_endpoints = %document, "Sync worker endpoints");

        let configs = &*self.configs;
        let document = document.as_str();
        let applied = apply_if_changed(
            &self.backoff,
            move || async move {
                configs
                    .get_config(namespace, config_name)
                    .await
                    .map_err(EngineError::from)
            },
            move |mut record: ConfigRecord| async move {
                record
                    .data
                    .insert(ENDPOINTS_DATA_KEY.to_string(), document.to_string());
                Ok::<_, EngineError>(record)
            },
            move |candidate| async move {
                configs
                    .update_config(namespace, config_name, candidate)
                    .await
                    .map_err(EngineError::from)
            },
        )
        .await?;

        if !applied.written {
            debug!("Worker endpoints unchanged");
        }
        Ok(applied.written)
    }
}
