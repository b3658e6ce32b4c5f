//! EAC cache runtime controller.
//!
//! Runs the reconcile worker for a single runtime. Cluster state comes from
//! the in-memory backends, optionally seeded from `EAC_STATE_FILE`; the quota
//! service is reached over HTTP when `EAC_QUOTA_ENDPOINT` is set.

use std::sync::Arc;

use anyhow::Result;
use eac_controller::{
    config::Config,
    engine::{EacEngine, EngineDeps},
    memory::{ClusterSnapshot, MemoryCluster},
    quota::{HttpQuotaClient, QuotaClient, UnconfiguredQuotaClient},
    reconciler::ReconcileWorker,
    telemetry,
    workers::MockHelper,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    telemetry::init(&config.log_level);

    info!(runtime = %config.runtime, "Starting EAC controller");

    let snapshot = match &config.state_file {
        Some(path) => {
            info!(path = %path.display(), "Loading cluster snapshot");
            ClusterSnapshot::from_file(path)?
        }
        None => {
            warn!("No EAC_STATE_FILE set, starting from an empty cluster");
            ClusterSnapshot::default()
        }
    };
    let cluster = Arc::new(MemoryCluster::from_snapshot(snapshot));

    let quota: Arc<dyn QuotaClient> = match &config.quota_endpoint {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "Using quota service");
            Arc::new(HttpQuotaClient::new(endpoint.clone()))
        }
        None => Arc::new(UnconfiguredQuotaClient),
    };

    let deps = EngineDeps {
        runtimes: cluster.clone(),
        configs: cluster.clone(),
        workers: cluster,
        helper: Arc::new(MockHelper::new()),
        quota,
    };
    let engine = Arc::new(EacEngine::new(
        config.runtime.clone(),
        deps,
        config.backoff.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ReconcileWorker::new(engine, config.reconcile_interval);
    let worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);

    let shutdown_timeout = std::time::Duration::from_secs(10);
    match tokio::time::timeout(shutdown_timeout, worker_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Reconcile worker panicked"),
        Err(_) => warn!("Reconcile worker did not shut down in time"),
    }

    info!("EAC controller shutdown complete");
    Ok(())
}
