//! Periodic reconciliation loop.
//!
//! Each tick runs one level-triggered pass over the engine:
//! - set up workers while their phase is unset (preparing the backing-store
//!   quota first when credentials are configured)
//! - check worker readiness
//! - publish worker endpoints
//! - report backing-store capacity when quota checks are enabled

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::engine::EacEngine;
use crate::error::EngineResult;

/// Outcome of a single pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassStats {
    pub workers_set_up: bool,
    pub workers_ready: bool,
    pub endpoints_written: bool,
}

/// Runs reconciliation passes for one runtime on a fixed interval.
pub struct ReconcileWorker {
    engine: Arc<EacEngine>,
    interval: Duration,
}

impl ReconcileWorker {
    pub fn new(engine: Arc<EacEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Run until shutdown is signaled. Failed passes are logged and retried
    /// on the next tick.
    #[instrument(skip(self, shutdown), fields(runtime = %self.engine.target()))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting reconcile worker"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once().await {
                        Ok(stats) => debug!(?stats, "Reconcile pass complete"),
                        Err(e) => error!(error = %e, "Reconcile pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender can no longer signal; stop as well.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconcile worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single reconciliation pass.
    pub async fn run_once(&self) -> EngineResult<PassStats> {
        let mut stats = PassStats::default();
        let quota_enabled = self.engine.should_check_ufs().await.unwrap_or_else(|e| {
            warn!(error = %e, "Cannot read backing-store mount, skipping quota checks");
            false
        });

        if self.engine.should_setup_workers().await? {
            if quota_enabled {
                self.engine.prepare_ufs().await?;
            }
            self.engine.setup_workers().await?;
            stats.workers_set_up = true;
        }

        stats.workers_ready = self.engine.check_workers_ready().await?;
        stats.endpoints_written = self.engine.sync_workers_endpoints().await?;

        if quota_enabled {
            self.report_capacity().await;
        }

        Ok(stats)
    }

    async fn report_capacity(&self) {
        let total_bytes = self.engine.total_storage_bytes().await;
        let total_files = self.engine.total_file_nums().await;
        let cache_bytes = self.engine.cache_capacity_bytes().await;
        match (total_bytes, total_files, cache_bytes) {
            (Ok(total_bytes), Ok(total_files), Ok(cache_bytes)) => info!(
                total_bytes,
                total_files,
                cache_bytes,
                "Backing store capacity"
            ),
            (bytes, files, cache) => warn!(
                bytes_error = ?bytes.err().map(|e| e.to_string()),
                files_error = ?files.err().map(|e| e.to_string()),
                cache_error = ?cache.err().map(|e| e.to_string()),
                "Backing store capacity unavailable"
            ),
        }
    }
}
