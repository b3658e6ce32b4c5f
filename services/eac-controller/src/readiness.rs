//! Worker readiness evaluation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eac_reconcile::{apply_if_changed, BackoffPolicy};
use tracing::{debug, instrument};

use crate::api::{Runtime, RuntimeRef};
use crate::cluster::{RuntimeStore, WorkerGroupObservation};
use crate::error::{log_error_except_conflict, EngineError, EngineResult};
use crate::workers::{select_variant, WorkerSetHelper};

/// Asks the selected worker variant whether the workers are ready and writes
/// the status it returns. Every attempt starts from a freshly read runtime.
pub struct ReadinessEvaluator {
    target: RuntimeRef,
    runtimes: Arc<dyn RuntimeStore>,
    helper: Arc<dyn WorkerSetHelper>,
    backoff: BackoffPolicy,
}

impl ReadinessEvaluator {
    pub fn new(
        target: RuntimeRef,
        runtimes: Arc<dyn RuntimeStore>,
        helper: Arc<dyn WorkerSetHelper>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            target,
            runtimes,
            helper,
            backoff,
        }
    }

    #[instrument(skip(self, observation), fields(runtime = %self.target))]
    pub async fn evaluate(&self, observation: &WorkerGroupObservation) -> EngineResult<bool> {
        let ready = AtomicBool::new(false);
        let result = self.apply(observation, &ready).await;

        match result {
            Ok(()) => {
                let ready = ready.load(Ordering::SeqCst);
                debug!(ready, "Worker readiness evaluated");
                Ok(ready)
            }
            Err(e) => Err(log_error_except_conflict(
                e,
                "Failed to check worker ready",
                &self.target,
            )),
        }
    }

    async fn apply(&self, observation: &WorkerGroupObservation, ready: &AtomicBool) -> EngineResult<()> {
        let (namespace, name) = (self.target.namespace.as_str(), self.target.name.as_str());
        let runtimes = &*self.runtimes;
        let helper = &*self.helper;

        apply_if_changed(
            &self.backoff,
            move || async move {
                runtimes
                    .get_runtime(namespace, name)
                    .await
                    .map_err(EngineError::from)
            },
            move |mut runtime: Runtime| async move {
                let variant = select_variant(runtime.replicas(), helper);
                let (is_ready, status) = variant.check_workers_ready(&runtime, observation).await?;
                ready.store(is_ready, Ordering::SeqCst);
                runtime.status = status;
                Ok::<_, EngineError>(runtime)
            },
            move |candidate| async move {
                runtimes
                    .update_status(namespace, name, candidate)
                    .await
                    .map_err(EngineError::from)
            },
        )
        .await?;

        Ok(())
    }
}
