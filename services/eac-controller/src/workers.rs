//! Worker phase reconciliation.
//!
//! Two variants drive the worker phase:
//! - replicas == 0: [`DisabledWorkers`], owned here (`None -> NotReady -> Ready`)
//! - otherwise: the external [`WorkerSetHelper`] that knows how to scale the
//!   worker group; its returned status is adopted verbatim
//!
//! Both variants only compute a candidate status. The write goes through
//! `apply_if_changed`, so an unchanged status never reaches the store and a
//! conflict re-reads and recomputes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use eac_reconcile::{apply_if_changed, Applied, BackoffPolicy};
use tracing::{debug, info, instrument};

use crate::api::{
    ConditionStatus, Runtime, RuntimeCondition, RuntimePhase, RuntimeRef, RuntimeStatus,
    WORKERS_INITIALIZED, WORKERS_INITIALIZED_REASON, WORKERS_READY, WORKERS_READY_REASON,
};
use crate::cluster::{RuntimeStore, WorkerGroupObservation, WorkerSource};
use crate::error::{log_error_except_conflict, EngineError, EngineResult};
use crate::readiness::ReadinessEvaluator;

/// Reconciles a non-empty worker set.
#[async_trait]
pub trait WorkerSetHelper: Send + Sync {
    /// Compute the status after setting up the workers.
    async fn setup_workers(
        &self,
        runtime: &Runtime,
        workers: &WorkerGroupObservation,
    ) -> EngineResult<RuntimeStatus>;

    /// Compute worker readiness and the status reflecting it.
    async fn check_workers_ready(
        &self,
        runtime: &Runtime,
        workers: &WorkerGroupObservation,
    ) -> EngineResult<(bool, RuntimeStatus)>;
}

/// Variant used when no workers are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledWorkers;

static DISABLED_WORKERS: DisabledWorkers = DisabledWorkers;

#[async_trait]
impl WorkerSetHelper for DisabledWorkers {
    async fn setup_workers(
        &self,
        runtime: &Runtime,
        _workers: &WorkerGroupObservation,
    ) -> EngineResult<RuntimeStatus> {
        let mut status = runtime.status.clone();
        status.worker_phase = RuntimePhase::NotReady;
        status.desired_worker_number_scheduled = 0;
        status.current_worker_number_scheduled = status.desired_worker_number_scheduled;
        status.upsert_condition(RuntimeCondition::new(
            WORKERS_INITIALIZED,
            WORKERS_INITIALIZED_REASON,
            "The workers are initialized.",
            ConditionStatus::True,
        ));
        Ok(status)
    }

    async fn check_workers_ready(
        &self,
        runtime: &Runtime,
        _workers: &WorkerGroupObservation,
    ) -> EngineResult<(bool, RuntimeStatus)> {
        let mut status = runtime.status.clone();
        status.worker_phase = RuntimePhase::Ready;
        status.upsert_condition(RuntimeCondition::new(
            WORKERS_READY,
            WORKERS_READY_REASON,
            "The workers are ready.",
            ConditionStatus::True,
        ));
        // Nothing to wait for.
        Ok((true, status))
    }
}

/// Pick the variant for a configured replica count.
pub fn select_variant(replicas: i32, helper: &dyn WorkerSetHelper) -> &dyn WorkerSetHelper {
    if replicas == 0 {
        &DISABLED_WORKERS
    } else {
        helper
    }
}

/// Stand-in for the worker-set helper in tests and local runs.
///
/// Mirrors the observed worker group into the status: the desired count comes
/// from the runtime, the current count from the group, and the workers are
/// ready once every desired replica reports ready.
#[derive(Debug, Default)]
pub struct MockHelper {
    setup_calls: AtomicU32,
    check_calls: AtomicU32,
    fail: bool,
}

impl MockHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// A helper whose every call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn setup_calls(&self) -> u32 {
        self.setup_calls.load(Ordering::SeqCst)
    }

    pub fn check_calls(&self) -> u32 {
        self.check_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerSetHelper for MockHelper {
    async fn setup_workers(
        &self,
        runtime: &Runtime,
        workers: &WorkerGroupObservation,
    ) -> EngineResult<RuntimeStatus> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EngineError::Helper("mock setup failure".to_string()));
        }

        let mut status = runtime.status.clone();
        if status.worker_phase == RuntimePhase::None {
            status.worker_phase = RuntimePhase::NotReady;
        }
        status.desired_worker_number_scheduled = runtime.replicas();
        status.current_worker_number_scheduled = workers.current_replicas;
        status.upsert_condition(RuntimeCondition::new(
            WORKERS_INITIALIZED,
            WORKERS_INITIALIZED_REASON,
            "The workers are initialized.",
            ConditionStatus::True,
        ));
        Ok(status)
    }

    async fn check_workers_ready(
        &self,
        runtime: &Runtime,
        workers: &WorkerGroupObservation,
    ) -> EngineResult<(bool, RuntimeStatus)> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EngineError::Helper("mock readiness failure".to_string()));
        }

        let mut status = runtime.status.clone();
        let ready = workers.ready_replicas >= runtime.replicas();
        status.worker_phase = match (ready, workers.ready_replicas) {
            (true, _) => RuntimePhase::Ready,
            (false, 0) => RuntimePhase::NotReady,
            (false, _) => RuntimePhase::PartialReady,
        };
        if ready {
            status.upsert_condition(RuntimeCondition::new(
                WORKERS_READY,
                WORKERS_READY_REASON,
                "The workers are ready.",
                ConditionStatus::True,
            ));
        }
        Ok((ready, status))
    }
}

/// Drives the worker phase of one runtime.
pub struct WorkerPhaseReconciler {
    target: RuntimeRef,
    runtimes: Arc<dyn RuntimeStore>,
    workers: Arc<dyn WorkerSource>,
    helper: Arc<dyn WorkerSetHelper>,
    readiness: ReadinessEvaluator,
    backoff: BackoffPolicy,
}

impl WorkerPhaseReconciler {
    pub fn new(
        target: RuntimeRef,
        runtimes: Arc<dyn RuntimeStore>,
        workers: Arc<dyn WorkerSource>,
        helper: Arc<dyn WorkerSetHelper>,
        backoff: BackoffPolicy,
    ) -> Self {
        let readiness = ReadinessEvaluator::new(
            target.clone(),
            runtimes.clone(),
            helper.clone(),
            backoff.clone(),
        );
        Self {
            target,
            runtimes,
            workers,
            helper,
            readiness,
            backoff,
        }
    }

    /// Workers still need setting up while their phase is unset.
    pub async fn should_setup_workers(&self) -> EngineResult<bool> {
        let runtime = self
            .runtimes
            .get_runtime(&self.target.namespace, &self.target.name)
            .await
            .map_err(|e| {
                log_error_except_conflict(e.into(), "Failed to get runtime", &self.target)
            })?;
        Ok(runtime.value.status.worker_phase == RuntimePhase::None)
    }

    /// Set up the workers and record the outcome in the runtime status.
    #[instrument(skip(self), fields(runtime = %self.target))]
    pub async fn setup_workers(&self) -> EngineResult<()> {
        self.try_setup_workers()
            .await
            .map_err(|e| log_error_except_conflict(e, "Failed to setup workers", &self.target))
    }

    async fn try_setup_workers(&self) -> EngineResult<()> {
        let observation = self.observe_workers().await?;
        let (namespace, name) = (self.target.namespace.as_str(), self.target.name.as_str());
        let runtimes = &*self.runtimes;
        let helper = &*self.helper;
        let observation = &observation;

        let Applied { value, written } = apply_if_changed(
            &self.backoff,
            move || async move {
                runtimes
                    .get_runtime(namespace, name)
                    .await
                    .map_err(EngineError::from)
            },
            move |mut runtime: Runtime| async move {
                let variant = select_variant(runtime.replicas(), helper);
                runtime.status = variant.setup_workers(&runtime, observation).await?;
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

        if written {
            info!(
                phase = ?value.status.worker_phase,
                desired = value.status.desired_worker_number_scheduled,
                current = value.status.current_worker_number_scheduled,
                "Workers set up"
            );
        } else {
            debug!("Worker status already up to date");
        }
        Ok(())
    }

    /// Whether the workers are ready; updates phase and conditions on the way.
    pub async fn check_workers_ready(&self) -> EngineResult<bool> {
        let observation = self
            .observe_workers()
            .await
            .map_err(|e| log_error_except_conflict(e, "Failed to check worker ready", &self.target))?;
        self.readiness.evaluate(&observation).await
    }

    async fn observe_workers(&self) -> EngineResult<WorkerGroupObservation> {
        Ok(self
            .workers
            .get_worker_group(&self.target.namespace, &self.target.worker_group_name())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RuntimeSpec;

    fn runtime(replicas: i32) -> Runtime {
        Runtime::new(
            &RuntimeRef::new("default", "demo"),
            RuntimeSpec {
                replicas,
                ..RuntimeSpec::default()
            },
        )
    }

    #[tokio::test]
    async fn test_disabled_setup_status() {
        let status = DisabledWorkers
            .setup_workers(&runtime(0), &WorkerGroupObservation::default())
            .await
            .unwrap();

        assert_eq!(status.worker_phase, RuntimePhase::NotReady);
        assert_eq!(status.desired_worker_number_scheduled, 0);
        assert_eq!(status.current_worker_number_scheduled, 0);
        let cond = status
            .condition(WORKERS_INITIALIZED)
            .unwrap();
        assert_eq!(cond.reason, WORKERS_INITIALIZED_REASON);
        assert_eq!(cond.message, "The workers are initialized.");
        assert_eq!(cond.status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_disabled_check_always_ready() {
        let mut rt = runtime(0);
        rt.status.worker_phase = RuntimePhase::NotReady;
        let (ready, status) = DisabledWorkers
            .check_workers_ready(&rt, &WorkerGroupObservation::default())
            .await
            .unwrap();

        assert!(ready);
        assert_eq!(status.worker_phase, RuntimePhase::Ready);
        let ready_conditions = status
            .conditions
            .iter()
            .filter(|c| c.kind == WORKERS_READY)
            .count();
        assert_eq!(ready_conditions, 1);
    }

    #[tokio::test]
    async fn test_disabled_setup_is_stable() {
        let mut rt = runtime(0);
        rt.status = DisabledWorkers
            .setup_workers(&rt, &WorkerGroupObservation::default())
            .await
            .unwrap();
        let again = DisabledWorkers
            .setup_workers(&rt, &WorkerGroupObservation::default())
            .await
            .unwrap();
        assert_eq!(again, rt.status);
    }

    #[tokio::test]
    async fn test_select_variant_by_replicas() {
        let helper = MockHelper::failing();
        let observation = WorkerGroupObservation::default();

        // Zero replicas never reach the helper.
        assert!(select_variant(0, &helper)
            .setup_workers(&runtime(0), &observation)
            .await
            .is_ok());
        assert_eq!(helper.setup_calls(), 0);

        assert!(select_variant(3, &helper)
            .setup_workers(&runtime(3), &observation)
            .await
            .is_err());
        assert_eq!(helper.setup_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_helper_partial_ready() {
        let helper = MockHelper::new();
        let observation = WorkerGroupObservation {
            ready_replicas: 1,
            current_replicas: 3,
            ..WorkerGroupObservation::default()
        };
        let (ready, status) = helper
            .check_workers_ready(&runtime(3), &observation)
            .await
            .unwrap();
        assert!(!ready);
        assert_eq!(status.worker_phase, RuntimePhase::PartialReady);
    }
}
