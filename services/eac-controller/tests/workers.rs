mod common;

use std::sync::Arc;

use common::{cluster, engine, runtime, worker_group, LogCapture, NAME, NAMESPACE};
use eac_controller::api::{
    ConditionStatus, RuntimeCondition, RuntimePhase, WORKERS_INITIALIZED, WORKERS_READY,
};
use eac_controller::MockHelper;
use eac_reconcile::ReconcileError;
use rstest::rstest;

#[tokio::test]
async fn test_disabled_setup_is_idempotent() {
    let cluster = cluster(0).await;
    let engine = engine(&cluster, Arc::new(MockHelper::new()));

    engine.setup_workers().await.unwrap();
    engine.setup_workers().await.unwrap();

    assert_eq!(cluster.status_writes().await, 1);
    let status = cluster.runtime(NAMESPACE, NAME).await.unwrap().status;
    assert_eq!(status.worker_phase, RuntimePhase::NotReady);
    assert_eq!(status.desired_worker_number_scheduled, 0);
    assert_eq!(status.current_worker_number_scheduled, 0);
    assert_eq!(status.conditions.len(), 1);
}

#[tokio::test]
async fn test_disabled_check_ready() {
    let cluster = cluster(0).await;
    let engine = engine(&cluster, Arc::new(MockHelper::new()));

    engine.setup_workers().await.unwrap();
    assert!(engine.check_workers_ready().await.unwrap());
    assert!(engine.check_workers_ready().await.unwrap());

    let status = cluster.runtime(NAMESPACE, NAME).await.unwrap().status;
    assert_eq!(status.worker_phase, RuntimePhase::Ready);
    let ready: Vec<_> = status
        .conditions
        .iter()
        .filter(|c| c.kind == WORKERS_READY)
        .collect();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].message, "The workers are ready.");
    assert_eq!(cluster.status_writes().await, 2);
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(3)]
#[tokio::test]
async fn test_setup_converges_after_conflicts(#[case] conflicts: u32) {
    let cluster = cluster(0).await;
    let engine = engine(&cluster, Arc::new(MockHelper::new()));
    cluster.inject_status_conflicts(conflicts).await;

    engine.setup_workers().await.unwrap();

    assert_eq!(cluster.status_write_attempts().await, conflicts + 1);
    assert_eq!(cluster.status_writes().await, 1);
}

#[tokio::test]
async fn test_setup_gives_up_when_conflicts_persist() {
    let cluster = cluster(0).await;
    let engine = engine(&cluster, Arc::new(MockHelper::new()));
    cluster.inject_status_conflicts(10).await;

    let err = engine.setup_workers().await.unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(cluster.status_write_attempts().await, 4);
    assert_eq!(cluster.status_writes().await, 0);
}

#[tokio::test]
async fn test_setup_surfaces_store_failure() {
    let cluster = cluster(0).await;
    let engine = engine(&cluster, Arc::new(MockHelper::new()));
    cluster
        .fail_next_status_write(ReconcileError::Transport("connection reset".into()))
        .await;

    let err = engine.setup_workers().await.unwrap_err();

    assert!(!err.is_conflict());
    assert!(err.to_string().contains("connection reset"));
    assert_eq!(cluster.status_write_attempts().await, 1);
}

#[tokio::test]
async fn test_enabled_path_delegates_to_helper() {
    let cluster = cluster(2).await;
    let helper = Arc::new(MockHelper::new());
    let engine = engine(&cluster, helper.clone());

    assert!(engine.should_setup_workers().await.unwrap());
    engine.setup_workers().await.unwrap();
    assert!(!engine.should_setup_workers().await.unwrap());
    assert_eq!(helper.setup_calls(), 1);

    let status = cluster.runtime(NAMESPACE, NAME).await.unwrap().status;
    assert_eq!(status.worker_phase, RuntimePhase::NotReady);
    assert_eq!(status.desired_worker_number_scheduled, 2);
    assert_eq!(status.current_worker_number_scheduled, 2);

    assert!(!engine.check_workers_ready().await.unwrap());
    cluster.put_worker_group(worker_group(2, 1)).await;
    assert!(!engine.check_workers_ready().await.unwrap());
    assert_eq!(
        cluster.runtime(NAMESPACE, NAME).await.unwrap().status.worker_phase,
        RuntimePhase::PartialReady
    );

    cluster.put_worker_group(worker_group(2, 2)).await;
    assert!(engine.check_workers_ready().await.unwrap());
    assert_eq!(helper.check_calls(), 3);

    let status = cluster.runtime(NAMESPACE, NAME).await.unwrap().status;
    assert_eq!(status.worker_phase, RuntimePhase::Ready);
    assert!(status.condition(WORKERS_READY).is_some());
}

#[tokio::test]
async fn test_disabled_path_skips_helper() {
    let cluster = cluster(0).await;
    let helper = Arc::new(MockHelper::failing());
    let engine = engine(&cluster, helper.clone());

    engine.setup_workers().await.unwrap();
    assert!(engine.check_workers_ready().await.unwrap());
    assert_eq!(helper.setup_calls(), 0);
    assert_eq!(helper.check_calls(), 0);
}

#[tokio::test]
async fn test_helper_failure_leaves_status_untouched() {
    let cluster = cluster(2).await;
    let engine = engine(&cluster, Arc::new(MockHelper::failing()));

    assert!(engine.setup_workers().await.is_err());
    assert!(engine.check_workers_ready().await.is_err());
    assert_eq!(cluster.status_write_attempts().await, 0);
    assert!(engine.should_setup_workers().await.unwrap());
}

#[tokio::test]
async fn test_missing_runtime_not_found() {
    let logs = LogCapture::default();
    let _guard = logs.install();
    let cluster = Arc::new(eac_controller::MemoryCluster::new());
    let engine = engine(&cluster, Arc::new(MockHelper::new()));

    assert!(engine.should_setup_workers().await.unwrap_err().is_not_found());

    let output = logs.contents();
    assert!(output.contains("Failed to get runtime"), "{output}");
    assert!(output.contains("name=demo"), "{output}");
}

#[tokio::test]
async fn test_other_conditions_kept_in_order() {
    let cluster = cluster(0).await;
    let mut seeded = runtime(0);
    seeded.status.upsert_condition(RuntimeCondition::new(
        "MasterReady",
        "Master is ready",
        "The master is ready.",
        ConditionStatus::True,
    ));
    cluster.put_runtime(seeded.clone()).await;
    let engine = engine(&cluster, Arc::new(MockHelper::new()));

    engine.setup_workers().await.unwrap();
    assert!(engine.check_workers_ready().await.unwrap());

    let status = cluster.runtime(NAMESPACE, NAME).await.unwrap().status;
    let kinds: Vec<&str> = status.conditions.iter().map(|c| c.kind.as_str()).collect();
    assert_eq!(kinds, vec!["MasterReady", WORKERS_INITIALIZED, WORKERS_READY]);
    assert_eq!(status.conditions[0], seeded.status.conditions[0]);
}

#[rstest]
#[case(1)]
#[case(2)]
#[tokio::test]
async fn test_check_ready_converges_after_conflicts(#[case] conflicts: u32) {
    let cluster = cluster(0).await;
    let engine = engine(&cluster, Arc::new(MockHelper::new()));
    engine.setup_workers().await.unwrap();
    let attempts_before = cluster.status_write_attempts().await;
    cluster.inject_status_conflicts(conflicts).await;

    assert!(engine.check_workers_ready().await.unwrap());

    assert_eq!(
        cluster.status_write_attempts().await - attempts_before,
        conflicts + 1
    );
    let status = cluster.runtime(NAMESPACE, NAME).await.unwrap().status;
    assert_eq!(status.worker_phase, RuntimePhase::Ready);
    assert!(status.condition(WORKERS_READY).is_some());
}

#[tokio::test]
async fn test_check_ready_gives_up_when_conflicts_persist() {
    let cluster = cluster(2).await;
    cluster.put_worker_group(worker_group(2, 2)).await;
    let engine = engine(&cluster, Arc::new(MockHelper::new()));
    engine.setup_workers().await.unwrap();
    let attempts_before = cluster.status_write_attempts().await;
    cluster.inject_status_conflicts(10).await;

    let err = engine.check_workers_ready().await.unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(cluster.status_write_attempts().await - attempts_before, 4);
    assert_eq!(
        cluster.runtime(NAMESPACE, NAME).await.unwrap().status.worker_phase,
        RuntimePhase::NotReady
    );
}
