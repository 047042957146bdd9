//! Deploy and upgrade lifecycle, short of any rollback.

mod common;

use common::*;
use streamops::config::KEY_SAVEPOINT_TIMEOUT;
use streamops::crd::{
    JobManagerDeploymentStatus, JobState, ReconciliationState, StreamDeploymentSpec, UpgradeMode,
};

#[tokio::test]
async fn first_deploy_submits_and_records_the_spec() {
    let cp = FakeControlPlane::new();
    let mut dep = application_deployment(3, UpgradeMode::Savepoint);

    turn(&cp, &mut dep).await;

    let submission = cp.last_submission();
    assert_eq!(submission.cluster.name, "pipeline");
    let job = submission.job.unwrap();
    assert_eq!(job.parallelism, 3);
    assert_eq!(job.savepoint_location, None);

    let status = dep.status.as_ref().unwrap();
    assert_eq!(
        status.job_manager_deployment_status,
        JobManagerDeploymentStatus::Deploying
    );
    assert_eq!(recon(&dep).state, ReconciliationState::Deployed);
    let snapshot: StreamDeploymentSpec = recon(&dep)
        .deserialize_last_reconciled_spec()
        .unwrap()
        .unwrap();
    assert_eq!(snapshot, dep.spec);
}

#[tokio::test]
async fn upgrade_runs_as_suspend_then_restore() {
    let cp = FakeControlPlane::new();
    let mut dep = application_deployment(2, UpgradeMode::Savepoint);
    turn(&cp, &mut dep).await;
    cp.make_ready();
    turn(&cp, &mut dep).await;

    dep.spec.job.as_mut().unwrap().parallelism = 6;

    // Suspend half: the committed snapshot carries the suspension marker
    turn(&cp, &mut dep).await;
    assert!(!cp.is_running());
    assert!(dep
        .status
        .as_ref()
        .unwrap()
        .job_status
        .as_ref()
        .unwrap()
        .state
        .as_deref()
        .map(|s| s == "SUSPENDED")
        .unwrap_or(false));
    let snapshot: StreamDeploymentSpec = recon(&dep)
        .deserialize_last_reconciled_spec()
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.job.as_ref().unwrap().state, JobState::Suspended);
    assert_eq!(snapshot.job.as_ref().unwrap().parallelism, 6);

    // Restore half: the new spec comes up from the recorded savepoint
    turn(&cp, &mut dep).await;
    assert!(cp.is_running());
    let job = cp.last_submission().job.unwrap();
    assert_eq!(job.parallelism, 6);
    assert_eq!(job.savepoint_location.as_deref(), Some("s3://savepoints/sp-1"));
}

#[tokio::test]
async fn deployment_created_suspended_submits_nothing() {
    let cp = FakeControlPlane::new();
    let mut dep = application_deployment(1, UpgradeMode::Savepoint);
    dep.spec.job.as_mut().unwrap().state = JobState::Suspended;

    turn(&cp, &mut dep).await;

    assert!(cp.submissions().is_empty());
    assert!(recon(&dep).is_last_reconciled_spec_stable());
    assert_eq!(recon(&dep).state, ReconciliationState::Deployed);
}

#[tokio::test]
async fn steady_state_turns_leave_the_cluster_alone() {
    let cp = FakeControlPlane::new();
    let mut dep = application_deployment(2, UpgradeMode::LastState);
    turn(&cp, &mut dep).await;
    cp.make_ready();
    turn(&cp, &mut dep).await;
    assert!(recon(&dep).is_last_reconciled_spec_stable());

    let calls = cp.mutating_calls();
    for _ in 0..3 {
        turn(&cp, &mut dep).await;
    }
    assert_eq!(cp.mutating_calls(), calls);
    assert_eq!(recon(&dep).state, ReconciliationState::Deployed);
    assert!(dep.status.as_ref().unwrap().error.is_none());
}

#[tokio::test]
async fn observer_mirrors_the_live_job() {
    let cp = FakeControlPlane::new();
    let mut dep = application_deployment(1, UpgradeMode::Savepoint);
    turn(&cp, &mut dep).await;
    cp.make_ready();
    turn(&cp, &mut dep).await;

    let status = dep.status.as_ref().unwrap();
    assert_eq!(
        status.job_manager_deployment_status,
        JobManagerDeploymentStatus::Ready
    );
    let job_status = status.job_status.as_ref().unwrap();
    assert_eq!(job_status.state.as_deref(), Some("RUNNING"));
    assert!(job_status.job_id.is_some());
}

#[tokio::test]
async fn restart_nonce_bump_redeploys_an_unchanged_spec() {
    let cp = FakeControlPlane::new();
    let mut dep = application_deployment(1, UpgradeMode::Stateless);
    turn(&cp, &mut dep).await;
    cp.make_ready();
    turn(&cp, &mut dep).await;

    dep.spec.restart_nonce = Some(1);
    turn(&cp, &mut dep).await; // suspend
    assert!(!cp.is_running());
    turn(&cp, &mut dep).await; // restore
    assert!(cp.is_running());
    assert_eq!(cp.submissions().len(), 2);
}

/// A savepoint that never completes aborts the upgrade before anything
/// is stopped; the old job keeps running and the turn surfaces the error.
#[tokio::test]
async fn savepoint_timeout_aborts_the_upgrade() {
    let cp = FakeControlPlane::new();
    let mut dep = application_deployment(1, UpgradeMode::Savepoint);
    dep.spec
        .engine_config
        .insert(KEY_SAVEPOINT_TIMEOUT.to_string(), "1".to_string());
    turn(&cp, &mut dep).await;
    cp.make_ready();
    turn(&cp, &mut dep).await;

    cp.hold_savepoints(true);
    dep.spec.job.as_mut().unwrap().parallelism = 8;
    turn(&cp, &mut dep).await;

    assert!(cp.is_running());
    assert_eq!(recon(&dep).state, ReconciliationState::Deployed);
    let error = dep.status.as_ref().unwrap().error.clone().unwrap();
    assert!(error.contains("savepoint"), "unexpected error: {error}");

    // The edit is still pending; a later turn retries the suspension
    let snapshot: StreamDeploymentSpec = recon(&dep)
        .deserialize_last_reconciled_spec()
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.job.as_ref().unwrap().parallelism, 1);

    cp.hold_savepoints(false);
    turn(&cp, &mut dep).await;
    assert!(!cp.is_running());
    let snapshot: StreamDeploymentSpec = recon(&dep)
        .deserialize_last_reconciled_spec()
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.job.as_ref().unwrap().parallelism, 8);
}
