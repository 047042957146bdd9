//! Rollback to the last stable spec
//!
//! Rollback runs in two phases over separate turns. The first turn only
//! flips the state machine to `RollingBack` and surfaces the diagnostic,
//! so the decision is durable before anything touches the cluster. A later
//! turn performs the actual teardown and resubmission of the stable spec.

use tracing::{info, warn};

use crate::config::OperatorConfig;
use crate::crd::{
    JobManagerDeploymentStatus, JobState, JobStatus, ReconciliationState, StreamDeployment,
    StreamDeploymentSpec, StreamDeploymentStatus,
};
use crate::error::Error;
use crate::service::{ClusterRef, ControlPlane};

use super::upgrade::restore_for;
use super::variant::variant_for;

/// Diagnostic recorded on the resource when a rollback is initiated
pub const ROLLBACK_MESSAGE: &str =
    "Deployment is not ready within the configured timeout, rolling back.";

/// Whether the observed status calls for a rollback.
///
/// Fires only from the settled `Deployed` state, when the applied spec has
/// not been promoted to stable within the readiness timeout and an earlier
/// stable spec exists to fall back to. A stable spec whose job is suspended
/// is never a target: rolling back onto it would start a job its own record
/// says must not run.
pub fn should_roll_back(
    config: &OperatorConfig,
    status: &StreamDeploymentStatus,
    now_millis: i64,
) -> Result<bool, Error> {
    if !config.rollback_enabled()? {
        return Ok(false);
    }
    let recon = &status.reconciliation_status;
    if recon.state != ReconciliationState::Deployed {
        return Ok(false);
    }
    if recon.is_last_reconciled_spec_stable() {
        return Ok(false);
    }
    let stable: Option<StreamDeploymentSpec> = recon.deserialize_last_stable_spec()?;
    let Some(stable) = stable else {
        return Ok(false);
    };
    // A suspended stable spec is not a runnable fallback; resubmitting it
    // as a live job would contradict the very state it records. Resuming
    // jobs get as long as they need to become ready.
    if stable
        .job
        .as_ref()
        .is_some_and(|j| j.state == JobState::Suspended)
    {
        return Ok(false);
    }
    let timeout_ms = config.readiness_timeout()?.as_millis() as i64;
    Ok(now_millis - recon.reconciliation_timestamp > timeout_ms)
}

/// Flip the state machine into `RollingBack` and record the diagnostic.
/// Touches only status, never the cluster.
pub fn initiate_roll_back(dep: &mut StreamDeployment) {
    let status = dep.status_mut();
    status.reconciliation_status.state = ReconciliationState::RollingBack;
    status.error = Some(ROLLBACK_MESSAGE.to_string());
    warn!(
        deployment = %dep.metadata.name.as_deref().unwrap_or_default(),
        "readiness timeout exceeded, initiating rollback"
    );
}

/// Tear down whatever is running and resubmit the last stable spec.
///
/// The stable spec's own upgrade mode decides what the restored job resumes
/// from, reusing the savepoint recorded when the stable job was suspended.
/// `last_reconciled_spec` is deliberately left pointing at the failed spec:
/// the user's edit remains visible as unapplied, and the state machine
/// settles in `RolledBack`.
pub async fn execute_rollback(
    control_plane: &dyn ControlPlane,
    resource: &ClusterRef,
    dep: &mut StreamDeployment,
    defaults: &crate::crd::EngineConfig,
) -> Result<(), Error> {
    let stable: StreamDeploymentSpec = dep
        .status_mut()
        .reconciliation_status
        .deserialize_last_stable_spec()?
        .ok_or_else(|| Error::corrupt_state("rolling back without a stable spec on record"))?;

    let config = OperatorConfig::resolve(defaults, &stable.engine_config);
    let variant = variant_for(stable.cluster_type);
    let cluster = variant.target_cluster(resource, &stable)?;

    variant
        .stop(control_plane, &cluster, dep, false, config.shutdown_timeout()?)
        .await?;

    let restore = match &stable.job {
        Some(job) => {
            let savepoints = dep.job_status_mut().savepoint_info.clone();
            restore_for(job.upgrade_mode, &savepoints)
        }
        None => super::variant::RestoreFrom::Empty,
    };
    let submitted = variant
        .submit(control_plane, &cluster, &stable, config.entries(), restore)
        .await?;

    let status = dep.status_mut();
    status.job_manager_deployment_status = JobManagerDeploymentStatus::Deploying;
    if stable.job.is_some() {
        let job_status = status.job_status.get_or_insert_with(JobStatus::default);
        job_status.state = Some(JobStatus::RECONCILING.to_string());
        job_status.job_id = submitted;
    }
    status.reconciliation_status.state = ReconciliationState::RolledBack;
    status.error = None;
    info!(cluster = %cluster, "rolled back to last stable spec");
    Ok(())
}
