//! Job upgrade mechanics
//!
//! Upgrades are split across reconcile turns: one turn suspends the running
//! job (taking a savepoint when the mode asks for one), the next observes
//! the recorded suspension and resubmits with the new spec. Each half is a
//! small set of free functions driven by the engine in `mod.rs`.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::OperatorConfig;
use crate::crd::{JobStatus, Savepoint, SavepointInfo, StreamDeployment, UpgradeMode};
use crate::error::Error;
use crate::now_millis;
use crate::service::{ClusterRef, ControlPlane, SavepointFetchStatus};

use super::variant::{ClusterVariant, RestoreFrom};

const SAVEPOINT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Stop the managed job ahead of applying a new spec.
///
/// The upgrade mode of the incoming spec decides how state is preserved:
/// `Savepoint` takes and records an explicit savepoint and drains, the
/// other modes stop immediately and rely on retained checkpoints or none.
/// On success the observed job state is set to the suspended marker.
pub async fn suspend_job(
    control_plane: &dyn ControlPlane,
    variant: &dyn ClusterVariant,
    cluster: &ClusterRef,
    dep: &mut StreamDeployment,
    config: &OperatorConfig,
    upgrade_mode: UpgradeMode,
) -> Result<(), Error> {
    let drain = match upgrade_mode {
        UpgradeMode::Savepoint => {
            let savepoint = take_savepoint(control_plane, cluster, dep, config).await?;
            dep.job_status_mut().savepoint_info.record(savepoint);
            true
        }
        UpgradeMode::LastState | UpgradeMode::Stateless => false,
    };
    variant
        .stop(control_plane, cluster, dep, drain, config.shutdown_timeout()?)
        .await?;
    let job_status = dep.job_status_mut();
    job_status.state = Some(JobStatus::SUSPENDED.to_string());
    job_status.job_id = None;
    info!(cluster = %cluster, mode = %upgrade_mode, "job suspended");
    Ok(())
}

/// Decide what a resubmitted job resumes from, per the upgrade mode of the
/// spec being applied.
pub fn restore_for(upgrade_mode: UpgradeMode, savepoints: &SavepointInfo) -> RestoreFrom {
    match upgrade_mode {
        UpgradeMode::Savepoint => match &savepoints.last_savepoint {
            Some(sp) => RestoreFrom::Savepoint(sp.location.clone()),
            None => {
                warn!("savepoint upgrade requested but no savepoint recorded, starting empty");
                RestoreFrom::Empty
            }
        },
        UpgradeMode::LastState => RestoreFrom::LatestCheckpoint,
        UpgradeMode::Stateless => RestoreFrom::Empty,
    }
}

/// Trigger a savepoint for the live job and wait for it to land.
async fn take_savepoint(
    control_plane: &dyn ControlPlane,
    cluster: &ClusterRef,
    dep: &StreamDeployment,
    config: &OperatorConfig,
) -> Result<Savepoint, Error> {
    let job_id = match dep
        .status
        .as_ref()
        .and_then(|s| s.job_status.as_ref())
        .and_then(|j| j.job_id.clone())
    {
        Some(id) => id,
        None => {
            // Status may lag the live cluster, ask it directly
            let jobs = control_plane.list_jobs(cluster).await?;
            jobs.into_iter()
                .map(|j| j.job_id)
                .next()
                .ok_or_else(|| Error::control_plane("no live job to savepoint"))?
        }
    };

    let timeout = config.savepoint_timeout()?;
    let target_dir = config.savepoint_dir().map(str::to_string);
    let triggered_at = now_millis();
    let handle = control_plane
        .trigger_savepoint(cluster, &job_id, target_dir)
        .await?;
    debug!(cluster = %cluster, job_id = %job_id, trigger_id = %handle.trigger_id, "savepoint triggered");

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match control_plane.poll_savepoint(&handle).await? {
            SavepointFetchStatus::Completed(location) => {
                info!(cluster = %cluster, job_id = %job_id, location = %location, "savepoint completed");
                return Ok(Savepoint::completed_now(location, triggered_at));
            }
            SavepointFetchStatus::Failed(reason) => {
                return Err(Error::control_plane(format!(
                    "savepoint for job {job_id} failed: {reason}"
                )));
            }
            SavepointFetchStatus::Pending => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(Error::SavepointTimeout {
                        job_id,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                tokio::time::sleep(SAVEPOINT_POLL_INTERVAL).await;
            }
        }
    }
}
