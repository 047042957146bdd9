//! Reconciliation engine
//!
//! One `reconcile` call is a single turn: it looks at the desired spec and
//! the status snapshots and performs at most one state-changing action.
//! Multi-step flows (upgrades, rollbacks) progress one phase per turn, so
//! every phase boundary is durable in status before the next one runs.

use std::sync::Arc;

use tracing::{error, info};

pub mod rollback;
pub mod upgrade;
pub mod variant;

use crate::config::OperatorConfig;
use crate::crd::{
    EngineConfig, JobManagerDeploymentStatus, JobState, JobStatus, ReconciliationState,
    StreamDeployment, StreamDeploymentSpec,
};
use crate::error::Error;
use crate::now_millis;
use crate::observer::Observer;
use crate::service::{ClusterRef, ControlPlane};
use variant::{variant_for, ClusterVariant, RestoreFrom};

/// Drives a StreamDeployment toward its desired spec, one turn at a time
pub struct Reconciler {
    control_plane: Arc<dyn ControlPlane>,
    defaults: EngineConfig,
}

/// Namespaced identity of the cluster backing a deployment
pub fn cluster_ref(dep: &StreamDeployment) -> Result<ClusterRef, Error> {
    let name = dep
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::validation("deployment has no name"))?;
    let namespace = dep.metadata.namespace.as_deref().unwrap_or("default");
    Ok(ClusterRef::new(namespace, name))
}

impl Reconciler {
    pub fn new(control_plane: Arc<dyn ControlPlane>, defaults: EngineConfig) -> Self {
        Self {
            control_plane,
            defaults,
        }
    }

    /// Run one reconcile turn.
    ///
    /// Branch order matters: an in-flight rollback is finished before any
    /// user edit is considered, a first deploy precedes spec comparison,
    /// and the rollback decision runs only when nothing else changed.
    pub async fn reconcile(&self, dep: &mut StreamDeployment) -> Result<(), Error> {
        let resource = cluster_ref(dep)?;
        let config = OperatorConfig::resolve(&self.defaults, &dep.spec.engine_config);
        let variant = variant_for(dep.spec.cluster_type);
        let cluster = variant.target_cluster(&resource, &dep.spec)?;

        if dep.reconciliation_state() == ReconciliationState::RollingBack {
            return rollback::execute_rollback(
                self.control_plane.as_ref(),
                &resource,
                dep,
                &self.defaults,
            )
            .await;
        }

        let reconciled: Option<StreamDeploymentSpec> = dep
            .status_mut()
            .reconciliation_status
            .deserialize_last_reconciled_spec()?;

        match reconciled {
            None => self.first_deploy(variant, &cluster, dep, &config).await,
            Some(prev) if prev != dep.spec => {
                self.upgrade(variant, &cluster, dep, &prev, &config).await
            }
            Some(_) => {
                if rollback::should_roll_back(&config, dep.status_mut(), now_millis())? {
                    rollback::initiate_roll_back(dep);
                }
                Ok(())
            }
        }
    }

    async fn first_deploy(
        &self,
        variant: &dyn ClusterVariant,
        cluster: &ClusterRef,
        dep: &mut StreamDeployment,
        config: &OperatorConfig,
    ) -> Result<(), Error> {
        let desired = dep.spec.clone();
        let desired_state = desired.job.as_ref().map(|j| j.state).unwrap_or_default();

        if variant.is_job_oriented() && desired_state == JobState::Suspended {
            // Nothing to run yet, record the suspension as applied and stable
            dep.job_status_mut().state = Some(JobStatus::SUSPENDED.to_string());
            commit(dep, &desired)?;
            dep.status_mut().reconciliation_status.mark_stable();
            return Ok(());
        }

        info!(cluster = %cluster, cluster_type = %desired.cluster_type, "first deploy");
        let submitted = variant
            .submit(
                self.control_plane.as_ref(),
                cluster,
                &desired,
                config.entries(),
                RestoreFrom::Empty,
            )
            .await?;

        let status = dep.status_mut();
        status.job_manager_deployment_status = JobManagerDeploymentStatus::Deploying;
        if variant.is_job_oriented() {
            let job_status = status.job_status.get_or_insert_with(JobStatus::default);
            job_status.state = Some(JobStatus::RECONCILING.to_string());
            job_status.job_id = submitted;
        }
        commit(dep, &desired)
    }

    async fn upgrade(
        &self,
        variant: &dyn ClusterVariant,
        cluster: &ClusterRef,
        dep: &mut StreamDeployment,
        prev: &StreamDeploymentSpec,
        config: &OperatorConfig,
    ) -> Result<(), Error> {
        dep.status_mut().reconciliation_status.state = ReconciliationState::Upgrading;
        let desired = dep.spec.clone();

        if !variant.is_job_oriented() {
            // Session clusters carry no job state, replace in one turn
            info!(cluster = %cluster, "replacing session cluster");
            variant
                .stop(
                    self.control_plane.as_ref(),
                    cluster,
                    dep,
                    false,
                    config.shutdown_timeout()?,
                )
                .await?;
            variant
                .submit(
                    self.control_plane.as_ref(),
                    cluster,
                    &desired,
                    config.entries(),
                    RestoreFrom::Empty,
                )
                .await?;
            dep.status_mut().job_manager_deployment_status =
                JobManagerDeploymentStatus::Deploying;
            return commit(dep, &desired);
        }

        let desired_job = desired
            .job
            .as_ref()
            .ok_or_else(|| Error::validation("application deployment has no job"))?;
        let prev_state = prev.job.as_ref().map(|j| j.state).unwrap_or_default();

        if prev_state == JobState::Running {
            // Suspend half: stop the old job per the incoming upgrade mode
            // and record the suspension as the applied spec. The restore
            // half runs next turn through the spec-changed branch.
            info!(cluster = %cluster, mode = %desired_job.upgrade_mode, "upgrade: suspending job");
            upgrade::suspend_job(
                self.control_plane.as_ref(),
                variant,
                cluster,
                dep,
                config,
                desired_job.upgrade_mode,
            )
            .await?;
            let mut suspended = desired.clone();
            if let Some(job) = suspended.job.as_mut() {
                job.state = JobState::Suspended;
            }
            commit(dep, &suspended)?;
            if desired_job.state == JobState::Suspended {
                // The user asked for the suspension itself, that is the goal
                dep.status_mut().reconciliation_status.mark_stable();
            }
            return Ok(());
        }

        if desired_job.state == JobState::Suspended {
            // Already suspended and staying suspended, just adopt the edit
            commit(dep, &desired)?;
            dep.status_mut().reconciliation_status.mark_stable();
            return Ok(());
        }

        // Restore half: the old job is down, bring up the new spec
        let restore = restore_for_restart(dep, desired_job.upgrade_mode);
        info!(cluster = %cluster, mode = %desired_job.upgrade_mode, "upgrade: restoring job");
        let submitted = variant
            .submit(
                self.control_plane.as_ref(),
                cluster,
                &desired,
                config.entries(),
                restore,
            )
            .await?;

        let status = dep.status_mut();
        status.job_manager_deployment_status = JobManagerDeploymentStatus::Deploying;
        let job_status = status.job_status.get_or_insert_with(JobStatus::default);
        job_status.state = Some(JobStatus::RECONCILING.to_string());
        job_status.job_id = submitted;
        commit(dep, &desired)
    }
}

fn restore_for_restart(dep: &StreamDeployment, mode: crate::crd::UpgradeMode) -> RestoreFrom {
    let savepoints = dep
        .status
        .as_ref()
        .and_then(|s| s.job_status.as_ref())
        .map(|j| j.savepoint_info.clone())
        .unwrap_or_default();
    upgrade::restore_for(mode, &savepoints)
}

/// Snapshot the applied spec and clear any stale error
fn commit(dep: &mut StreamDeployment, applied: &StreamDeploymentSpec) -> Result<(), Error> {
    let status = dep.status_mut();
    status.reconciliation_status.commit_spec(applied)?;
    status.error = None;
    Ok(())
}

/// Observe, then reconcile, catching errors at the turn boundary.
///
/// Failures land in `status.error` instead of propagating; a transient
/// `Upgrading` marker never survives a failed turn.
pub async fn run_turn(observer: &Observer, reconciler: &Reconciler, dep: &mut StreamDeployment) {
    let name = dep.metadata.name.clone().unwrap_or_default();

    if let Err(err) = observer.observe(dep).await {
        error!(deployment = %name, error = %err, "observe failed");
        dep.status_mut().error = Some(err.to_string());
        return;
    }

    let prior = dep.reconciliation_state();
    if let Err(err) = reconciler.reconcile(dep).await {
        error!(deployment = %name, error = %err, "reconcile failed");
        let status = dep.status_mut();
        if status.reconciliation_status.state == ReconciliationState::Upgrading {
            status.reconciliation_status.state = if prior == ReconciliationState::Upgrading {
                ReconciliationState::Deployed
            } else {
                prior
            };
        }
        status.error = Some(err.to_string());
    }
}
