//! Cluster observation
//!
//! Refreshes observed status from the control plane before each reconcile
//! turn and promotes the reconciled spec to stable once it proves healthy.
//! Promotion is the only path by which `last_stable_spec` advances.

use std::sync::Arc;

use tracing::{debug, info};

use crate::crd::{JobManagerDeploymentStatus, ReconciliationState, StreamDeployment};
use crate::error::Error;
use crate::reconciler::cluster_ref;
use crate::reconciler::variant::variant_for;
use crate::service::{ClusterHealth, ControlPlane};

pub struct Observer {
    control_plane: Arc<dyn ControlPlane>,
}

impl Observer {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }

    /// Refresh observed state for one deployment.
    ///
    /// Does nothing before the first reconcile; there is no cluster to
    /// observe until a spec has been applied.
    pub async fn observe(&self, dep: &mut StreamDeployment) -> Result<(), Error> {
        if !dep.was_reconciled() {
            return Ok(());
        }
        let variant = variant_for(dep.spec.cluster_type);
        let cluster = variant.target_cluster(&cluster_ref(dep)?, &dep.spec)?;

        let health = self.control_plane.get_cluster_health(&cluster).await?;
        dep.status_mut().job_manager_deployment_status = match health {
            ClusterHealth::Deploying => JobManagerDeploymentStatus::Deploying,
            ClusterHealth::Ready => JobManagerDeploymentStatus::Ready,
            ClusterHealth::Error => JobManagerDeploymentStatus::Error,
            ClusterHealth::Missing => JobManagerDeploymentStatus::Missing,
        };

        if variant.is_job_oriented()
            && health == ClusterHealth::Ready
            && !dep.job_status_mut().is_suspended()
        {
            let jobs = self.control_plane.list_jobs(&cluster).await?;
            // A tracked id pins the lookup; session clusters carry jobs
            // belonging to other resources
            let known = dep
                .status
                .as_ref()
                .and_then(|s| s.job_status.as_ref())
                .and_then(|j| j.job_id.clone());
            let observed = match &known {
                Some(id) => jobs.into_iter().find(|j| &j.job_id == id),
                None => jobs.into_iter().next(),
            };
            if let Some(job) = observed {
                debug!(cluster = %cluster, job_id = %job.job_id, state = %job.state, "observed job");
                let job_status = dep.job_status_mut();
                job_status.state = Some(job.state);
                job_status.job_id = Some(job.job_id);
            }
        }

        self.promote_if_stable(dep)?;
        Ok(())
    }

    /// Promote the reconciled spec to stable once it is observed healthy.
    /// Only the settled `Deployed` state qualifies; a spec applied by a
    /// rollback stays in `RolledBack` and is never re-promoted here.
    fn promote_if_stable(&self, dep: &mut StreamDeployment) -> Result<(), Error> {
        let recon = &dep
            .status
            .as_ref()
            .ok_or_else(|| Error::corrupt_state("reconciled deployment has no status"))?
            .reconciliation_status;
        if recon.state != ReconciliationState::Deployed || recon.is_last_reconciled_spec_stable() {
            return Ok(());
        }

        let variant = variant_for(dep.spec.cluster_type);
        if variant.observed_healthy(dep)? {
            let name = dep.metadata.name.clone().unwrap_or_default();
            let status = dep.status_mut();
            status.reconciliation_status.mark_stable();
            status.error = None;
            info!(deployment = %name, "reconciled spec promoted to stable");
        }
        Ok(())
    }
}
