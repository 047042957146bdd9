//! Cluster variant behavior
//!
//! Application clusters, session clusters, and session jobs share one
//! reconcile loop; the pieces that differ (submission target, what a
//! submission carries, what counts as healthy) live behind
//! [`ClusterVariant`] so the engine stays free of type checks.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::crd::{
    ClusterType, JobManagerDeploymentStatus, JobState, JobStatus, StreamDeployment,
    StreamDeploymentSpec,
};
use crate::error::Error;
use crate::service::{ClusterRef, ClusterSubmission, ControlPlane, JobSubmission};

/// Where a submitted job resumes from
#[derive(Clone, Debug, PartialEq)]
pub enum RestoreFrom {
    /// Restore from an explicit savepoint location
    Savepoint(String),
    /// Let the cluster recover from its latest retained checkpoint
    LatestCheckpoint,
    /// Start with empty state
    Empty,
}

/// Behavior that differs between the deployment variants
#[async_trait]
pub trait ClusterVariant: Send + Sync {
    /// Whether this variant carries a job whose lifecycle we manage
    fn is_job_oriented(&self) -> bool;

    /// The cluster control-plane calls are aimed at. For most variants
    /// that is the resource's own cluster; session jobs target the
    /// session cluster their spec references.
    fn target_cluster(
        &self,
        resource: &ClusterRef,
        spec: &StreamDeploymentSpec,
    ) -> Result<ClusterRef, Error> {
        let _ = spec;
        Ok(resource.clone())
    }

    /// Whether the observed status qualifies the current spec as healthy
    fn observed_healthy(&self, dep: &StreamDeployment) -> Result<bool, Error>;

    /// Bring up what the spec describes. Returns the job id when the
    /// submission creates a job whose identity is known immediately.
    async fn submit(
        &self,
        control_plane: &dyn ControlPlane,
        cluster: &ClusterRef,
        spec: &StreamDeploymentSpec,
        config: &crate::crd::EngineConfig,
        restore: RestoreFrom,
    ) -> Result<Option<String>, Error>;

    /// Tear down what this variant manages: the whole cluster, or just
    /// the tracked job for session jobs
    async fn stop(
        &self,
        control_plane: &dyn ControlPlane,
        cluster: &ClusterRef,
        dep: &StreamDeployment,
        drain: bool,
        timeout: Duration,
    ) -> Result<(), Error>;
}

/// Resolve the variant for a cluster type
pub fn variant_for(cluster_type: ClusterType) -> &'static dyn ClusterVariant {
    match cluster_type {
        ClusterType::Application => &ApplicationVariant,
        ClusterType::Session => &SessionVariant,
        ClusterType::SessionJob => &SessionJobVariant,
    }
}

/// Dedicated cluster running a single managed job
pub struct ApplicationVariant;

/// Standalone cluster with no managed job
pub struct SessionVariant;

/// Managed job running on a session cluster owned by another resource
pub struct SessionJobVariant;

fn job_submission(job: &crate::crd::JobSpec, restore: RestoreFrom) -> JobSubmission {
    let (savepoint_location, from_checkpoint) = match restore {
        RestoreFrom::Savepoint(location) => (Some(location), false),
        RestoreFrom::LatestCheckpoint => (None, true),
        RestoreFrom::Empty => (None, false),
    };
    JobSubmission {
        artifact: job.artifact.clone(),
        parallelism: job.parallelism,
        savepoint_location,
        recover_from_latest_checkpoint: from_checkpoint,
    }
}

/// Health of a deployment whose reconciled spec carries a managed job
fn managed_job_healthy(dep: &StreamDeployment) -> Result<bool, Error> {
    let Some(status) = &dep.status else {
        return Ok(false);
    };
    let reconciled: Option<StreamDeploymentSpec> = status
        .reconciliation_status
        .deserialize_last_reconciled_spec()?;
    let Some(reconciled) = reconciled else {
        return Ok(false);
    };
    let desired_state = reconciled
        .job
        .as_ref()
        .map(|j| j.state)
        .unwrap_or_default();
    let job_state = status
        .job_status
        .as_ref()
        .and_then(|j| j.state.as_deref())
        .unwrap_or_default();
    let healthy = match desired_state {
        JobState::Running => {
            status.job_manager_deployment_status == JobManagerDeploymentStatus::Ready
                && job_state == JobStatus::RUNNING
        }
        // A suspension is promoted when it commits, not by observation;
        // mid-upgrade suspensions must never count as healthy
        JobState::Suspended => false,
    };
    Ok(healthy)
}

#[async_trait]
impl ClusterVariant for ApplicationVariant {
    fn is_job_oriented(&self) -> bool {
        true
    }

    fn observed_healthy(&self, dep: &StreamDeployment) -> Result<bool, Error> {
        managed_job_healthy(dep)
    }

    async fn submit(
        &self,
        control_plane: &dyn ControlPlane,
        cluster: &ClusterRef,
        spec: &StreamDeploymentSpec,
        config: &crate::crd::EngineConfig,
        restore: RestoreFrom,
    ) -> Result<Option<String>, Error> {
        let job = spec
            .job
            .as_ref()
            .ok_or_else(|| Error::validation("application deployment has no job"))?;
        debug!(cluster = %cluster, artifact = %job.artifact, "submitting application cluster");
        control_plane
            .submit(&ClusterSubmission {
                cluster: cluster.clone(),
                cluster_type: ClusterType::Application,
                config: config.clone(),
                job: Some(job_submission(job, restore)),
            })
            .await?;
        // The job id is only observable once the cluster is up
        Ok(None)
    }

    async fn stop(
        &self,
        control_plane: &dyn ControlPlane,
        cluster: &ClusterRef,
        _dep: &StreamDeployment,
        drain: bool,
        timeout: Duration,
    ) -> Result<(), Error> {
        control_plane.stop(cluster, drain, timeout).await
    }
}

#[async_trait]
impl ClusterVariant for SessionVariant {
    fn is_job_oriented(&self) -> bool {
        false
    }

    fn observed_healthy(&self, dep: &StreamDeployment) -> Result<bool, Error> {
        Ok(dep
            .status
            .as_ref()
            .map(|s| s.job_manager_deployment_status == JobManagerDeploymentStatus::Ready)
            .unwrap_or(false))
    }

    async fn submit(
        &self,
        control_plane: &dyn ControlPlane,
        cluster: &ClusterRef,
        _spec: &StreamDeploymentSpec,
        config: &crate::crd::EngineConfig,
        _restore: RestoreFrom,
    ) -> Result<Option<String>, Error> {
        debug!(cluster = %cluster, "submitting session cluster");
        control_plane
            .submit(&ClusterSubmission {
                cluster: cluster.clone(),
                cluster_type: ClusterType::Session,
                config: config.clone(),
                job: None,
            })
            .await?;
        Ok(None)
    }

    async fn stop(
        &self,
        control_plane: &dyn ControlPlane,
        cluster: &ClusterRef,
        _dep: &StreamDeployment,
        drain: bool,
        timeout: Duration,
    ) -> Result<(), Error> {
        // Externally submitted jobs are not operator-managed, nothing to drain
        control_plane.stop(cluster, drain, timeout).await
    }
}

#[async_trait]
impl ClusterVariant for SessionJobVariant {
    fn is_job_oriented(&self) -> bool {
        true
    }

    fn target_cluster(
        &self,
        resource: &ClusterRef,
        spec: &StreamDeploymentSpec,
    ) -> Result<ClusterRef, Error> {
        let session = spec
            .session_cluster
            .as_deref()
            .ok_or_else(|| Error::validation("session job references no session cluster"))?;
        Ok(ClusterRef::new(resource.namespace.clone(), session))
    }

    fn observed_healthy(&self, dep: &StreamDeployment) -> Result<bool, Error> {
        managed_job_healthy(dep)
    }

    async fn submit(
        &self,
        control_plane: &dyn ControlPlane,
        cluster: &ClusterRef,
        spec: &StreamDeploymentSpec,
        _config: &crate::crd::EngineConfig,
        restore: RestoreFrom,
    ) -> Result<Option<String>, Error> {
        let job = spec
            .job
            .as_ref()
            .ok_or_else(|| Error::validation("session job has no job definition"))?;
        debug!(cluster = %cluster, artifact = %job.artifact, "submitting session job");
        let job_id = control_plane
            .submit_job(cluster, &job_submission(job, restore))
            .await?;
        Ok(Some(job_id))
    }

    async fn stop(
        &self,
        control_plane: &dyn ControlPlane,
        cluster: &ClusterRef,
        dep: &StreamDeployment,
        drain: bool,
        timeout: Duration,
    ) -> Result<(), Error> {
        // Only the tracked job is ours; the session cluster it runs on
        // belongs to another resource and stays up
        let job_id = dep
            .status
            .as_ref()
            .and_then(|s| s.job_status.as_ref())
            .and_then(|j| j.job_id.as_deref());
        match job_id {
            Some(job_id) => control_plane.cancel_job(cluster, job_id, drain, timeout).await,
            None => {
                debug!(cluster = %cluster, "no tracked job to cancel");
                Ok(())
            }
        }
    }
}
