//! Control plane abstraction
//!
//! The reconciler never talks to a live cluster directly; everything goes
//! through [`ControlPlane`] so tests can swap in a fake and upgrade logic
//! stays independent of the wire protocol.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::crd::ClusterType;
use crate::error::Error;

pub mod rest;

/// Namespaced identity of a managed cluster
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClusterRef {
    pub namespace: String,
    pub name: String,
}

impl ClusterRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Job payload attached to a cluster submission
#[derive(Clone, Debug, PartialEq)]
pub struct JobSubmission {
    pub artifact: String,
    pub parallelism: i32,
    /// Restore the job from this savepoint location
    pub savepoint_location: Option<String>,
    /// Ask the cluster to recover from its latest retained checkpoint
    pub recover_from_latest_checkpoint: bool,
}

/// Everything the control plane needs to bring up a cluster
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterSubmission {
    pub cluster: ClusterRef,
    pub cluster_type: ClusterType,
    pub config: BTreeMap<String, String>,
    pub job: Option<JobSubmission>,
}

/// Live job as reported by the control plane
#[derive(Clone, Debug, PartialEq)]
pub struct JobDetails {
    pub job_id: String,
    pub state: String,
}

/// Handle for a savepoint operation in flight
#[derive(Clone, Debug, PartialEq)]
pub struct SavepointHandle {
    pub cluster: ClusterRef,
    pub job_id: String,
    pub trigger_id: String,
}

/// Outcome of polling a triggered savepoint
#[derive(Clone, Debug, PartialEq)]
pub enum SavepointFetchStatus {
    Pending,
    Completed(String),
    Failed(String),
}

/// Observed health of the cluster's job manager
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterHealth {
    Deploying,
    Ready,
    Error,
    Missing,
}

/// Operations the reconciler performs against a live cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Bring up a cluster, submitting its job when one is attached
    async fn submit(&self, submission: &ClusterSubmission) -> Result<(), Error>;

    /// Tear down a cluster; `drain` asks running jobs to finish in-flight
    /// work before stopping
    async fn stop(&self, cluster: &ClusterRef, drain: bool, timeout: Duration)
        -> Result<(), Error>;

    /// Submit a job to an already-running cluster; returns the job id
    async fn submit_job(&self, cluster: &ClusterRef, job: &JobSubmission)
        -> Result<String, Error>;

    /// Cancel one job, leaving its cluster running
    async fn cancel_job(
        &self,
        cluster: &ClusterRef,
        job_id: &str,
        drain: bool,
        timeout: Duration,
    ) -> Result<(), Error>;

    /// Jobs currently known to the cluster
    async fn list_jobs(&self, cluster: &ClusterRef) -> Result<Vec<JobDetails>, Error>;

    /// Trigger a savepoint for the given job
    async fn trigger_savepoint(
        &self,
        cluster: &ClusterRef,
        job_id: &str,
        target_dir: Option<String>,
    ) -> Result<SavepointHandle, Error>;

    /// Check whether a triggered savepoint has completed
    async fn poll_savepoint(&self, handle: &SavepointHandle)
        -> Result<SavepointFetchStatus, Error>;

    /// Health of the cluster's job manager deployment
    async fn get_cluster_health(&self, cluster: &ClusterRef) -> Result<ClusterHealth, Error>;
}
