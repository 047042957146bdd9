//! Shared test harness: an in-memory control plane and deployment builders

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use streamops::config::{KEY_READINESS_TIMEOUT, KEY_ROLLBACK_ENABLED, KEY_SAVEPOINT_TIMEOUT};
use streamops::crd::{
    ClusterType, JobSpec, JobState, StreamDeployment, StreamDeploymentSpec, UpgradeMode,
};
use streamops::error::Error;
use streamops::observer::Observer;
use streamops::reconciler::{run_turn, Reconciler};
use streamops::service::{
    ClusterHealth, ClusterRef, ClusterSubmission, ControlPlane, JobDetails, JobSubmission,
    SavepointFetchStatus, SavepointHandle,
};

/// Readiness timeout used by rollback scenarios, in milliseconds
pub const TEST_READINESS_TIMEOUT_MS: u64 = 100;

#[derive(Default)]
struct Inner {
    running: bool,
    ready: bool,
    jobs: Vec<JobDetails>,
    submissions: Vec<ClusterSubmission>,
    job_submissions: Vec<JobSubmission>,
    job_counter: u32,
    cancels: u32,
    stops: u32,
    savepoint_counter: u32,
    pending_savepoints: HashMap<String, String>,
    fail_submits: bool,
    hold_savepoints: bool,
    hold_jobs: bool,
}

/// In-memory stand-in for a live cluster manager.
///
/// Tracks one cluster: submissions bring it up with its job, stops tear it
/// down. Readiness is a switch the test flips, so readiness-timeout paths
/// can be exercised deterministically.
#[derive(Default)]
pub struct FakeControlPlane {
    inner: Mutex<Inner>,
}

impl FakeControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Flip the cluster to healthy; the next observation sees Ready
    pub fn make_ready(&self) {
        self.lock().ready = true;
    }

    pub fn make_unready(&self) {
        self.lock().ready = false;
    }

    /// Make every submission fail until cleared
    pub fn fail_submits(&self, fail: bool) {
        self.lock().fail_submits = fail;
    }

    /// Keep triggered savepoints pending forever
    pub fn hold_savepoints(&self, hold: bool) {
        self.lock().hold_savepoints = hold;
    }

    /// Leave newly submitted session jobs initializing instead of running
    pub fn hold_jobs(&self, hold: bool) {
        self.lock().hold_jobs = hold;
    }

    pub fn submissions(&self) -> Vec<ClusterSubmission> {
        self.lock().submissions.clone()
    }

    pub fn last_submission(&self) -> ClusterSubmission {
        self.lock()
            .submissions
            .last()
            .cloned()
            .expect("no submission recorded")
    }

    pub fn job_submissions(&self) -> Vec<JobSubmission> {
        self.lock().job_submissions.clone()
    }

    pub fn last_job_submission(&self) -> JobSubmission {
        self.lock()
            .job_submissions
            .last()
            .cloned()
            .expect("no job submission recorded")
    }

    /// Count of calls that change cluster state
    pub fn mutating_calls(&self) -> u32 {
        let inner = self.lock();
        inner.submissions.len() as u32
            + inner.job_submissions.len() as u32
            + inner.stops
            + inner.cancels
            + inner.savepoint_counter
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn submit(&self, submission: &ClusterSubmission) -> Result<(), Error> {
        let mut inner = self.lock();
        if inner.fail_submits {
            return Err(Error::control_plane("submission refused"));
        }
        inner.submissions.push(submission.clone());
        inner.running = true;
        let job_id = format!("job-{}", inner.submissions.len());
        inner.jobs = submission
            .job
            .iter()
            .map(|_| JobDetails {
                job_id: job_id.clone(),
                state: "RUNNING".to_string(),
            })
            .collect();
        Ok(())
    }

    async fn stop(
        &self,
        _cluster: &ClusterRef,
        _drain: bool,
        _timeout: Duration,
    ) -> Result<(), Error> {
        let mut inner = self.lock();
        inner.running = false;
        inner.ready = false;
        inner.jobs.clear();
        inner.stops += 1;
        Ok(())
    }

    async fn submit_job(
        &self,
        _cluster: &ClusterRef,
        job: &JobSubmission,
    ) -> Result<String, Error> {
        let mut inner = self.lock();
        if inner.fail_submits {
            return Err(Error::control_plane("submission refused"));
        }
        inner.job_counter += 1;
        let job_id = format!("sj-{}", inner.job_counter);
        let state = if inner.hold_jobs {
            "INITIALIZING"
        } else {
            "RUNNING"
        };
        inner.job_submissions.push(job.clone());
        inner.jobs.push(JobDetails {
            job_id: job_id.clone(),
            state: state.to_string(),
        });
        Ok(job_id)
    }

    async fn cancel_job(
        &self,
        _cluster: &ClusterRef,
        job_id: &str,
        _drain: bool,
        _timeout: Duration,
    ) -> Result<(), Error> {
        let mut inner = self.lock();
        inner.jobs.retain(|j| j.job_id != job_id);
        inner.cancels += 1;
        Ok(())
    }

    async fn list_jobs(&self, _cluster: &ClusterRef) -> Result<Vec<JobDetails>, Error> {
        Ok(self.lock().jobs.clone())
    }

    async fn trigger_savepoint(
        &self,
        cluster: &ClusterRef,
        job_id: &str,
        _target_dir: Option<String>,
    ) -> Result<SavepointHandle, Error> {
        let mut inner = self.lock();
        inner.savepoint_counter += 1;
        let trigger_id = format!("trigger-{}", inner.savepoint_counter);
        let location = format!("s3://savepoints/sp-{}", inner.savepoint_counter);
        inner.pending_savepoints.insert(trigger_id.clone(), location);
        Ok(SavepointHandle {
            cluster: cluster.clone(),
            job_id: job_id.to_string(),
            trigger_id,
        })
    }

    async fn poll_savepoint(
        &self,
        handle: &SavepointHandle,
    ) -> Result<SavepointFetchStatus, Error> {
        let inner = self.lock();
        if inner.hold_savepoints {
            return Ok(SavepointFetchStatus::Pending);
        }
        match inner.pending_savepoints.get(&handle.trigger_id) {
            Some(location) => Ok(SavepointFetchStatus::Completed(location.clone())),
            None => Ok(SavepointFetchStatus::Failed("unknown trigger".to_string())),
        }
    }

    async fn get_cluster_health(&self, _cluster: &ClusterRef) -> Result<ClusterHealth, Error> {
        let inner = self.lock();
        Ok(match (inner.running, inner.ready) {
            (false, _) => ClusterHealth::Missing,
            (true, false) => ClusterHealth::Deploying,
            (true, true) => ClusterHealth::Ready,
        })
    }
}

/// Rollback-enabled config with a short readiness timeout
fn rollback_config() -> std::collections::BTreeMap<String, String> {
    [
        (KEY_ROLLBACK_ENABLED.to_string(), "true".to_string()),
        (
            KEY_READINESS_TIMEOUT.to_string(),
            TEST_READINESS_TIMEOUT_MS.to_string(),
        ),
        (KEY_SAVEPOINT_TIMEOUT.to_string(), "5s".to_string()),
    ]
    .into_iter()
    .collect()
}

pub fn application_deployment(parallelism: i32, upgrade_mode: UpgradeMode) -> StreamDeployment {
    let mut dep = StreamDeployment::new(
        "pipeline",
        StreamDeploymentSpec {
            cluster_type: ClusterType::Application,
            engine_config: rollback_config(),
            job: Some(JobSpec {
                artifact: "registry.example.com/jobs/pipeline:1.0".to_string(),
                parallelism,
                state: JobState::Running,
                upgrade_mode,
            }),
            session_cluster: None,
            restart_nonce: None,
        },
    );
    dep.metadata.namespace = Some("default".to_string());
    dep
}

pub fn session_job_deployment(parallelism: i32, upgrade_mode: UpgradeMode) -> StreamDeployment {
    let mut dep = StreamDeployment::new(
        "enrich-job",
        StreamDeploymentSpec {
            cluster_type: ClusterType::SessionJob,
            engine_config: rollback_config(),
            job: Some(JobSpec {
                artifact: "registry.example.com/jobs/enrich:2.1".to_string(),
                parallelism,
                state: JobState::Running,
                upgrade_mode,
            }),
            session_cluster: Some("analytics".to_string()),
            restart_nonce: None,
        },
    );
    dep.metadata.namespace = Some("default".to_string());
    dep
}

pub fn session_deployment() -> StreamDeployment {
    let mut dep = StreamDeployment::new(
        "analytics",
        StreamDeploymentSpec {
            cluster_type: ClusterType::Session,
            engine_config: rollback_config(),
            job: None,
            session_cluster: None,
            restart_nonce: None,
        },
    );
    dep.metadata.namespace = Some("default".to_string());
    dep
}

/// Run one observe-then-reconcile turn against the fake control plane
pub async fn turn(control_plane: &Arc<FakeControlPlane>, dep: &mut StreamDeployment) {
    let cp: Arc<dyn ControlPlane> = control_plane.clone();
    let observer = Observer::new(cp.clone());
    let reconciler = Reconciler::new(cp, Default::default());
    run_turn(&observer, &reconciler, dep).await;
}

/// Sleep past the readiness timeout so the next turn sees it expired
pub async fn outwait_readiness_timeout() {
    tokio::time::sleep(Duration::from_millis(TEST_READINESS_TIMEOUT_MS + 50)).await;
}

/// Shorthand for the reconciliation status of a deployment under test
pub fn recon(dep: &StreamDeployment) -> &streamops::crd::ReconciliationStatus {
    &dep.status.as_ref().expect("status").reconciliation_status
}
