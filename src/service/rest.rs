//! REST-backed control plane client
//!
//! Talks to the cluster manager's HTTP API. Paths follow its v1 layout;
//! non-2xx responses are surfaced verbatim in the error so operators can
//! see what the manager complained about.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ClusterHealth, ClusterRef, ClusterSubmission, ControlPlane, JobDetails, SavepointFetchStatus,
    SavepointHandle,
};
use crate::error::Error;

/// Control plane client for the cluster manager REST API
pub struct RestControlPlane {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    cluster_type: String,
    config: &'a std::collections::BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<SubmitJob<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitJob<'a> {
    artifact: &'a str,
    parallelism: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    savepoint_location: Option<&'a str>,
    recover_from_latest_checkpoint: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobsResponse {
    jobs: Vec<JobEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobEntry {
    id: String,
    state: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerResponse {
    trigger_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitJobResponse {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavepointStatusResponse {
    status: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    failure_cause: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    phase: String,
}

impl RestControlPlane {
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::control_plane(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn cluster_url(&self, cluster: &ClusterRef, suffix: &str) -> String {
        format!(
            "{}/v1/namespaces/{}/clusters/{}{}",
            self.base_url, cluster.namespace, cluster.name, suffix
        )
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::control_plane(format!("{what} failed ({status}): {body}")))
    }
}

#[async_trait]
impl ControlPlane for RestControlPlane {
    async fn submit(&self, submission: &ClusterSubmission) -> Result<(), Error> {
        let url = self.cluster_url(&submission.cluster, "");
        let body = SubmitRequest {
            cluster_type: submission.cluster_type.to_string(),
            config: &submission.config,
            job: submission.job.as_ref().map(|j| SubmitJob {
                artifact: &j.artifact,
                parallelism: j.parallelism,
                savepoint_location: j.savepoint_location.as_deref(),
                recover_from_latest_checkpoint: j.recover_from_latest_checkpoint,
            }),
        };
        debug!(cluster = %submission.cluster, "submitting cluster");
        let resp = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::control_plane(format!("submit: {e}")))?;
        Self::check(resp, "submit").await?;
        Ok(())
    }

    async fn stop(
        &self,
        cluster: &ClusterRef,
        drain: bool,
        timeout: Duration,
    ) -> Result<(), Error> {
        let url = self.cluster_url(cluster, "");
        debug!(cluster = %cluster, drain, "stopping cluster");
        let resp = self
            .client
            .delete(&url)
            .query(&[
                ("drain", drain.to_string()),
                ("timeoutSeconds", timeout.as_secs().to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::control_plane(format!("stop: {e}")))?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(cluster = %cluster, "cluster already gone");
            return Ok(());
        }
        Self::check(resp, "stop").await?;
        Ok(())
    }

    async fn submit_job(
        &self,
        cluster: &ClusterRef,
        job: &super::JobSubmission,
    ) -> Result<String, Error> {
        let url = self.cluster_url(cluster, "/jobs");
        let body = SubmitJob {
            artifact: &job.artifact,
            parallelism: job.parallelism,
            savepoint_location: job.savepoint_location.as_deref(),
            recover_from_latest_checkpoint: job.recover_from_latest_checkpoint,
        };
        debug!(cluster = %cluster, artifact = %job.artifact, "submitting job");
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::control_plane(format!("submit job: {e}")))?;
        let resp = Self::check(resp, "submit job").await?;
        let submitted: SubmitJobResponse = resp
            .json()
            .await
            .map_err(|e| Error::control_plane(format!("submit job body: {e}")))?;
        Ok(submitted.id)
    }

    async fn cancel_job(
        &self,
        cluster: &ClusterRef,
        job_id: &str,
        drain: bool,
        timeout: Duration,
    ) -> Result<(), Error> {
        let url = self.cluster_url(cluster, &format!("/jobs/{job_id}"));
        debug!(cluster = %cluster, job_id = %job_id, drain, "cancelling job");
        let resp = self
            .client
            .delete(&url)
            .query(&[
                ("drain", drain.to_string()),
                ("timeoutSeconds", timeout.as_secs().to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::control_plane(format!("cancel job: {e}")))?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(cluster = %cluster, job_id = %job_id, "job already gone");
            return Ok(());
        }
        Self::check(resp, "cancel job").await?;
        Ok(())
    }

    async fn list_jobs(&self, cluster: &ClusterRef) -> Result<Vec<JobDetails>, Error> {
        let url = self.cluster_url(cluster, "/jobs");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::control_plane(format!("list jobs: {e}")))?;
        let resp = Self::check(resp, "list jobs").await?;
        let jobs: JobsResponse = resp
            .json()
            .await
            .map_err(|e| Error::control_plane(format!("list jobs body: {e}")))?;
        Ok(jobs
            .jobs
            .into_iter()
            .map(|j| JobDetails {
                job_id: j.id,
                state: j.state,
            })
            .collect())
    }

    async fn trigger_savepoint(
        &self,
        cluster: &ClusterRef,
        job_id: &str,
        target_dir: Option<String>,
    ) -> Result<SavepointHandle, Error> {
        let url = self.cluster_url(cluster, &format!("/jobs/{job_id}/savepoints"));
        let mut body = serde_json::json!({});
        if let Some(dir) = &target_dir {
            body["targetDirectory"] = serde_json::Value::String(dir.clone());
        }
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::control_plane(format!("trigger savepoint: {e}")))?;
        let resp = Self::check(resp, "trigger savepoint").await?;
        let trigger: TriggerResponse = resp
            .json()
            .await
            .map_err(|e| Error::control_plane(format!("trigger savepoint body: {e}")))?;
        Ok(SavepointHandle {
            cluster: cluster.clone(),
            job_id: job_id.to_string(),
            trigger_id: trigger.trigger_id,
        })
    }

    async fn poll_savepoint(
        &self,
        handle: &SavepointHandle,
    ) -> Result<SavepointFetchStatus, Error> {
        let url = self.cluster_url(
            &handle.cluster,
            &format!("/jobs/{}/savepoints/{}", handle.job_id, handle.trigger_id),
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::control_plane(format!("poll savepoint: {e}")))?;
        let resp = Self::check(resp, "poll savepoint").await?;
        let status: SavepointStatusResponse = resp
            .json()
            .await
            .map_err(|e| Error::control_plane(format!("poll savepoint body: {e}")))?;
        match status.status.as_str() {
            "COMPLETED" => {
                let location = status.location.ok_or_else(|| {
                    Error::control_plane("completed savepoint reported no location")
                })?;
                Ok(SavepointFetchStatus::Completed(location))
            }
            "FAILED" => Ok(SavepointFetchStatus::Failed(
                status.failure_cause.unwrap_or_else(|| "unknown".to_string()),
            )),
            _ => Ok(SavepointFetchStatus::Pending),
        }
    }

    async fn get_cluster_health(&self, cluster: &ClusterRef) -> Result<ClusterHealth, Error> {
        let url = self.cluster_url(cluster, "/health");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::control_plane(format!("health: {e}")))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(ClusterHealth::Missing);
        }
        let resp = Self::check(resp, "health").await?;
        let health: HealthResponse = resp
            .json()
            .await
            .map_err(|e| Error::control_plane(format!("health body: {e}")))?;
        Ok(match health.phase.as_str() {
            "READY" => ClusterHealth::Ready,
            "ERROR" => ClusterHealth::Error,
            "MISSING" => ClusterHealth::Missing,
            _ => ClusterHealth::Deploying,
        })
    }
}
