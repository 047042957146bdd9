//! StreamDeployment custom resource definition

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    ClusterType, JobManagerDeploymentStatus, JobSpec, JobStatus, ReconciliationState,
    ReconciliationStatus,
};

/// Desired state of a managed stream-processing cluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "streamops.dev",
    version = "v1alpha1",
    kind = "StreamDeployment",
    namespaced,
    status = "StreamDeploymentStatus",
    shortname = "sdep",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.clusterType"}"#,
    printcolumn = r#"{"name":"Job State","type":"string","jsonPath":".status.jobStatus.state"}"#,
    printcolumn = r#"{"name":"Lifecycle","type":"string","jsonPath":".status.reconciliationStatus.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StreamDeploymentSpec {
    /// Whether this deployment runs a dedicated job or a bare session cluster
    #[serde(default)]
    pub cluster_type: ClusterType,

    /// Engine configuration forwarded to the cluster, merged over operator
    /// defaults; also carries operator keys such as rollback settings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub engine_config: BTreeMap<String, String>,

    /// Job definition; required for application clusters and session jobs,
    /// absent for session clusters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobSpec>,

    /// Name of the session cluster a session job runs on; required when
    /// `clusterType` is `session-job`, ignored otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_cluster: Option<String>,

    /// Bump to force a full redeploy without any other spec change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_nonce: Option<i64>,
}

/// Observed state of a StreamDeployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamDeploymentStatus {
    /// Observed job state; absent for session clusters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_status: Option<JobStatus>,

    /// Observed health of the cluster's job manager deployment
    #[serde(default)]
    pub job_manager_deployment_status: JobManagerDeploymentStatus,

    /// Spec checkpoints and state machine position
    #[serde(default)]
    pub reconciliation_status: ReconciliationStatus,

    /// Last reconciliation error surfaced to the user, cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamDeployment {
    /// Status sub-document, materialized on first touch
    pub fn status_mut(&mut self) -> &mut StreamDeploymentStatus {
        self.status.get_or_insert_with(StreamDeploymentStatus::default)
    }

    /// Observed job status, materialized on first touch
    pub fn job_status_mut(&mut self) -> &mut JobStatus {
        self.status_mut().job_status.get_or_insert_with(JobStatus::default)
    }

    /// Position of the reconciliation state machine
    pub fn reconciliation_state(&self) -> ReconciliationState {
        self.status
            .as_ref()
            .map(|s| s.reconciliation_status.state)
            .unwrap_or_default()
    }

    /// True once at least one reconcile committed a spec snapshot
    pub fn was_reconciled(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.reconciliation_status.last_reconciled_spec.is_some())
            .unwrap_or(false)
    }
}
