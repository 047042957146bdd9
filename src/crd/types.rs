//! Supporting types for the StreamDeployment CRD
//!
//! The reconciliation status is the interesting part: it keeps the last two
//! spec checkpoints (last reconciled, last stable) as opaque serialized
//! snapshots inside the resource's own status sub-document, so the rollback
//! machinery survives operator restarts.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::now_millis;

/// Kind of cluster a StreamDeployment manages
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    /// A cluster dedicated to a single job; the job is part of the spec
    #[default]
    Application,
    /// A standalone cluster with no attached job definition
    Session,
    /// A job submitted onto an existing session cluster, referenced by
    /// name through `sessionCluster`
    #[serde(rename = "session-job")]
    SessionJob,
}

impl std::fmt::Display for ClusterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Application => write!(f, "application"),
            Self::Session => write!(f, "session"),
            Self::SessionJob => write!(f, "session-job"),
        }
    }
}

/// Desired state of the managed job
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// The job should be submitted and processing
    #[default]
    Running,
    /// The job should be stopped, with state retained per the upgrade mode
    Suspended,
}

/// Strategy used to carry job state across an upgrade or rollback
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeMode {
    /// Trigger an explicit savepoint, wait for it, restore from it
    #[default]
    Savepoint,
    /// Rely on the cluster's own persisted recovery checkpoint
    LastState,
    /// Restart from empty state, ignoring savepoints and checkpoints
    Stateless,
}

impl std::fmt::Display for UpgradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Savepoint => write!(f, "savepoint"),
            Self::LastState => write!(f, "last_state"),
            Self::Stateless => write!(f, "stateless"),
        }
    }
}

/// Job definition attached to an application deployment
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Jar or image reference containing the job entry point
    pub artifact: String,

    /// Parallelism to run the job at
    #[serde(default = "default_parallelism")]
    pub parallelism: i32,

    /// Desired job state
    #[serde(default)]
    pub state: JobState,

    /// How job state is carried across upgrades
    #[serde(default)]
    pub upgrade_mode: UpgradeMode,
}

fn default_parallelism() -> i32 {
    1
}

/// Observed state of the job manager deployment backing the cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobManagerDeploymentStatus {
    /// Submitted but not yet confirmed healthy
    Deploying,
    /// Serving and healthy
    Ready,
    /// Deployment exists but reported an error
    Error,
    /// No deployment found
    #[default]
    Missing,
}

/// A recorded savepoint: where it landed and when
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Savepoint {
    /// Storage location of the completed savepoint
    pub location: String,

    /// When the savepoint was triggered (epoch millis)
    pub trigger_timestamp: i64,

    /// When the control plane confirmed completion (epoch millis)
    pub completed_timestamp: i64,
}

impl Savepoint {
    /// Record a savepoint completed now
    pub fn completed_now(location: impl Into<String>, trigger_timestamp: i64) -> Self {
        Self {
            location: location.into(),
            trigger_timestamp,
            completed_timestamp: now_millis(),
        }
    }
}

/// Ordered history of savepoints recorded for the managed job
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavepointInfo {
    /// Most recently recorded savepoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_savepoint: Option<Savepoint>,

    /// All recorded savepoints, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub savepoint_history: Vec<Savepoint>,
}

impl SavepointInfo {
    /// Record a newly completed savepoint
    pub fn record(&mut self, savepoint: Savepoint) {
        self.savepoint_history.push(savepoint.clone());
        self.last_savepoint = Some(savepoint);
    }
}

/// Observed job state, mirrored from the live cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Live job state as reported by the control plane (for example
    /// RUNNING, FINISHED, FAILED), or a terminal SUSPENDED marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Identifier of the live job, when one is known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    /// Savepoints recorded for this job
    #[serde(default)]
    pub savepoint_info: SavepointInfo,
}

impl JobStatus {
    /// Live job state observed as RUNNING
    pub const RUNNING: &'static str = "RUNNING";
    /// Terminal marker set when the job was suspended by the operator
    pub const SUSPENDED: &'static str = "SUSPENDED";
    /// Placeholder while a submission has not yet been observed
    pub const RECONCILING: &'static str = "RECONCILING";

    /// Returns true if the live job was observed running
    pub fn is_running(&self) -> bool {
        self.state.as_deref() == Some(Self::RUNNING)
    }

    /// Returns true if the job rests in the operator-suspended marker state
    pub fn is_suspended(&self) -> bool {
        self.state.as_deref() == Some(Self::SUSPENDED)
    }
}

/// Where the reconciliation state machine currently rests
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationState {
    /// The desired spec was applied (initial and steady state)
    #[default]
    Deployed,
    /// An upgrade is being applied within the current turn
    Upgrading,
    /// A readiness timeout fired; the last stable spec is being restored
    RollingBack,
    /// The live cluster runs the last stable spec, not the user's spec
    RolledBack,
}

/// Reconciliation history carried in the resource status.
///
/// The two serialized snapshots form an explicit two-slot ring: the spec
/// applied by the most recent successful reconcile, and the most recent
/// spec that was confirmed healthy. Encoding is plain JSON and must
/// round-trip exactly; a snapshot that fails to decode is a fatal
/// [`Error::CorruptState`] for the resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationStatus {
    /// Serialized snapshot of the spec at the last successful apply;
    /// None means the resource was never reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled_spec: Option<String>,

    /// Serialized snapshot of the most recent spec confirmed healthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stable_spec: Option<String>,

    /// Current rest state of the reconciliation state machine
    #[serde(default)]
    pub state: ReconciliationState,

    /// When the last spec application committed (epoch millis)
    #[serde(default)]
    pub reconciliation_timestamp: i64,
}

impl ReconciliationStatus {
    /// Encode a spec into the snapshot format
    pub fn serialize_spec<S: Serialize>(spec: &S) -> Result<String, Error> {
        serde_json::to_string(spec).map_err(|e| Error::serialization(e.to_string()))
    }

    fn decode_snapshot<S: for<'de> Deserialize<'de>>(
        snapshot: Option<&str>,
        which: &str,
    ) -> Result<Option<S>, Error> {
        match snapshot {
            None => Ok(None),
            Some(raw) => serde_json::from_str(raw).map(Some).map_err(|e| {
                Error::corrupt_state(format!("{which} snapshot cannot be decoded: {e}"))
            }),
        }
    }

    /// Decode the last reconciled spec snapshot
    pub fn deserialize_last_reconciled_spec<S: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<S>, Error> {
        Self::decode_snapshot(self.last_reconciled_spec.as_deref(), "last reconciled spec")
    }

    /// Decode the last stable spec snapshot
    pub fn deserialize_last_stable_spec<S: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<S>, Error> {
        Self::decode_snapshot(self.last_stable_spec.as_deref(), "last stable spec")
    }

    /// A reconciled spec is stable once it was confirmed healthy and no
    /// rollback is in flight.
    pub fn is_last_reconciled_spec_stable(&self) -> bool {
        self.last_reconciled_spec.is_some()
            && self.last_reconciled_spec == self.last_stable_spec
            && self.state != ReconciliationState::RollingBack
    }

    /// Promote the last reconciled spec to stable
    pub fn mark_stable(&mut self) {
        self.last_stable_spec = self.last_reconciled_spec.clone();
    }

    /// Record a successful spec application: snapshot the spec, stamp the
    /// timestamp, settle in `Deployed`.
    pub fn commit_spec<S: Serialize>(&mut self, spec: &S) -> Result<(), Error> {
        self.last_reconciled_spec = Some(Self::serialize_spec(spec)?);
        self.reconciliation_timestamp = now_millis();
        self.state = ReconciliationState::Deployed;
        Ok(())
    }
}

/// Effective configuration map passed to the live cluster
pub type EngineConfig = BTreeMap<String, String>;
