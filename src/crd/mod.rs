//! Custom resource definitions managed by the operator

pub mod deployment;
pub mod types;

pub use deployment::{StreamDeployment, StreamDeploymentSpec, StreamDeploymentStatus};
pub use types::{
    ClusterType, EngineConfig, JobManagerDeploymentStatus, JobSpec, JobState, JobStatus,
    ReconciliationState, ReconciliationStatus, Savepoint, SavepointInfo, UpgradeMode,
};
