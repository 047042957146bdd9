//! Error types for the streamops operator

use thiserror::Error;

/// Main error type for streamops operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Control-plane call failed (transient API failure, unreachable
    /// endpoint). Retried on the next reconcile turn.
    #[error("control plane error: {0}")]
    ControlPlane(String),

    /// A triggered savepoint was not confirmed within the configured
    /// deadline. The in-flight upgrade is aborted and the old cluster is
    /// left running.
    #[error("savepoint for job {job_id} not completed within {timeout_ms}ms")]
    SavepointTimeout { job_id: String, timeout_ms: u64 },

    /// A persisted spec snapshot could not be decoded. Fatal for the
    /// resource: the operator surfaces it and a manual status reset is
    /// required.
    #[error("corrupt state: {0}")]
    CorruptState(String),

    /// Validation error for CRD specs or configuration values
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a control-plane error with the given message
    pub fn control_plane(msg: impl Into<String>) -> Self {
        Self::ControlPlane(msg.into())
    }

    /// Create a corrupt-state error with the given message
    pub fn corrupt_state(msg: impl Into<String>) -> Self {
        Self::CorruptState(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Returns true if the error requires operator intervention rather
    /// than blind retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CorruptState(_))
    }
}
