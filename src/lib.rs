//! streamops - Kubernetes operator for managed stream-processing clusters
//!
//! Drives StreamDeployment resources (session clusters and job-attached
//! application clusters) toward their declared spec, with automatic rollback
//! to the last known-good spec when an upgrade fails to become ready.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod observer;
pub mod reconciler;
pub mod retry;
pub mod service;

pub use error::Error;

/// API group for all streamops CRDs
pub const API_GROUP: &str = "streamops.dev";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "streamops-controller";

/// Current epoch time in milliseconds, the timestamp unit used throughout
/// the reconciliation status.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
