//! Operator configuration
//!
//! Settings are plain string keys resolved from the operator's default
//! config map merged under each resource's `engineConfig`, so a single
//! deployment can opt into rollback or stretch its readiness timeout
//! without touching the operator installation.

use std::time::Duration;

use crate::crd::EngineConfig;
use crate::error::Error;

/// Enable automatic rollback to the last stable spec
pub const KEY_ROLLBACK_ENABLED: &str = "streamops.rollback.enabled";
/// How long a reconciled spec may stay unhealthy before rollback triggers
pub const KEY_READINESS_TIMEOUT: &str = "streamops.readiness.timeout";
/// Grace period for cluster shutdown
pub const KEY_SHUTDOWN_TIMEOUT: &str = "streamops.shutdown.timeout";
/// How long to wait for a triggered savepoint to complete
pub const KEY_SAVEPOINT_TIMEOUT: &str = "streamops.savepoint.timeout";
/// Target directory for savepoints triggered during upgrades
pub const KEY_SAVEPOINT_DIR: &str = "streamops.savepoint.dir";

const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_SAVEPOINT_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolved view of the configuration for one deployment
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OperatorConfig {
    entries: EngineConfig,
}

impl OperatorConfig {
    /// Operator defaults merged under the resource's own config
    pub fn resolve(defaults: &EngineConfig, overrides: &EngineConfig) -> Self {
        let mut entries = defaults.clone();
        entries.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { entries }
    }

    /// Build from a flat key/value map, in tests mostly
    pub fn from_entries(entries: EngineConfig) -> Self {
        Self { entries }
    }

    /// The effective config map forwarded to the cluster
    pub fn entries(&self) -> &EngineConfig {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn get_bool(&self, key: &str, default: bool) -> Result<bool, Error> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| {
                Error::validation(format!("config key {key} is not a boolean: {raw:?}"))
            }),
        }
    }

    fn get_duration(&self, key: &str, default: Duration) -> Result<Duration, Error> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => parse_duration(raw).ok_or_else(|| {
                Error::validation(format!("config key {key} is not a duration: {raw:?}"))
            }),
        }
    }

    pub fn rollback_enabled(&self) -> Result<bool, Error> {
        self.get_bool(KEY_ROLLBACK_ENABLED, false)
    }

    pub fn readiness_timeout(&self) -> Result<Duration, Error> {
        self.get_duration(KEY_READINESS_TIMEOUT, DEFAULT_READINESS_TIMEOUT)
    }

    pub fn shutdown_timeout(&self) -> Result<Duration, Error> {
        self.get_duration(KEY_SHUTDOWN_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT)
    }

    pub fn savepoint_timeout(&self) -> Result<Duration, Error> {
        self.get_duration(KEY_SAVEPOINT_TIMEOUT, DEFAULT_SAVEPOINT_TIMEOUT)
    }

    pub fn savepoint_dir(&self) -> Option<&str> {
        self.get(KEY_SAVEPOINT_DIR)
    }
}

/// Parse `500`, `500ms`, `30s`, `5m`, `1h`; bare numbers are milliseconds
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}
