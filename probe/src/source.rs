//! Metric sources: where liveness answers and raw counter readings come from

pub mod command;
#[cfg(target_os = "linux")]
pub mod procfs;
pub mod scripted;

pub use command::CommandSource;
#[cfg(target_os = "linux")]
pub use procfs::ProcfsSource;
pub use scripted::ScriptedSource;

use crate::config::{ConfigError, SourceConfig, SourceKind};
use crate::error::SourceError;
use std::sync::Arc;

/// Boundary to whatever actually reads OS counters.
///
/// Implementations are shared by all samplers, so interior state must be
/// synchronized.
pub trait MetricSource: Send + Sync {
    /// True if a process listing contains `process_name` as a substring.
    fn is_running(&self, process_name: &str) -> Result<bool, SourceError>;

    /// Raw numeric text for `counter` of `process_name`.
    fn read_counter(&self, process_name: &str, counter: &str) -> Result<String, SourceError>;
}

pub fn from_config(config: &SourceConfig) -> Result<Arc<dyn MetricSource>, ConfigError> {
    match config.kind {
        SourceKind::Procfs => procfs_source(),
        SourceKind::Command => Ok(Arc::new(CommandSource::from_config(config)?)),
    }
}

#[cfg(target_os = "linux")]
fn procfs_source() -> Result<Arc<dyn MetricSource>, ConfigError> {
    Ok(Arc::new(ProcfsSource::new()))
}

#[cfg(not(target_os = "linux"))]
fn procfs_source() -> Result<Arc<dyn MetricSource>, ConfigError> {
    Err(ConfigError::Invalid(
        "the procfs source is only available on Linux; use kind = \"command\"".to_string(),
    ))
}
