//! Error types for sources, the sampling engine and exports

use crate::metric::MetricKind;
use thiserror::Error;

/// Per-tick failure. Always contained inside the sampler that hit it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Failed to get measurement: {0}")]
    ReadFailure(String),

    #[error("Failed to parse measurement {raw:?}")]
    ParseError { raw: String },

    #[error("Failed to list processes: {0}")]
    LivenessCheckFailure(String),
}

/// Fatal orchestrator errors. These abort the run.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to start sampler for {kind}: {source}")]
    SamplerSpawn {
        kind: MetricKind,
        #[source]
        source: std::io::Error,
    },

    #[error("Sampling has already been started")]
    AlreadyStarted,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed export at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}
