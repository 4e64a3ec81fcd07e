pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod metric;
pub mod normalize;
pub mod orchestrator;
pub mod sampler;
pub mod source;

pub use config::{Config, RunConfig};
pub use error::{ExportError, ProbeError, SourceError};
pub use metric::{MeasurementSet, MetricKind, MetricSeries, Sample};
pub use orchestrator::Orchestrator;
pub use source::MetricSource;
