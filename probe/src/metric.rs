//! Metric kinds, samples and the per-run measurement set

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Cpu,
    MemWorkingSet,
    MemCommitSize,
    Threads,
    Handles,
    IoReadBytes,
    IoWriteBytes,
}

impl MetricKind {
    pub const COUNT: usize = 7;

    /// All kinds in enumeration order. Export order follows this array.
    pub const ALL: [MetricKind; MetricKind::COUNT] = [
        MetricKind::Cpu,
        MetricKind::MemWorkingSet,
        MetricKind::MemCommitSize,
        MetricKind::Threads,
        MetricKind::Handles,
        MetricKind::IoReadBytes,
        MetricKind::IoWriteBytes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::MemWorkingSet => "mem_workingset",
            MetricKind::MemCommitSize => "mem_commitsize",
            MetricKind::Threads => "threads",
            MetricKind::Handles => "handles",
            MetricKind::IoReadBytes => "io_read_bytes",
            MetricKind::IoWriteBytes => "io_write_bytes",
        }
    }

    /// Counter identifier handed to the metric source.
    pub fn counter(self) -> &'static str {
        match self {
            MetricKind::Cpu => "% Processor Time",
            MetricKind::MemWorkingSet => "Working Set - Private",
            MetricKind::MemCommitSize => "Private Bytes",
            MetricKind::Threads => "Thread count",
            MetricKind::Handles => "Handle count",
            MetricKind::IoReadBytes => "IO Read Bytes/sec",
            MetricKind::IoWriteBytes => "IO Write Bytes/sec",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown metric: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: i64,
    pub value: f64,
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Append-only series for one metric kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSeries {
    samples: Vec<Sample>,
}

impl MetricSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample, clamping its timestamp to the last recorded one so
    /// the series never runs backwards if the wall clock steps back.
    pub fn push(&mut self, timestamp: i64, value: f64) -> Sample {
        let timestamp = match self.last() {
            Some(last) => timestamp.max(last.timestamp),
            None => timestamp,
        };
        let sample = Sample { timestamp, value };
        self.samples.push(sample);
        sample
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }
}

impl From<Vec<Sample>> for MetricSeries {
    fn from(samples: Vec<Sample>) -> Self {
        Self { samples }
    }
}

/// One series per [`MetricKind`]; every kind is always present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementSet {
    series: [MetricSeries; MetricKind::COUNT],
}

impl MeasurementSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: MetricKind) -> &MetricSeries {
        &self.series[kind.index()]
    }

    pub(crate) fn get_mut(&mut self, kind: MetricKind) -> &mut MetricSeries {
        &mut self.series[kind.index()]
    }

    /// Installs the series produced by a sampler for its own kind.
    pub fn insert(&mut self, kind: MetricKind, series: MetricSeries) {
        self.series[kind.index()] = series;
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricKind, &MetricSeries)> {
        MetricKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }

    pub fn total_samples(&self) -> usize {
        self.series.iter().map(MetricSeries::len).sum()
    }
}
