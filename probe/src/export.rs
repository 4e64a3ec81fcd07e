//! Writes a frozen measurement set to `metrics.json` / `metrics.csv` and
//! reads those files back.

use crate::error::ExportError;
use crate::metric::{MeasurementSet, MetricKind, MetricSeries, Sample};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const JSON_FILE: &str = "metrics.json";
pub const CSV_FILE: &str = "metrics.csv";
const CSV_HEADER: &str = "metric,timestamp,value";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Json,
    Csv,
}

/// On-disk JSON layout. `duration` is kept for compatibility with existing
/// consumers and is always written as 0.
#[derive(Debug, Serialize, Deserialize)]
struct JsonDocument {
    #[serde(default)]
    duration: u64,
    cpu: Vec<Sample>,
    mem_workingset: Vec<Sample>,
    mem_commitsize: Vec<Sample>,
    threads: Vec<Sample>,
    handles: Vec<Sample>,
    io_read_bytes: Vec<Sample>,
    io_write_bytes: Vec<Sample>,
}

impl From<&MeasurementSet> for JsonDocument {
    fn from(set: &MeasurementSet) -> Self {
        let series = |kind: MetricKind| set.get(kind).samples().to_vec();
        JsonDocument {
            duration: 0,
            cpu: series(MetricKind::Cpu),
            mem_workingset: series(MetricKind::MemWorkingSet),
            mem_commitsize: series(MetricKind::MemCommitSize),
            threads: series(MetricKind::Threads),
            handles: series(MetricKind::Handles),
            io_read_bytes: series(MetricKind::IoReadBytes),
            io_write_bytes: series(MetricKind::IoWriteBytes),
        }
    }
}

impl From<JsonDocument> for MeasurementSet {
    fn from(doc: JsonDocument) -> Self {
        let mut set = MeasurementSet::new();
        set.insert(MetricKind::Cpu, doc.cpu.into());
        set.insert(MetricKind::MemWorkingSet, doc.mem_workingset.into());
        set.insert(MetricKind::MemCommitSize, doc.mem_commitsize.into());
        set.insert(MetricKind::Threads, doc.threads.into());
        set.insert(MetricKind::Handles, doc.handles.into());
        set.insert(MetricKind::IoReadBytes, doc.io_read_bytes.into());
        set.insert(MetricKind::IoWriteBytes, doc.io_write_bytes.into());
        set
    }
}

pub fn to_json_string(set: &MeasurementSet) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(&JsonDocument::from(set))?)
}

/// Float text with a trailing `.0` for integral values.
fn format_value(value: f64) -> String {
    format!("{:?}", value)
}

pub fn write_csv_to<W: Write>(set: &MeasurementSet, mut out: W) -> std::io::Result<()> {
    writeln!(out, "{}", CSV_HEADER)?;
    for (kind, series) in set.iter() {
        for sample in series.samples() {
            writeln!(out, "{},{},{}", kind, sample.timestamp, format_value(sample.value))?;
        }
    }
    out.flush()
}

pub fn write_json(set: &MeasurementSet, dir: &Path) -> Result<PathBuf, ExportError> {
    let path = dir.join(JSON_FILE);
    let mut json = to_json_string(set)?;
    json.push('\n');
    fs::write(&path, json)?;
    Ok(path)
}

pub fn write_csv(set: &MeasurementSet, dir: &Path) -> Result<PathBuf, ExportError> {
    let path = dir.join(CSV_FILE);
    let file = fs::File::create(&path)?;
    write_csv_to(set, BufWriter::new(file))?;
    Ok(path)
}

/// Writes every requested format into `dir`, returning the paths written.
pub fn export(
    set: &MeasurementSet,
    dir: &Path,
    formats: &[ExportFormat],
) -> Result<Vec<PathBuf>, ExportError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(formats.len());
    for format in formats {
        let path = match format {
            ExportFormat::Json => write_json(set, dir)?,
            ExportFormat::Csv => write_csv(set, dir)?,
        };
        info!(path = %path.display(), samples = set.total_samples(), "Saved results");
        written.push(path);
    }
    Ok(written)
}

pub fn load_json(path: &Path) -> Result<MeasurementSet, ExportError> {
    let content = fs::read_to_string(path)?;
    let doc: JsonDocument = serde_json::from_str(&content)?;
    Ok(doc.into())
}

pub fn load_csv(path: &Path) -> Result<MeasurementSet, ExportError> {
    let content = fs::read_to_string(path)?;
    parse_csv(&content)
}

fn parse_csv(content: &str) -> Result<MeasurementSet, ExportError> {
    let mut lines = content.lines().enumerate();
    match lines.next() {
        Some((_, header)) if header.trim() == CSV_HEADER => {}
        _ => {
            return Err(ExportError::Malformed {
                line: 1,
                reason: format!("expected header {:?}", CSV_HEADER),
            })
        }
    }

    let mut set = MeasurementSet::new();
    for (i, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |reason: String| ExportError::Malformed { line: i + 1, reason };
        let fields: Vec<&str> = line.trim().split(',').collect();
        let [metric, timestamp, value] = fields.as_slice() else {
            return Err(malformed(format!("expected 3 fields, found {}", fields.len())));
        };
        let kind: MetricKind = metric.parse().map_err(malformed)?;
        let timestamp: i64 = timestamp
            .parse()
            .map_err(|e| malformed(format!("bad timestamp: {}", e)))?;
        let value: f64 = value
            .parse()
            .map_err(|e| malformed(format!("bad value: {}", e)))?;
        let series: &mut MetricSeries = set.get_mut(kind);
        series.push(timestamp, value);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> MeasurementSet {
        let mut set = MeasurementSet::new();
        let mut cpu = MetricSeries::new();
        cpu.push(1_000, 12.5);
        cpu.push(2_000, 3.0);
        set.insert(MetricKind::Cpu, cpu);
        let mut handles = MetricSeries::new();
        handles.push(1_500, 140.0);
        set.insert(MetricKind::Handles, handles);
        set
    }

    #[test]
    fn csv_rows_follow_kind_then_insertion_order() {
        let mut out = Vec::new();
        write_csv_to(&sample_set(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "metric,timestamp,value\ncpu,1000,12.5\ncpu,2000,3.0\nhandles,1500,140.0\n"
        );
    }

    #[test]
    fn json_has_duration_then_every_kind() {
        let json = to_json_string(&MeasurementSet::new()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj["duration"], 0);
        for kind in MetricKind::ALL {
            assert_eq!(obj[kind.name()], serde_json::json!([]));
        }
        assert!(json.starts_with("{\n  \"duration\": 0,\n  \"cpu\": []"));
    }

    #[test]
    fn json_samples_are_timestamp_value_objects() {
        let json = to_json_string(&sample_set()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value["cpu"],
            serde_json::json!([{"timestamp": 1000, "value": 12.5}, {"timestamp": 2000, "value": 3.0}])
        );
    }

    #[test]
    fn json_without_duration_still_loads() {
        let doc = r#"{"cpu":[],"mem_workingset":[],"mem_commitsize":[],"threads":[{"timestamp":1,"value":4.0}],
            "handles":[],"io_read_bytes":[],"io_write_bytes":[]}"#;
        let doc: JsonDocument = serde_json::from_str(doc).unwrap();
        let set = MeasurementSet::from(doc);
        assert_eq!(set.get(MetricKind::Threads).len(), 1);
    }

    #[test]
    fn csv_parse_rejects_bad_input() {
        assert!(matches!(parse_csv("a,b\n"), Err(ExportError::Malformed { line: 1, .. })));
        assert!(matches!(
            parse_csv("metric,timestamp,value\ndisk,1,2.0\n"),
            Err(ExportError::Malformed { line: 2, .. })
        ));
        assert!(matches!(
            parse_csv("metric,timestamp,value\ncpu,1\n"),
            Err(ExportError::Malformed { line: 2, .. })
        ));
    }

    #[test]
    fn csv_parse_reads_rows() {
        let set = parse_csv("metric,timestamp,value\ncpu,1000,12.5\nhandles,1500,140.0\n").unwrap();
        assert_eq!(set.get(MetricKind::Cpu).samples(), &[Sample { timestamp: 1000, value: 12.5 }]);
        assert_eq!(set.get(MetricKind::Handles).len(), 1);
        assert_eq!(set.total_samples(), 2);
    }
}
