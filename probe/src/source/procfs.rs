use super::MetricSource;
use crate::error::SourceError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Counter {
    ProcessorTime,
    WorkingSetPrivate,
    PrivateBytes,
    ThreadCount,
    HandleCount,
    IoReadRate,
    IoWriteRate,
}

impl Counter {
    fn parse(id: &str) -> Option<Self> {
        match id {
            "% Processor Time" => Some(Counter::ProcessorTime),
            "Working Set - Private" => Some(Counter::WorkingSetPrivate),
            "Private Bytes" => Some(Counter::PrivateBytes),
            "Thread count" => Some(Counter::ThreadCount),
            "Handle count" => Some(Counter::HandleCount),
            "IO Read Bytes/sec" => Some(Counter::IoReadRate),
            "IO Write Bytes/sec" => Some(Counter::IoWriteRate),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct RateSample {
    total: u64,
    timestamp: Instant,
}

/// Reads counters from `/proc` on Linux.
pub struct ProcfsSource {
    root: PathBuf,
    clock_ticks: u64,
    rate_samples: Mutex<HashMap<(u32, Counter), RateSample>>,
}

impl ProcfsSource {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        Self {
            root: root.into(),
            clock_ticks: if clock_ticks > 0 { clock_ticks as u64 } else { 100 },
            rate_samples: Mutex::new(HashMap::new()),
        }
    }

    /// `(pid, comm)` for every readable process.
    fn listing(&self) -> Result<Vec<(u32, String)>, SourceError> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            SourceError::LivenessCheckFailure(format!("{}: {}", self.root.display(), e))
        })?;
        let mut processes = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            if let Ok(comm) = fs::read_to_string(entry.path().join("comm")) {
                processes.push((pid, comm.trim().to_string()));
            }
        }
        processes.sort_unstable_by_key(|(pid, _)| *pid);
        Ok(processes)
    }

    /// Exact name match first, then the lowest pid whose name contains it.
    fn resolve_pid(&self, process_name: &str) -> Result<u32, SourceError> {
        let processes = self
            .listing()
            .map_err(|e| SourceError::ReadFailure(e.to_string()))?;
        processes
            .iter()
            .find(|(_, comm)| comm == process_name)
            .or_else(|| processes.iter().find(|(_, comm)| comm.contains(process_name)))
            .map(|(pid, _)| *pid)
            .ok_or_else(|| SourceError::ReadFailure(format!("process {} not found", process_name)))
    }

    fn proc_dir(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    fn read_file(path: &Path) -> Result<String, SourceError> {
        fs::read_to_string(path)
            .map_err(|e| SourceError::ReadFailure(format!("{}: {}", path.display(), e)))
    }

    fn status_field(&self, pid: u32, field: &str) -> Result<u64, SourceError> {
        let status = Self::read_file(&self.proc_dir(pid).join("status"))?;
        let value = status
            .lines()
            .find_map(|line| line.strip_prefix(field)?.strip_prefix(':'))
            .ok_or_else(|| SourceError::ReadFailure(format!("{} missing for pid {}", field, pid)))?;
        let mut parts = value.split_whitespace();
        let number: u64 = parts
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| SourceError::ReadFailure(format!("bad {} for pid {}", field, pid)))?;
        match parts.next() {
            Some("kB") => Ok(number * 1024),
            _ => Ok(number),
        }
    }

    fn cpu_ticks(&self, pid: u32) -> Result<u64, SourceError> {
        let stat = Self::read_file(&self.proc_dir(pid).join("stat"))?;
        // comm may contain spaces; fields resume after the last ')'
        let rest = stat
            .rfind(')')
            .map(|i| &stat[i + 1..])
            .ok_or_else(|| SourceError::ReadFailure(format!("bad stat for pid {}", pid)))?;
        let fields: Vec<&str> = rest.split_whitespace().collect();
        // utime and stime are fields 14 and 15 of stat, 11 and 12 after comm
        let parse = |i: usize| -> Result<u64, SourceError> {
            fields
                .get(i)
                .and_then(|f| f.parse().ok())
                .ok_or_else(|| SourceError::ReadFailure(format!("bad stat for pid {}", pid)))
        };
        Ok(parse(11)? + parse(12)?)
    }

    fn io_field(&self, pid: u32, field: &str) -> Result<u64, SourceError> {
        let io = Self::read_file(&self.proc_dir(pid).join("io"))?;
        io.lines()
            .find_map(|line| line.strip_prefix(field)?.strip_prefix(':'))
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| SourceError::ReadFailure(format!("{} missing for pid {}", field, pid)))
    }

    fn handle_count(&self, pid: u32) -> Result<u64, SourceError> {
        let path = self.proc_dir(pid).join("fd");
        let entries = fs::read_dir(&path)
            .map_err(|e| SourceError::ReadFailure(format!("{}: {}", path.display(), e)))?;
        Ok(entries.flatten().count() as u64)
    }

    /// Per-second rate of a monotonically increasing total since the last
    /// read of the same (pid, counter). The first read yields 0.
    fn rate(&self, pid: u32, counter: Counter, total: u64) -> f64 {
        let now = Instant::now();
        let mut samples = self
            .rate_samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let rate = match samples.get(&(pid, counter)) {
            Some(prev) => {
                let elapsed = now.duration_since(prev.timestamp).as_secs_f64();
                if elapsed > 0.0 {
                    total.saturating_sub(prev.total) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        samples.insert((pid, counter), RateSample { total, timestamp: now });
        rate
    }

    fn read(&self, pid: u32, counter: Counter) -> Result<f64, SourceError> {
        match counter {
            Counter::ProcessorTime => {
                let ticks = self.cpu_ticks(pid)?;
                let ticks_per_sec = self.rate(pid, counter, ticks);
                Ok(ticks_per_sec / self.clock_ticks as f64 * 100.0)
            }
            Counter::WorkingSetPrivate => Ok(self.status_field(pid, "RssAnon")? as f64),
            Counter::PrivateBytes => Ok(self.status_field(pid, "VmData")? as f64),
            Counter::ThreadCount => Ok(self.status_field(pid, "Threads")? as f64),
            Counter::HandleCount => Ok(self.handle_count(pid)? as f64),
            Counter::IoReadRate => {
                let total = self.io_field(pid, "rchar")?;
                Ok(self.rate(pid, counter, total))
            }
            Counter::IoWriteRate => {
                let total = self.io_field(pid, "wchar")?;
                Ok(self.rate(pid, counter, total))
            }
        }
    }
}

impl Default for ProcfsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for ProcfsSource {
    fn is_running(&self, process_name: &str) -> Result<bool, SourceError> {
        Ok(self
            .listing()?
            .iter()
            .any(|(_, comm)| comm.contains(process_name)))
    }

    fn read_counter(&self, process_name: &str, counter: &str) -> Result<String, SourceError> {
        let counter = Counter::parse(counter)
            .ok_or_else(|| SourceError::ReadFailure(format!("unknown counter {:?}", counter)))?;
        let pid = self.resolve_pid(process_name)?;
        let value = self.read(pid, counter)?;
        Ok(value.to_string())
    }
}
