use super::MetricSource;
use crate::error::SourceError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct CounterScript {
    steps: VecDeque<Result<String, SourceError>>,
    fallback: Option<String>,
    reads: usize,
}

#[derive(Default)]
struct Script {
    running: VecDeque<Result<bool, SourceError>>,
    running_fallback: bool,
    liveness_checks: usize,
    counters: HashMap<String, CounterScript>,
}

/// Scripted source for tests.
///
/// Each call pops the next scripted answer. Once a script runs dry the
/// fallback is returned: `running_fallback` for liveness, and for readings
/// either the counter's fallback value or a `ReadFailure`.
///
/// The liveness script is a single queue shared by every caller. Under an
/// `Orchestrator` each scripted answer goes to whichever sampler polls first,
/// so per-tick liveness sequences are only deterministic with one `Sampler`.
/// Reading scripts are keyed by counter and stay per-metric.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<Script>,
    read_delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process is always reported running and every counter reads `value`.
    pub fn steady(value: &str) -> Self {
        let source = Self::new().running(true);
        for kind in crate::metric::MetricKind::ALL {
            source.with_script(|s| {
                s.counters.entry(kind.counter().to_string()).or_default().fallback =
                    Some(value.to_string());
            });
        }
        source
    }

    pub fn running(self, running: bool) -> Self {
        self.with_script(|s| s.running_fallback = running);
        self
    }

    pub fn liveness(self, answers: Vec<Result<bool, SourceError>>) -> Self {
        self.with_script(|s| s.running.extend(answers));
        self
    }

    pub fn readings(self, counter: &str, steps: Vec<Result<&str, SourceError>>) -> Self {
        self.with_script(|s| {
            let script = s.counters.entry(counter.to_string()).or_default();
            script
                .steps
                .extend(steps.into_iter().map(|step| step.map(str::to_string)));
        });
        self
    }

    pub fn fallback(self, counter: &str, value: &str) -> Self {
        self.with_script(|s| {
            s.counters.entry(counter.to_string()).or_default().fallback = Some(value.to_string());
        });
        self
    }

    /// Sleep inside every read to simulate a slow counter tool.
    pub fn read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn reads(&self, counter: &str) -> usize {
        self.with_script(|s| s.counters.get(counter).map_or(0, |c| c.reads))
    }

    pub fn liveness_checks(&self) -> usize {
        self.with_script(|s| s.liveness_checks)
    }

    fn with_script<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut script)
    }
}

impl MetricSource for ScriptedSource {
    fn is_running(&self, _process_name: &str) -> Result<bool, SourceError> {
        self.with_script(|s| {
            s.liveness_checks += 1;
            s.running.pop_front().unwrap_or(Ok(s.running_fallback))
        })
    }

    fn read_counter(&self, _process_name: &str, counter: &str) -> Result<String, SourceError> {
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }
        self.with_script(|s| {
            let script = s.counters.entry(counter.to_string()).or_default();
            script.reads += 1;
            match script.steps.pop_front() {
                Some(step) => step,
                None => script
                    .fallback
                    .clone()
                    .ok_or_else(|| SourceError::ReadFailure(format!("no reading scripted for {}", counter))),
            }
        })
    }
}
