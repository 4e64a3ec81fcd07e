//! Owns the seven samplers of a run: start, broadcast stop, join, expose results

use crate::config::RunConfig;
use crate::error::ProbeError;
use crate::metric::{MeasurementSet, MetricKind};
use crate::sampler::{Sampler, SamplerReport, SleepMode, StopSignal, TickStats};
use crate::source::MetricSource;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

enum Phase {
    Idle,
    Running {
        stop: StopSignal,
        workers: Vec<(MetricKind, JoinHandle<SamplerReport>)>,
    },
    Stopped {
        results: MeasurementSet,
        stats: Vec<(MetricKind, TickStats)>,
    },
}

pub struct Orchestrator {
    run: RunConfig,
    source: Arc<dyn MetricSource>,
    sleep_mode: SleepMode,
    phase: Phase,
}

impl Orchestrator {
    pub fn new(run: RunConfig, source: Arc<dyn MetricSource>) -> Self {
        Self {
            run,
            source,
            sleep_mode: SleepMode::Fixed,
            phase: Phase::Idle,
        }
    }

    pub fn with_sleep_mode(mut self, sleep_mode: SleepMode) -> Self {
        self.sleep_mode = sleep_mode;
        self
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running { .. })
    }

    /// Spawns one sampler thread per metric kind.
    ///
    /// If any thread cannot be spawned the ones already running are stopped
    /// and joined before the error is returned.
    pub fn start(&mut self) -> Result<(), ProbeError> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(ProbeError::AlreadyStarted);
        }

        let stop = StopSignal::new();
        let process_name: Arc<str> = Arc::from(self.run.process_name.as_str());
        let mut workers = Vec::with_capacity(MetricKind::COUNT);

        for kind in MetricKind::ALL {
            let sampler = Sampler::new(
                kind,
                Arc::clone(&process_name),
                self.run.interval(),
                Arc::clone(&self.source),
                stop.clone(),
            )
            .with_sleep_mode(self.sleep_mode);

            let spawned = thread::Builder::new()
                .name(format!("sampler-{}", sampler.kind()))
                .spawn(move || sampler.run());

            match spawned {
                Ok(handle) => workers.push((kind, handle)),
                Err(source) => {
                    stop.trigger();
                    Self::join_all(workers);
                    return Err(ProbeError::SamplerSpawn { kind, source });
                }
            }
        }

        info!(
            process = %self.run.process_name,
            interval_seconds = self.run.interval_seconds,
            "Started {} samplers",
            workers.len()
        );
        self.phase = Phase::Running { stop, workers };
        Ok(())
    }

    /// Broadcasts the stop signal and blocks until every sampler has exited.
    ///
    /// With [`SleepMode::Fixed`] this can take up to one interval. A read that
    /// never returns keeps this call from returning.
    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {
                self.phase = Phase::Stopped {
                    results: MeasurementSet::new(),
                    stats: Vec::new(),
                };
            }
            Phase::Running { stop, workers } => {
                stop.trigger();
                let (results, stats) = Self::join_all(workers);
                info!(samples = results.total_samples(), "All samplers stopped");
                self.phase = Phase::Stopped { results, stats };
            }
            stopped @ Phase::Stopped { .. } => self.phase = stopped,
        }
    }

    /// The frozen measurement set; `None` until [`stop`](Self::stop) returns.
    pub fn results(&self) -> Option<&MeasurementSet> {
        match &self.phase {
            Phase::Stopped { results, .. } => Some(results),
            _ => None,
        }
    }

    pub fn stats(&self) -> Option<&[(MetricKind, TickStats)]> {
        match &self.phase {
            Phase::Stopped { stats, .. } => Some(stats),
            _ => None,
        }
    }

    pub fn into_results(mut self) -> Option<MeasurementSet> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Stopped { results, .. } => Some(results),
            _ => None,
        }
    }

    fn join_all(
        workers: Vec<(MetricKind, JoinHandle<SamplerReport>)>,
    ) -> (MeasurementSet, Vec<(MetricKind, TickStats)>) {
        let mut results = MeasurementSet::new();
        let mut stats = Vec::with_capacity(workers.len());
        for (kind, handle) in workers {
            match handle.join() {
                Ok(report) => {
                    results.insert(kind, report.series);
                    stats.push((kind, report.stats));
                }
                Err(_) => {
                    error!(metric = %kind, "Sampler thread panicked; its series is dropped");
                    stats.push((kind, TickStats::default()));
                }
            }
        }
        (results, stats)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Phase::Running { stop, .. } = &self.phase {
            stop.trigger();
        }
    }
}
