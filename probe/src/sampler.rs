//! Per-metric polling loop and the shared stop signal

use crate::error::SourceError;
use crate::metric::{now_ms, MetricKind, MetricSeries, Sample};
use crate::normalize::normalize;
use crate::source::MetricSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Broadcast cancellation shared by every sampler of a run.
///
/// Setting it is idempotent. Samplers only act on it at the top of an
/// iteration.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        // Taking the lock orders the store before any waiter's re-check.
        drop(self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner));
        self.inner.wake.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout`, returning early once the signal fires.
    /// Returns whether the signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !self.is_triggered() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            guard = match self.inner.wake.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        self.is_triggered()
    }
}

/// How a sampler waits between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SleepMode {
    /// Sleep the full interval; shutdown can lag by up to one interval.
    #[default]
    Fixed,
    /// Wake as soon as the stop signal fires.
    Interruptible,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Recorded(Sample),
    NotRunning,
    Failed(SourceError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    pub recorded: u64,
    pub not_running: u64,
    pub failures: u64,
}

impl TickStats {
    fn record(&mut self, outcome: &TickOutcome) {
        self.ticks += 1;
        match outcome {
            TickOutcome::Recorded(_) => self.recorded += 1,
            TickOutcome::NotRunning => self.not_running += 1,
            TickOutcome::Failed(_) => self.failures += 1,
        }
    }
}

/// What a sampler hands back when its loop ends.
#[derive(Debug, Clone, Default)]
pub struct SamplerReport {
    pub series: MetricSeries,
    pub stats: TickStats,
}

pub struct Sampler {
    kind: MetricKind,
    process_name: Arc<str>,
    interval: Duration,
    sleep_mode: SleepMode,
    source: Arc<dyn MetricSource>,
    stop: StopSignal,
}

impl Sampler {
    pub fn new(
        kind: MetricKind,
        process_name: Arc<str>,
        interval: Duration,
        source: Arc<dyn MetricSource>,
        stop: StopSignal,
    ) -> Self {
        Self {
            kind,
            process_name,
            interval,
            sleep_mode: SleepMode::Fixed,
            source,
            stop,
        }
    }

    pub fn with_sleep_mode(mut self, sleep_mode: SleepMode) -> Self {
        self.sleep_mode = sleep_mode;
        self
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Runs until the stop signal is observed at the top of an iteration.
    /// The series is owned by this loop alone and returned at the end.
    pub fn run(self) -> SamplerReport {
        let mut report = SamplerReport::default();
        info!(metric = %self.kind, interval = ?self.interval, "Sampler running");

        while !self.stop.is_triggered() {
            let outcome = self.tick(&mut report.series);
            report.stats.record(&outcome);
            match outcome {
                TickOutcome::Recorded(sample) => {
                    debug!(metric = %self.kind, timestamp = sample.timestamp, value = sample.value, "Recorded sample");
                }
                TickOutcome::NotRunning => {
                    debug!(metric = %self.kind, process = %self.process_name, "Process not running");
                }
                TickOutcome::Failed(e) => {
                    error!(metric = %self.kind, "{}", e);
                }
            }
            self.sleep();
        }

        info!(
            metric = %self.kind,
            ticks = report.stats.ticks,
            recorded = report.stats.recorded,
            failures = report.stats.failures,
            "Sampler stopped"
        );
        report
    }

    /// One liveness check plus at most one read. Appends to `series` only on
    /// a successful, parseable read.
    pub fn tick(&self, series: &mut MetricSeries) -> TickOutcome {
        match self.source.is_running(&self.process_name) {
            Ok(true) => {}
            Ok(false) => return TickOutcome::NotRunning,
            Err(e) => return TickOutcome::Failed(e),
        }
        let value = self
            .source
            .read_counter(&self.process_name, self.kind.counter())
            .and_then(|raw| normalize(&raw));
        match value {
            Ok(value) => TickOutcome::Recorded(series.push(now_ms(), value)),
            Err(e) => TickOutcome::Failed(e),
        }
    }

    fn sleep(&self) {
        match self.sleep_mode {
            SleepMode::Fixed => std::thread::sleep(self.interval),
            SleepMode::Interruptible => {
                self.stop.wait_timeout(self.interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ScriptedSource;
    use std::thread;

    const CPU: &str = "% Processor Time";

    fn sampler(source: ScriptedSource, interval: Duration, stop: &StopSignal) -> (Sampler, Arc<ScriptedSource>) {
        let source = Arc::new(source);
        let sampler = Sampler::new(
            MetricKind::Cpu,
            Arc::from("app"),
            interval,
            source.clone(),
            stop.clone(),
        );
        (sampler, source)
    }

    #[test]
    fn tick_records_normalized_value() {
        let stop = StopSignal::new();
        let (sampler, _) = sampler(ScriptedSource::new().running(true).fallback(CPU, "3,456"), Duration::ZERO, &stop);
        let mut series = MetricSeries::new();
        match sampler.tick(&mut series) {
            TickOutcome::Recorded(sample) => assert_eq!(sample.value, 3.46),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn tick_skips_read_when_not_running() {
        let stop = StopSignal::new();
        let (sampler, source) = sampler(ScriptedSource::new().running(false).fallback(CPU, "1"), Duration::ZERO, &stop);
        let mut series = MetricSeries::new();
        assert_eq!(sampler.tick(&mut series), TickOutcome::NotRunning);
        assert!(series.is_empty());
        assert_eq!(source.reads(CPU), 0);
    }

    #[test]
    fn liveness_failure_counts_as_not_recorded() {
        let stop = StopSignal::new();
        let (sampler, source) = sampler(
            ScriptedSource::new()
                .liveness(vec![Err(SourceError::LivenessCheckFailure("ps".into()))])
                .fallback(CPU, "1"),
            Duration::ZERO,
            &stop,
        );
        let mut series = MetricSeries::new();
        assert!(matches!(
            sampler.tick(&mut series),
            TickOutcome::Failed(SourceError::LivenessCheckFailure(_))
        ));
        assert!(series.is_empty());
        assert_eq!(source.reads(CPU), 0);
    }

    #[test]
    fn failed_tick_does_not_stop_the_loop() {
        let stop = StopSignal::new();
        let (sampler, _) = sampler(
            ScriptedSource::new()
                .running(true)
                .readings(CPU, vec![Ok("1.5"), Ok("N/A"), Ok("3")]),
            Duration::from_millis(20),
            &stop,
        );
        let handle = thread::spawn(move || sampler.run());
        thread::sleep(Duration::from_millis(200));
        stop.trigger();
        let report = handle.join().unwrap();

        let values: Vec<f64> = report.series.samples().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.5, 3.0]);
        assert!(report.stats.ticks >= 4);
        assert_eq!(report.stats.recorded, 2);
        // "N/A" plus every read after the script ran dry
        assert_eq!(report.stats.failures, report.stats.ticks - 2);
    }

    #[test]
    fn stop_before_run_reads_nothing() {
        let stop = StopSignal::new();
        stop.trigger();
        let (sampler, source) = sampler(ScriptedSource::steady("1"), Duration::from_secs(60), &stop);
        let report = sampler.run();
        assert!(report.series.is_empty());
        assert_eq!(report.stats.ticks, 0);
        assert_eq!(source.liveness_checks(), 0);
    }

    #[test]
    fn interruptible_sleep_wakes_on_stop() {
        let stop = StopSignal::new();
        let (sampler, _) = sampler(ScriptedSource::steady("1"), Duration::from_secs(60), &stop);
        let sampler = sampler.with_sleep_mode(SleepMode::Interruptible);
        let handle = thread::spawn(move || sampler.run());
        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        stop.trigger();
        let report = handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.series.len(), 1);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn error_lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .filter(|line| line.contains("ERROR"))
                .map(str::to_string)
                .collect()
        }
    }

    /// Runs the sampler on this thread with a capturing subscriber, stopping
    /// it after `run_for`.
    fn run_logged(sampler: Sampler, stop: &StopSignal, run_for: Duration) -> (SamplerReport, LogBuffer) {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();

        let stopper = {
            let stop = stop.clone();
            thread::spawn(move || {
                thread::sleep(run_for);
                stop.trigger();
            })
        };
        let report = tracing::subscriber::with_default(subscriber, || sampler.run());
        stopper.join().unwrap();
        (report, logs)
    }

    #[test]
    fn each_failed_tick_logs_one_error() {
        let stop = StopSignal::new();
        let (sampler, _) = sampler(
            ScriptedSource::new()
                .running(true)
                .readings(
                    CPU,
                    vec![
                        Ok("1"),
                        Ok("N/A"),
                        Err(SourceError::ReadFailure("exit status 1".into())),
                        Ok("3"),
                    ],
                )
                .fallback(CPU, "4"),
            Duration::from_millis(20),
            &stop,
        );
        let (report, logs) = run_logged(sampler, &stop, Duration::from_millis(200));

        assert_eq!(report.stats.failures, 2);
        let errors = logs.error_lines();
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(errors.iter().all(|line| line.contains("cpu")));
        assert!(errors[0].contains("N/A"));
        assert!(errors[1].contains("exit status 1"));
    }

    #[test]
    fn absent_process_logs_no_errors() {
        let stop = StopSignal::new();
        let (sampler, _) = sampler(
            ScriptedSource::new().running(false),
            Duration::from_millis(20),
            &stop,
        );
        let (report, logs) = run_logged(sampler, &stop, Duration::from_millis(150));

        assert!(report.stats.not_running >= 2);
        assert!(report.series.is_empty());
        assert!(logs.error_lines().is_empty());
    }

    #[test]
    fn wait_timeout_returns_false_when_not_triggered() {
        let stop = StopSignal::new();
        assert!(!stop.wait_timeout(Duration::from_millis(10)));
        stop.trigger();
        stop.trigger();
        assert!(stop.wait_timeout(Duration::from_secs(60)));
    }
}
