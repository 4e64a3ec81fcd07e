use anyhow::{Context, Result};
use clap::Parser;
use perf_probe::{
    config::Config,
    export::{self, ExportFormat},
    logging, source, Orchestrator,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Samples performance counters of a named process until interrupted, then
/// writes the collected series to the output directory.
#[derive(Parser, Debug)]
#[command(name = "perf-probe", version, about)]
struct Cli {
    /// Name of the process to observe
    #[arg(long)]
    process: Option<String>,

    /// Seconds between samples of each metric
    #[arg(long, alias = "interval_seconds")]
    interval_seconds: Option<u64>,

    /// Directory for results and the log file
    #[arg(long, alias = "output_dir")]
    output_dir: Option<PathBuf>,

    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Export format; repeat for several
    #[arg(long = "format", value_enum)]
    formats: Vec<ExportFormat>,

    /// Wake samplers immediately on shutdown instead of finishing their sleep
    #[arg(long)]
    interruptible_sleep: bool,

    /// Stop on our own after this many seconds
    #[arg(long, value_name = "SECONDS")]
    run_for: Option<u64>,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => {
                let path = Config::config_path();
                if path.exists() {
                    Config::load(&path)
                        .with_context(|| format!("loading config {}", path.display()))?
                } else {
                    Config::default()
                }
            }
        };

        if let Some(process) = &self.process {
            config.probe.process_name = process.clone();
        }
        if let Some(interval) = self.interval_seconds {
            config.probe.interval_seconds = interval;
        }
        if let Some(dir) = &self.output_dir {
            config.probe.output_dir = dir.clone();
        }
        if !self.formats.is_empty() {
            config.probe.formats = self.formats.clone();
        }
        if self.interruptible_sleep {
            config.probe.interruptible_sleep = true;
        }
        if self.run_for.is_some() {
            config.probe.run_for_seconds = self.run_for;
        }
        Ok(config)
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

async fn wait_for_shutdown(run_for: Option<u64>) -> &'static str {
    let deadline = async {
        match run_for {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            "Interrupted"
        }
        _ = terminate() => "Terminated",
        _ = deadline => "Run time elapsed",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    let run = config.run_config()?;

    std::fs::create_dir_all(&run.output_dir)
        .with_context(|| format!("creating output directory {}", run.output_dir.display()))?;
    logging::init(&run.output_dir);
    info!("perf-probe starting...");

    let source = source::from_config(&config.source)?;
    let mut orchestrator = Orchestrator::new(run.clone(), source).with_sleep_mode(config.sleep_mode());
    orchestrator.start()?;
    info!(process = %run.process_name, "Sampling, press Ctrl-C to stop");

    let reason = wait_for_shutdown(config.probe.run_for_seconds).await;
    info!("{}, stopping samplers", reason);

    // stop() joins threads and may block for a full interval
    let orchestrator = tokio::task::spawn_blocking(move || {
        orchestrator.stop();
        orchestrator
    })
    .await
    .context("sampler shutdown task failed")?;

    let results = orchestrator
        .results()
        .context("samplers did not stop")?;
    let written = export::export(results, &run.output_dir, &config.probe.formats)?;
    info!(files = written.len(), samples = results.total_samples(), "Done");
    Ok(())
}
