//! Tracing setup: stderr plus a debug-level log file in the output directory

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

pub const LOG_FILE: &str = "performance_probe.log";

/// Installs the global subscriber. Falls back to stderr only when the log
/// file cannot be opened.
pub fn init(output_dir: &Path) {
    let stderr = fmt::layer().with_writer(std::io::stderr).with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );

    let path = output_dir.join(LOG_FILE);
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => {
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(LevelFilter::DEBUG);
            tracing_subscriber::registry().with(stderr).with(file_layer).init();
        }
        Err(e) => {
            tracing_subscriber::registry().with(stderr).init();
            warn!("Failed to open log file {}: {}, logging to stderr only", path.display(), e);
        }
    }
}
