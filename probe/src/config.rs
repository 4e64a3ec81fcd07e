//! Configuration management (TOML)

use crate::export::ExportFormat;
use crate::sampler::SleepMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub process_name: String,
    pub interval_seconds: u64,
    pub output_dir: PathBuf,
    pub formats: Vec<ExportFormat>,
    pub interruptible_sleep: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_for_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Procfs,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub list_command: Vec<String>,
    pub read_command: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            process_name: String::new(),
            interval_seconds: 1,
            output_dir: PathBuf::from("."),
            formats: vec![ExportFormat::Json, ExportFormat::Csv],
            interruptible_sleep: false,
            run_for_seconds: None,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        if cfg!(windows) {
            SourceConfig {
                kind: SourceKind::Command,
                list_command: vec!["tasklist".to_string()],
                read_command: vec![
                    "powershell".to_string(),
                    "-command".to_string(),
                    "(Get-Counter -Counter \"\\Process({process})\\{counter}\").CounterSamples[0].CookedValue".to_string(),
                ],
            }
        } else {
            SourceConfig {
                kind: if cfg!(target_os = "linux") { SourceKind::Procfs } else { SourceKind::Command },
                list_command: vec!["ps".to_string(), "-eo".to_string(), "comm".to_string()],
                read_command: vec![],
            }
        }
    }
}

/// Validated, immutable parameters of one sampling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub process_name: String,
    pub interval_seconds: u64,
    pub output_dir: PathBuf,
}

impl RunConfig {
    pub fn new(
        process_name: impl Into<String>,
        interval_seconds: u64,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let process_name = process_name.into();
        if process_name.trim().is_empty() {
            return Err(ConfigError::Invalid("process name must not be empty".to_string()));
        }
        if interval_seconds == 0 {
            return Err(ConfigError::Invalid("interval_seconds must be at least 1".to_string()));
        }
        Ok(RunConfig {
            process_name,
            interval_seconds,
            output_dir: output_dir.into(),
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "perf-probe")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    pub fn run_config(&self) -> Result<RunConfig, ConfigError> {
        RunConfig::new(
            self.probe.process_name.clone(),
            self.probe.interval_seconds,
            self.probe.output_dir.clone(),
        )
    }

    pub fn sleep_mode(&self) -> SleepMode {
        if self.probe.interruptible_sleep {
            SleepMode::Interruptible
        } else {
            SleepMode::Fixed
        }
    }
}
