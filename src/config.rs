//! Configuration file support for the JRU/DRU reporter.
//!
//! Loads settings from `~/.config/jru-report/config.toml` on Linux
//! (or platform-appropriate location on other OSes).

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::antenna::DEFAULT_WINDOW_LINES;

/// Default discontinuity threshold between telemetry messages, in seconds.
pub const DEFAULT_MAX_DELTA_TIME_S: u64 = 30;

/// Default alarm-to-antenna-snapshot join window, in minutes.
pub const DEFAULT_MAX_DELTA_STAT_COUNTERS_MIN: u64 = 11;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gap between two telemetry messages above which the interval is skipped.
    pub max_delta_time_s: u64,

    /// Maximum time between an alarm and the antenna snapshot used for its deltas.
    pub max_delta_stat_counters_min: u64,

    /// Lines kept in the antenna statistics window.
    pub antenna_window_lines: usize,

    /// Directory for exported CSV files.
    pub out_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_delta_time_s: DEFAULT_MAX_DELTA_TIME_S,
            max_delta_stat_counters_min: DEFAULT_MAX_DELTA_STAT_COUNTERS_MIN,
            antenna_window_lines: DEFAULT_WINDOW_LINES,
            out_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from the default config file location.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but is malformed.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    /// Load configuration from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in config file: {}", path.display()))
    }

    /// Returns the path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("jru-report/config.toml"))
    }

    /// Validate all configuration settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_delta_time_s == 0 {
            bail!("max_delta_time_s must be greater than 0");
        }
        if self.max_delta_stat_counters_min == 0 {
            bail!("max_delta_stat_counters_min must be greater than 0");
        }
        if self.antenna_window_lines == 0 {
            bail!("antenna_window_lines must be greater than 0");
        }
        Ok(())
    }

    /// Engine settings derived from this configuration.
    pub fn reporter_config(&self) -> ReporterConfig {
        ReporterConfig {
            max_delta_time_s: self.max_delta_time_s as f64,
            max_delta_stat_counters_s: (self.max_delta_stat_counters_min * 60) as f64,
            antenna_window_lines: self.antenna_window_lines,
        }
    }
}

/// Settings consumed by the parsing and metrics engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReporterConfig {
    pub max_delta_time_s: f64,
    pub max_delta_stat_counters_s: f64,
    pub antenna_window_lines: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Config::default().reporter_config()
    }
}
