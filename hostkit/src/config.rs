//! Polling configuration.
//!
//! Every interval is stored in milliseconds so the JSON file stays readable.
//! Defaults reproduce the cadence the streams were tuned for.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const CONFIG_DIR: &str = "hostkit";
const CONFIG_FILE: &str = "config.json";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub process: ProcessConfig,
    pub download: DownloadConfig,
    pub extract: ExtractConfig,
}

/// Cadence of a [`ProcessHandle`](crate::process::ProcessHandle).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Liveness poll. `None` disables it; `finish` then probes on demand.
    pub running_interval_ms: Option<u64>,
    /// Output file poll. `None` disables output capture.
    pub output_interval_ms: Option<u64>,
    /// Delay between lookups of the launcher's child process.
    pub child_interval_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            running_interval_ms: Some(200),
            output_interval_ms: Some(500),
            child_interval_ms: 50,
        }
    }
}

impl ProcessConfig {
    pub fn running_interval(&self) -> Option<Duration> {
        self.running_interval_ms.map(Duration::from_millis)
    }

    pub fn output_interval(&self) -> Option<Duration> {
        self.output_interval_ms.map(Duration::from_millis)
    }

    pub const fn child_interval(&self) -> Duration {
        Duration::from_millis(self.child_interval_ms)
    }
}

/// Cadence of a [`DownloadStream`](crate::network::DownloadStream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Destination size poll while transferring.
    pub progress_interval_ms: u64,
    /// Pause-state check while paused.
    pub pause_interval_ms: u64,
    /// Child lookup delay for the transfer process.
    pub child_interval_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 200,
            pause_interval_ms: 500,
            child_interval_ms: 50,
        }
    }
}

impl DownloadConfig {
    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub const fn pause_interval(&self) -> Duration {
        Duration::from_millis(self.pause_interval_ms)
    }

    pub const fn child_interval(&self) -> Duration {
        Duration::from_millis(self.child_interval_ms)
    }
}

/// Cadence of an [`ExtractionStream`](crate::archive::ExtractionStream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Delay between progress ticks.
    pub progress_interval_ms: u64,
    /// Barrier poll of the per-file probes within one tick.
    pub probe_interval_ms: u64,
    /// Child lookup delay for the extraction process.
    pub child_interval_ms: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 500,
            probe_interval_ms: 200,
            child_interval_ms: 50,
        }
    }
}

impl ExtractConfig {
    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub const fn child_interval(&self) -> Duration {
        Duration::from_millis(self.child_interval_ms)
    }
}

impl Config {
    /// Default config location (`<config_dir>/hostkit/config.json`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load a config file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path` (or the default location), using defaults when the
    /// file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load(&path)
    }
}
