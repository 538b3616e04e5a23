//! Tracker configuration, stored as JSON.
//!
//! Every field has a default, so a partial or empty file is valid and keys
//! added by later releases never break older files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// SQLite file backing the store.
    pub database_path: PathBuf,
    /// When false, a bot's side of any event is not counted.
    pub track_bot_events: bool,
    /// Cadence of the consumer tick.
    pub tick_interval_ms: u64,
    /// Periodic flush of connected players. 0 disables it.
    pub flush_interval_secs: u64,
    /// Default tracing filter; `RUST_LOG` takes precedence.
    pub log_filter: String,
    pub log_kills: bool,
    pub log_deaths: bool,
    pub log_assists: bool,
    pub log_connects: bool,
    pub log_disconnects: bool,
    pub log_round_end: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("roundstats.db"),
            track_bot_events: false,
            tick_interval_ms: 15,
            flush_interval_secs: 30,
            log_filter: "info".to_owned(),
            log_kills: true,
            log_deaths: true,
            log_assists: true,
            log_connects: true,
            log_disconnects: true,
            log_round_end: true,
        }
    }
}

impl TrackerConfig {
    /// Reads and parses a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| config_error(path, e))?;
        serde_json::from_str(&text).map_err(|e| config_error(path, e))
    }

    /// Reads a config file, writing the defaults there first if it is missing.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let default = Self::default();
            default.save(path)?;
            return Ok(default);
        }
        Self::load(path)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let payload = serde_json::to_string_pretty(self)?;
        fs::write(path, payload)?;
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// `None` when periodic flushing is disabled.
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_secs > 0).then(|| Duration::from_secs(self.flush_interval_secs))
    }
}

fn config_error(path: &Path, err: impl std::fmt::Display) -> Error {
    Error::Config {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}
