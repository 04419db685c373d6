//! Engine configuration. JSON on disk, every field defaulted, so an empty
//! object (or no file at all) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::paths;

pub const DB_PATH_ENV: &str = "CINDER_DB_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Message and session-key expiry. Correctness-critical.
    pub expiry_interval_secs: u64,
    pub incident_interval_secs: u64,
    pub log_interval_secs: u64,
    pub incident_retention_days: u32,
    pub log_retention_days: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            expiry_interval_secs: 5,
            incident_interval_secs: 60 * 60,
            log_interval_secs: 24 * 60 * 60,
            incident_retention_days: 30,
            log_retention_days: 7,
        }
    }
}

impl SweepConfig {
    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs)
    }

    pub fn incident_interval(&self) -> Duration {
        Duration::from_secs(self.incident_interval_secs)
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_secs(self.log_interval_secs)
    }

    pub fn incident_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.incident_retention_days))
    }

    pub fn log_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.log_retention_days))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, secs) in [
            ("expiry_interval_secs", self.expiry_interval_secs),
            ("incident_interval_secs", self.incident_interval_secs),
            ("log_interval_secs", self.log_interval_secs),
        ] {
            if secs == 0 {
                return Err(anyhow!("{name} must be positive"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite database file. Defaults to `<data dir>/cinder.db`.
    pub db_path: Option<PathBuf>,
    pub sweep: SweepConfig,
}

impl EngineConfig {
    /// Load from `path`, or from the default config location if it exists,
    /// or fall back to defaults. `CINDER_DB_PATH` overrides the database path.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = paths::config_path()?;
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.sweep.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db) = lookup(DB_PATH_ENV).filter(|v| !v.trim().is_empty()) {
            self.db_path = Some(PathBuf::from(db));
        }
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => paths::default_db_path(),
        }
    }
}
