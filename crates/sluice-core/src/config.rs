//! Configuration system for Sluice.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SLUICE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/sluice/config.toml
//!   3. ~/.config/sluice/config.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SluiceConfig {
    pub admission: AdmissionConfig,
    /// Defaults applied to every queue.
    pub queue: QueueSettings,
    /// Per-queue overrides, keyed by queue name.
    pub queues: BTreeMap<String, QueueOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Total un-dispatched requests across all queues at which intake
    /// starts rejecting new work.
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Max concurrent handler executions. 0 = available parallelism.
    pub workers: usize,
    /// Seconds a request may wait for a response before it is timed out.
    pub expiry_secs: u64,
    /// Seconds between expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Resolve a faulted request immediately with an internal error instead
    /// of leaving it for the expiry sweep.
    pub fail_fast_on_fault: bool,
}

/// Sparse override of [`QueueSettings`] for a single named queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOverride {
    pub workers: Option<usize>,
    pub expiry_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub fail_fast_on_fault: Option<bool>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self { limit: 100 }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            expiry_secs: 30,
            sweep_interval_secs: 5,
            fail_fast_on_fault: false,
        }
    }
}

impl QueueSettings {
    /// Settings with an explicit worker count and the default timings.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Worker count with 0 resolved to the machine's parallelism.
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl QueueOverride {
    fn apply(&self, base: &QueueSettings) -> QueueSettings {
        QueueSettings {
            workers: self.workers.unwrap_or(base.workers),
            expiry_secs: self.expiry_secs.unwrap_or(base.expiry_secs),
            sweep_interval_secs: self.sweep_interval_secs.unwrap_or(base.sweep_interval_secs),
            fail_fast_on_fault: self.fail_fast_on_fault.unwrap_or(base.fail_fast_on_fault),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("sluice")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SluiceConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            SluiceConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SLUICE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&SluiceConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Effective settings for a named queue: defaults with any override applied.
    pub fn queue_settings(&self, name: &str) -> QueueSettings {
        match self.queues.get(name) {
            Some(o) => o.apply(&self.queue),
            None => self.queue.clone(),
        }
    }

    /// Apply SLUICE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("SLUICE_ADMISSION__LIMIT") {
            self.admission.limit = v;
        }
        if let Some(v) = env_parse("SLUICE_QUEUE__WORKERS") {
            self.queue.workers = v;
        }
        if let Some(v) = env_parse("SLUICE_QUEUE__EXPIRY_SECS") {
            self.queue.expiry_secs = v;
        }
        if let Some(v) = env_parse("SLUICE_QUEUE__SWEEP_INTERVAL_SECS") {
            self.queue.sweep_interval_secs = v;
        }
        if let Ok(v) = std::env::var("SLUICE_QUEUE__FAIL_FAST_ON_FAULT") {
            self.queue.fail_fast_on_fault = v == "true" || v == "1";
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
