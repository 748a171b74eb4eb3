use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::JobError;
use crate::evaluate::MeasuredScan;
use crate::source::parse_start;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "pubguard.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_campaigns_path")]
    pub campaigns_path: PathBuf,
    #[serde(default = "default_events_path")]
    pub events_path: PathBuf,
    /// Events older than this are ignored; see [`parse_start`].
    #[serde(default = "default_start")]
    pub start: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Wipe the counter store again once the run ends, successful or not.
    #[serde(default = "default_true")]
    pub clear_on_completion: bool,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            campaigns_path: default_campaigns_path(),
            events_path: default_events_path(),
            start: default_start(),
            batch_size: default_batch_size(),
            clear_on_completion: default_true(),
            store: StoreConfig::default(),
            evaluation: EvaluationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// SQLite database file; ignored by the memory backend.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Fields examined per scan call.
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            scan_page_size: default_scan_page_size(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub measured_scan: MeasuredScan,
}

impl JobConfig {
    /// Reject settings the run cannot start with.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Config`] naming the offending setting.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), JobError> {
        self.batch_size()?;
        self.page_size()?;
        self.start_timestamp(now)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`JobError::Config`] when `batch_size` is zero.
    pub fn batch_size(&self) -> Result<NonZeroUsize, JobError> {
        NonZeroUsize::new(self.batch_size)
            .ok_or_else(|| JobError::Config("batch_size must be greater than 0".into()))
    }

    /// # Errors
    ///
    /// Returns [`JobError::Config`] when `store.scan_page_size` is zero.
    pub fn page_size(&self) -> Result<NonZeroUsize, JobError> {
        NonZeroUsize::new(self.store.scan_page_size)
            .ok_or_else(|| JobError::Config("store.scan_page_size must be greater than 0".into()))
    }

    /// Start cutoff as unix seconds.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Config`] when `start` cannot be resolved.
    pub fn start_timestamp(&self, now: DateTime<Utc>) -> Result<i64, JobError> {
        parse_start(&self.start, now).map_err(|err| JobError::Config(format!("start: {err}")))
    }
}

/// Load the job configuration.
///
/// An explicit `path` must exist. Without one, `pubguard.toml` in `dir` is
/// used if present and defaults otherwise.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: Option<&Path>, dir: &Path) -> Result<JobConfig> {
    let path = match path {
        Some(explicit) => explicit.to_path_buf(),
        None => {
            let implicit = dir.join(DEFAULT_CONFIG_FILE);
            if !implicit.exists() {
                return Ok(JobConfig::default());
            }
            implicit
        }
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<JobConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn default_campaigns_path() -> PathBuf {
    PathBuf::from("input/campaigns.csv")
}

fn default_events_path() -> PathBuf {
    PathBuf::from("input/events.csv")
}

fn default_start() -> String {
    "2 weeks ago".to_string()
}

const fn default_batch_size() -> usize {
    100
}

const fn default_true() -> bool {
    true
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".pubguard/counters.sqlite3")
}

const fn default_scan_page_size() -> usize {
    10
}

const fn default_lock_timeout_ms() -> u64 {
    5_000
}
