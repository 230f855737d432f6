//! Run file loading for the CLI.
//!
//! A run file is JSON:
//!
//! ```json
//! {
//!   "data_dir": "./books",
//!   "source": {
//!     "book_info_url": "https://example.com/api/book/{book_id}",
//!     "chapter_url": "https://example.com/api/book/{book_id}/chapter/{chapter_id}"
//!   },
//!   "acquire": { "workers": 4, "request_interval_ms": 500 },
//!   "plan": { "start_id": "10", "ignore": ["13"] },
//!   "stages": [ { "name": "cleaner" } ]
//! }
//! ```
//!
//! Every field is optional. CLI flags override file values.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bookfetch_core::{
    AcquireOptions, DbOptions, HttpFetcherConfig, PlanFilter, StageConfig, StageEngineOptions,
};
use serde::Deserialize;

/// Acquisition settings of a run file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileAcquire {
    pub workers: Option<usize>,
    pub storage_batch_size: Option<usize>,
    pub retry_times: Option<u32>,
    pub backoff_factor_ms: Option<u64>,
    pub request_interval_ms: Option<u64>,
    pub skip_existing: Option<bool>,
    /// Reuse a cached book info younger than this many seconds.
    pub book_info_ttl_secs: Option<u64>,
}

/// Plan filter of a run file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilePlan {
    pub start_id: Option<String>,
    pub end_id: Option<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub accessible_only: bool,
}

impl FilePlan {
    pub fn to_filter(&self) -> PlanFilter {
        PlanFilter {
            start_id: self.start_id.clone(),
            end_id: self.end_id.clone(),
            ignore: self.ignore.iter().cloned().collect::<HashSet<_>>(),
            accessible_only: self.accessible_only,
        }
    }
}

/// JSON-backed run configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Root directory holding one subdirectory per book.
    pub data_dir: Option<PathBuf>,
    pub source: Option<HttpFetcherConfig>,
    #[serde(default)]
    pub acquire: FileAcquire,
    #[serde(default)]
    pub plan: FilePlan,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    /// Chapters per stage output batch.
    pub stage_batch_size: Option<usize>,
    /// Database pool max connections (1..=20).
    pub db_max_connections: Option<u32>,
    /// Database busy timeout in milliseconds.
    pub db_busy_timeout_ms: Option<u32>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(workers) = self.acquire.workers
            && !(1..=64).contains(&workers)
        {
            bail!("Invalid config value for `acquire.workers`: {workers}. Expected range: 1..=64");
        }
        if self.acquire.storage_batch_size == Some(0) {
            bail!("Invalid config value for `acquire.storage_batch_size`: 0. Expected at least 1");
        }
        if let Some(retry_times) = self.acquire.retry_times
            && retry_times > 10
        {
            bail!("Invalid config value for `acquire.retry_times`: {retry_times}. Expected range: 0..=10");
        }
        if let Some(interval) = self.acquire.request_interval_ms
            && interval > 60_000
        {
            bail!(
                "Invalid config value for `acquire.request_interval_ms`: {interval}. Expected range: 0..=60000"
            );
        }
        if self.stage_batch_size == Some(0) {
            bail!("Invalid config value for `stage_batch_size`: 0. Expected at least 1");
        }
        if let Some(value) = self.db_max_connections
            && !(1..=20).contains(&value)
        {
            bail!("Invalid config value for `db_max_connections`: {value}. Expected range: 1..=20");
        }
        if let Some(value) = self.db_busy_timeout_ms
            && value > 120_000
        {
            bail!("Invalid config value for `db_busy_timeout_ms`: {value}. Expected range: 0..=120000");
        }
        Ok(())
    }

    /// Acquisition options with file values applied over the defaults.
    pub fn acquire_options(&self) -> AcquireOptions {
        let defaults = AcquireOptions::default();
        AcquireOptions {
            workers: self.acquire.workers.unwrap_or(defaults.workers),
            storage_batch_size: self
                .acquire
                .storage_batch_size
                .unwrap_or(defaults.storage_batch_size),
            retry_times: self.acquire.retry_times.unwrap_or(defaults.retry_times),
            backoff_factor: self
                .acquire
                .backoff_factor_ms
                .map_or(defaults.backoff_factor, Duration::from_millis),
            request_interval: self
                .acquire
                .request_interval_ms
                .map_or(defaults.request_interval, Duration::from_millis),
            skip_existing: self.acquire.skip_existing.unwrap_or(defaults.skip_existing),
        }
    }

    pub fn book_info_ttl(&self) -> Duration {
        Duration::from_secs(self.acquire.book_info_ttl_secs.unwrap_or(0))
    }

    pub fn db_options(&self) -> DbOptions {
        let defaults = DbOptions::default();
        DbOptions {
            max_connections: self.db_max_connections.unwrap_or(defaults.max_connections),
            busy_timeout_ms: self.db_busy_timeout_ms.unwrap_or(defaults.busy_timeout_ms),
        }
    }

    pub fn stage_engine_options(&self) -> StageEngineOptions {
        let defaults = StageEngineOptions::default();
        StageEngineOptions {
            batch_size: self.stage_batch_size.unwrap_or(defaults.batch_size),
            db: self.db_options(),
        }
    }
}

/// Loads and validates a run file.
pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: FileConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(config)
}
