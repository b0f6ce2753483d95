//! Configuration for the dayline pipeline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DAYLINE_HOME)
//! 2. Config file (`$DAYLINE_HOME/config.yaml`)
//! 3. Defaults (~/.dayline)
//!
//! Every policy constant of the pipeline (batch target, staleness, gap
//! tolerance, coverage threshold, window length, day-boundary offset,
//! retry policy, retention) lives here rather than in code. The defaults
//! are reasonable, not load-bearing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::categories::Category;
use crate::providers::retry::RetryPolicy;

/// Resolved pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory (database, credentials, lock file)
    #[serde(default = "default_home")]
    pub home: PathBuf,

    /// Directory the capture collaborator writes chunk files into
    #[serde(default)]
    pub recordings_dir: Option<PathBuf>,

    #[serde(default)]
    pub batching: BatchingConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub transcription: TranscriptionConfig,

    #[serde(default)]
    pub consolidation: ConsolidationConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub retention: RetentionConfig,

    /// User-defined category list; empty means the built-in set
    #[serde(default)]
    pub categories: Vec<Category>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home: default_home(),
            recordings_dir: None,
            batching: BatchingConfig::default(),
            provider: ProviderConfig::default(),
            transcription: TranscriptionConfig::default(),
            consolidation: ConsolidationConfig::default(),
            retry: RetryPolicy::default(),
            retention: RetentionConfig::default(),
            categories: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration, preferring an explicit path, then
    /// `$DAYLINE_HOME/config.yaml`, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let candidate = default_home().join("config.yaml");
                candidate.exists().then_some(candidate)
            }
        };

        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file: {}", path.display()))?;
                serde_yaml::from_str::<Config>(&content)
                    .with_context(|| format!("failed to parse config file: {}", path.display()))?
            }
            None => Config::default(),
        };

        if let Ok(home) = std::env::var("DAYLINE_HOME") {
            if !home.trim().is_empty() {
                config.home = PathBuf::from(home);
            }
        }

        Ok(config)
    }

    /// Path to the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.home.join("dayline.db")
    }

    /// Directory the capture collaborator writes into.
    pub fn recordings_dir(&self) -> PathBuf {
        self.recordings_dir
            .clone()
            .unwrap_or_else(|| self.home.join("recordings"))
    }
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dayline")
}

/// Batch Builder policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// How often the builder scans for ready segments (seconds)
    #[serde(default = "default_batch_tick")]
    pub tick_secs: u64,

    /// Target accumulated duration before a batch is cut (seconds)
    #[serde(default = "default_target_batch")]
    pub target_batch_secs: u64,

    /// Age of the oldest unbatched segment that forces a partial flush
    #[serde(default = "default_staleness")]
    pub staleness_secs: u64,

    /// Largest timestamp gap still merged into the same batch (seconds)
    #[serde(default = "default_gap_tolerance")]
    pub gap_tolerance_secs: u64,

    /// Nominal chunk length written by the capture collaborator (seconds)
    #[serde(default = "default_chunk")]
    pub chunk_secs: u64,
}

fn default_batch_tick() -> u64 {
    60
}
fn default_target_batch() -> u64 {
    900
}
fn default_staleness() -> u64 {
    1800
}
fn default_gap_tolerance() -> u64 {
    120
}
fn default_chunk() -> u64 {
    15
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_batch_tick(),
            target_batch_secs: default_target_batch(),
            staleness_secs: default_staleness(),
            gap_tolerance_secs: default_gap_tolerance(),
            chunk_secs: default_chunk(),
        }
    }
}

/// Which backend implements the provider contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Single combined HTTP call per operation
    Cloud,

    /// Local engine, many small calls per batch
    Local,
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::Cloud
    }
}

/// Provider backend selection and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Model identifier passed through to the backend
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL for the cloud backend
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Credential key for the cloud backend
    #[serde(default = "default_credential_key")]
    pub credential_key: String,

    /// Engine binary for the local backend
    #[serde(default = "default_engine_binary")]
    pub engine_binary: String,

    /// Per-call timeout (seconds)
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_model() -> String {
    "flash-2".to_string()
}
fn default_endpoint() -> String {
    "https://api.dayline.dev/v1".to_string()
}
fn default_credential_key() -> String {
    "cloud".to_string()
}
fn default_engine_binary() -> String {
    "dayline-engine".to_string()
}
fn default_call_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            model: default_model(),
            endpoint: default_endpoint(),
            credential_key: default_credential_key(),
            engine_binary: default_engine_binary(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

/// Transcription output acceptance policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Minimum fraction of the batch span the observation union must cover
    #[serde(default = "default_min_coverage")]
    pub min_coverage: f64,
}

fn default_min_coverage() -> f64 {
    0.8
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            min_coverage: default_min_coverage(),
        }
    }
}

/// Window Consolidator policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Trailing window length (seconds)
    #[serde(default = "default_window")]
    pub window_secs: u64,

    /// Slack past `now` allowed for in-progress activity (seconds)
    #[serde(default = "default_slack")]
    pub slack_secs: u64,

    /// Hour offset of the logical day boundary from midnight
    #[serde(default = "default_day_start_hour")]
    pub day_start_hour: u32,
}

fn default_window() -> u64 {
    3600
}
fn default_slack() -> u64 {
    300
}
fn default_day_start_hour() -> u32 {
    4
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window(),
            slack_secs: default_slack(),
            day_start_hour: default_day_start_hour(),
        }
    }
}

/// Storage retention and reclaim policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// How long segment rows and chunk files are kept (seconds)
    #[serde(default = "default_segment_ttl")]
    pub segment_ttl_secs: u64,

    /// How often the retention sweep runs (seconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// A `processing` batch older than this is reclaimed to `pending`
    #[serde(default = "default_stale_processing")]
    pub stale_processing_secs: u64,
}

fn default_segment_ttl() -> u64 {
    3 * 24 * 3600
}
fn default_sweep_interval() -> u64 {
    3600
}
fn default_stale_processing() -> u64 {
    600
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            segment_ttl_secs: default_segment_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            stale_processing_secs: default_stale_processing(),
        }
    }
}
