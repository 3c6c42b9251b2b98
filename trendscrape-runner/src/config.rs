//! Serializable run configuration.
//!
//! ```toml
//! [fetch]
//! keywords_file = "final_keywords.csv"
//! start = "2004-01"
//! stop = "2011-12"
//! geo = "US"
//! wait_secs = 10.0
//!
//! [batch]
//! keyword_delay_secs = 60.0
//! checkpoint_dir = "checkpoints"
//! output_dir = "data"
//! merge = true
//!
//! [source]
//! hl = "en-US"
//! tz = 360
//! ```
//!
//! Every field has a default; an empty file is a valid config.

use crate::batch::{BatchOptions, BatchPlan};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use trendscrape_core::data::{load_keywords, OutputFormat, SinkError};
use trendscrape_core::fetch::FetchOptions;
use trendscrape_core::source::GoogleTrendsConfig;
use trendscrape_core::window::{QueryWindow, WindowError, YearMonth};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error("failed to load keywords: {0}")]
    Keywords(#[from] SinkError),
}

/// Complete configuration of a batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub fetch: FetchConfig,
    pub batch: BatchConfig,
    pub source: SourceConfig,
}

/// What to fetch and how fast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Inline keywords. Used together with `keywords_file` when both are set.
    pub keywords: Vec<String>,
    pub keywords_file: Option<PathBuf>,
    pub start: YearMonth,
    pub stop: YearMonth,
    pub geo: String,
    pub category: u32,
    /// Pause after every month served by the source.
    pub wait_secs: f64,
    pub max_consecutive_failures: Option<u32>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            keywords_file: None,
            start: YearMonth { year: 2004, month: 1 },
            stop: YearMonth { year: 2011, month: 12 },
            geo: "US".to_string(),
            category: 0,
            wait_secs: 10.0,
            max_consecutive_failures: None,
        }
    }
}

/// Where things go between and after keywords.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    pub keyword_delay_secs: f64,
    pub checkpoint_dir: PathBuf,
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    /// Merge every keyword's output into one wide CSV at the end.
    pub merge: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            keyword_delay_secs: 60.0,
            checkpoint_dir: PathBuf::from("checkpoints"),
            output_dir: PathBuf::from("data"),
            format: OutputFormat::Csv,
            merge: false,
        }
    }
}

/// Google Trends connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: Option<String>,
    pub hl: String,
    pub tz: i32,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        let google = GoogleTrendsConfig::default();
        Self {
            base_url: None,
            hl: google.hl,
            tz: google.tz,
            timeout_secs: google.timeout.as_secs(),
        }
    }
}

impl RunConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject values the fetcher cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window()?;
        check_secs("fetch.wait_secs", self.fetch.wait_secs)?;
        check_secs("batch.keyword_delay_secs", self.batch.keyword_delay_secs)?;
        if self.fetch.geo.trim().is_empty() {
            return Err(ConfigError::Invalid("fetch.geo must not be empty".into()));
        }
        if self.fetch.max_consecutive_failures == Some(0) {
            return Err(ConfigError::Invalid(
                "fetch.max_consecutive_failures must be at least 1".into(),
            ));
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::Invalid("source.timeout_secs must be positive".into()));
        }
        Ok(())
    }

    /// `[first day of start, last day of stop]`.
    pub fn window(&self) -> Result<QueryWindow, ConfigError> {
        Ok(QueryWindow::for_range(self.fetch.start, self.fetch.stop)?)
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            wait_time: secs(self.fetch.wait_secs),
            max_consecutive_failures: self.fetch.max_consecutive_failures,
            ..FetchOptions::default()
        }
    }

    pub fn google_config(&self) -> GoogleTrendsConfig {
        let defaults = GoogleTrendsConfig::default();
        GoogleTrendsConfig {
            base_url: self.source.base_url.clone().unwrap_or(defaults.base_url),
            hl: self.source.hl.clone(),
            tz: self.source.tz,
            timeout: Duration::from_secs(self.source.timeout_secs),
        }
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            keyword_delay: secs(self.batch.keyword_delay_secs),
            checkpoint_dir: self.batch.checkpoint_dir.clone(),
            output_dir: self.batch.output_dir.clone(),
            format: self.batch.format,
            merge: self.batch.merge,
        }
    }

    /// Inline keywords followed by those in `keywords_file`, de-duplicated.
    pub fn resolve_keywords(&self) -> Result<Vec<String>, ConfigError> {
        let mut all = self.fetch.keywords.clone();
        if let Some(path) = &self.fetch.keywords_file {
            all.extend(load_keywords(path)?);
        }
        let keywords = trendscrape_core::data::dedup_keywords(all);
        if keywords.is_empty() {
            return Err(ConfigError::Invalid(
                "no keywords: set fetch.keywords or fetch.keywords_file".into(),
            ));
        }
        Ok(keywords)
    }

    /// Everything a batch run needs, validated.
    pub fn plan(&self) -> Result<BatchPlan, ConfigError> {
        self.validate()?;
        Ok(BatchPlan {
            keywords: self.resolve_keywords()?,
            window: self.window()?,
            geo: self.fetch.geo.trim().to_string(),
            category: self.fetch.category,
            fetch: self.fetch_options(),
            batch: self.batch_options(),
        })
    }
}

fn check_secs(field: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::Invalid(format!(
            "{field} must be a non-negative number of seconds, got {value}"
        )));
    }
    Ok(())
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}
