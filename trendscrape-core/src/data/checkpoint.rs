//! Resumable fetch checkpoints.
//!
//! A checkpoint holds everything needed to resume a keyword's range fetch
//! without re-querying completed months:
//! - the monthly reference series (once fetched),
//! - every fetched daily segment, keyed by its encoded month window,
//! - the last month that completed successfully.
//!
//! Layout on disk: `{checkpoint_dir}/{keyword}.checkpoint.json`, one file per
//! keyword, rewritten whole on every save. Writes are atomic (write to `.tmp`,
//! rename into place) so a killed process never leaves a torn file.

use crate::source::InterestPoint;
use crate::window::QueryWindow;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const CHECKPOINT_VERSION: u32 = 1;
const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt checkpoint {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("checkpoint serialization failed: {0}")]
    Serialize(String),
}

/// Persisted progress of one keyword's range fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub keyword: String,
    pub geo: String,
    pub window: QueryWindow,
    /// Monthly-granularity reference over the whole window.
    pub monthly: Option<Vec<InterestPoint>>,
    /// Daily segments keyed by encoded month window.
    pub segments: BTreeMap<String, Vec<InterestPoint>>,
    pub last_successful_month: Option<NaiveDate>,
    pub updated_at: Option<NaiveDateTime>,
}

impl Checkpoint {
    pub fn new(keyword: &str, geo: &str, window: QueryWindow) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            keyword: keyword.to_string(),
            geo: geo.to_string(),
            window,
            monthly: None,
            segments: BTreeMap::new(),
            last_successful_month: None,
            updated_at: None,
        }
    }

    /// Whether this checkpoint was recorded for the same keyword, region and window.
    pub fn belongs_to(&self, keyword: &str, geo: &str, window: &QueryWindow) -> bool {
        self.keyword == keyword && self.geo == geo && self.window == *window
    }

    pub fn segment(&self, timeframe: &str) -> Option<&[InterestPoint]> {
        self.segments.get(timeframe).map(|v| v.as_slice())
    }

    /// Whether `month` was fetched before. Short segments count; assembly reports them.
    pub fn has_segment(&self, month: &QueryWindow) -> bool {
        self.segments.contains_key(&month.encode())
    }

    pub fn insert_segment(&mut self, month: &QueryWindow, points: Vec<InterestPoint>) {
        self.segments.insert(month.encode(), points);
    }

    /// Months of the window that have a segment.
    pub fn months_cached(&self) -> usize {
        self.window
            .month_windows()
            .iter()
            .filter(|m| self.has_segment(m))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.monthly.is_none() && self.segments.is_empty() && self.last_successful_month.is_none()
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(chrono::Local::now().naive_local());
    }
}

/// Durable home of a checkpoint.
pub trait CheckpointStore {
    /// Load the stored checkpoint. An absent checkpoint is `Ok(None)`, never an error.
    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Replace the stored checkpoint.
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Remove the stored checkpoint, if any.
    fn clear(&mut self) -> Result<(), CheckpointError>;
}

/// JSON file store, one file per keyword.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for `keyword` under `dir`: `{dir}/{keyword}.checkpoint.json`.
    pub fn for_keyword(dir: &Path, keyword: &str) -> Self {
        Self::new(dir.join(format!("{}{CHECKPOINT_SUFFIX}", file_stem(keyword))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move a corrupt checkpoint aside (`{file}.quarantined`) so the next load starts fresh.
    pub fn quarantine(&self) -> Result<PathBuf, CheckpointError> {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".quarantined");
        let target = PathBuf::from(name);
        fs::rename(&self.path, &target).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })?;
        warn!(
            path = %self.path.display(),
            quarantined = %target.display(),
            "quarantined corrupt checkpoint"
        );
        Ok(target)
    }

    /// Summaries of every checkpoint file in `dir`, sorted by keyword.
    ///
    /// Unreadable files are reported with `error` set instead of failing the scan.
    pub fn scan(dir: &Path) -> Result<Vec<CheckpointStatus>, CheckpointError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        };

        let mut statuses = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CheckpointError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let is_checkpoint = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(CHECKPOINT_SUFFIX));
            if !is_checkpoint {
                continue;
            }

            let store = FileCheckpointStore::new(&path);
            let status = match store.load() {
                Ok(Some(cp)) => CheckpointStatus::from_checkpoint(&path, &cp),
                Ok(None) => continue,
                Err(e) => CheckpointStatus::unreadable(&path, e.to_string()),
            };
            statuses.push(status);
        }

        statuses.sort_by(|a, b| a.keyword.cmp(&b.keyword));
        Ok(statuses)
    }

    fn io_err(&self, source: io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };

        let checkpoint: Checkpoint =
            serde_json::from_str(&content).map_err(|e| CheckpointError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        if checkpoint.version > CHECKPOINT_VERSION {
            return Err(CheckpointError::Corrupt {
                path: self.path.clone(),
                reason: format!(
                    "unsupported version {} (max supported: {CHECKPOINT_VERSION})",
                    checkpoint.version
                ),
            });
        }

        Ok(Some(checkpoint))
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }

        let json = serde_json::to_vec(checkpoint)
            .map_err(|e| CheckpointError::Serialize(e.to_string()))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, json).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            self.io_err(e)
        })?;

        debug!(
            path = %self.path.display(),
            months = checkpoint.segments.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }
}

/// Process-local store; holds the last saved checkpoint in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryCheckpointStore {
    saved: Option<Checkpoint>,
    saves: usize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            saved: Some(checkpoint),
            saves: 0,
        }
    }

    pub fn saved(&self) -> Option<&Checkpoint> {
        self.saved.as_ref()
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.saved.clone())
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.saved = Some(checkpoint.clone());
        self.saves += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CheckpointError> {
        self.saved = None;
        Ok(())
    }
}

/// One row of `checkpoint status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointStatus {
    pub path: PathBuf,
    pub keyword: String,
    pub window: Option<QueryWindow>,
    pub months_cached: usize,
    pub months_total: usize,
    pub has_monthly: bool,
    pub last_successful_month: Option<NaiveDate>,
    pub updated_at: Option<NaiveDateTime>,
    pub error: Option<String>,
}

impl CheckpointStatus {
    fn from_checkpoint(path: &Path, cp: &Checkpoint) -> Self {
        Self {
            path: path.to_path_buf(),
            keyword: cp.keyword.clone(),
            window: Some(cp.window),
            months_cached: cp.months_cached(),
            months_total: cp.window.month_starts().len(),
            has_monthly: cp.monthly.is_some(),
            last_successful_month: cp.last_successful_month,
            updated_at: cp.updated_at,
            error: None,
        }
    }

    fn unreadable(path: &Path, error: String) -> Self {
        let keyword = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.trim_end_matches(CHECKPOINT_SUFFIX).to_string())
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            keyword,
            window: None,
            months_cached: 0,
            months_total: 0,
            has_monthly: false,
            last_successful_month: None,
            updated_at: None,
            error: Some(error),
        }
    }
}

/// Filesystem-safe form of a keyword: anything outside `[A-Za-z0-9 ._-]` becomes `_`.
pub fn file_stem(keyword: &str) -> String {
    let stem: String = keyword
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        stem
    }
}
