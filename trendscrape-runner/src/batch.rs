//! Multi-keyword batch driver.
//!
//! Keywords are fetched one after another, each with its own checkpoint file:
//! 1. load the keyword's checkpoint (absent, foreign or corrupt → start fresh)
//! 2. run the range fetcher
//! 3. complete → write `data_{keyword}.{ext}`, then delete the checkpoint;
//!    incomplete → keep the checkpoint, write nothing
//!
//! One keyword failing never stops the batch.

use crate::merge::{merge_keyword_files, MergeSummary};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use trendscrape_core::data::{
    series_file_name, write_series, Checkpoint, CheckpointError, CheckpointStore,
    FileCheckpointStore, OutputFormat,
};
use trendscrape_core::fetch::{Assembled, FetchOptions, FetchRequest, RangeFetcher};
use trendscrape_core::source::{Sleeper, TrendsProvider};
use trendscrape_core::window::QueryWindow;

/// Batch-level settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    /// Pause between keywords (not after the last).
    pub keyword_delay: Duration,
    pub checkpoint_dir: PathBuf,
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub merge: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            keyword_delay: Duration::from_secs(60),
            checkpoint_dir: PathBuf::from("checkpoints"),
            output_dir: PathBuf::from("data"),
            format: OutputFormat::Csv,
            merge: false,
        }
    }
}

/// A fully resolved batch: keywords, range and pacing.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    pub keywords: Vec<String>,
    pub window: QueryWindow,
    pub geo: String,
    pub category: u32,
    pub fetch: FetchOptions,
    pub batch: BatchOptions,
}

impl BatchPlan {
    fn request(&self, keyword: &str) -> FetchRequest {
        FetchRequest::for_window(keyword, self.window)
            .with_geo(&self.geo)
            .with_category(self.category)
    }
}

/// What happened to one keyword.
#[derive(Debug, Clone, PartialEq)]
pub enum KeywordOutcome {
    /// Full range written to `path`; checkpoint removed.
    Saved { path: PathBuf, rows: usize },
    /// Some months still missing; checkpoint kept for the next run.
    Incomplete {
        missing_months: Vec<QueryWindow>,
        halted: Option<String>,
    },
    Failed { reason: String },
}

/// Progress callback for batch runs.
pub trait BatchProgress {
    fn on_start(&self, keyword: &str, index: usize, total: usize);

    fn on_complete(&self, keyword: &str, index: usize, total: usize, outcome: &KeywordOutcome);

    fn on_batch_complete(&self, summary: &BatchSummary);
}

/// Prints progress lines to stdout.
pub struct StdoutProgress;

impl BatchProgress for StdoutProgress {
    fn on_start(&self, keyword: &str, index: usize, total: usize) {
        println!("[{}/{}] Fetching {keyword}...", index + 1, total);
    }

    fn on_complete(&self, keyword: &str, _index: usize, _total: usize, outcome: &KeywordOutcome) {
        match outcome {
            KeywordOutcome::Saved { path, rows } => {
                println!("  OK: {keyword}: {rows} days saved to {}", path.display())
            }
            KeywordOutcome::Incomplete { missing_months, .. } => println!(
                "  INCOMPLETE: {keyword}: {} month(s) missing, checkpoint kept",
                missing_months.len()
            ),
            KeywordOutcome::Failed { reason } => println!("  FAIL: {keyword}: {reason}"),
        }
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        println!(
            "\n{} keywords gathered out of {} total keywords ({:.2}% complete), {} incomplete, {} failed",
            summary.completed.len(),
            summary.total,
            summary.percent_complete(),
            summary.incomplete.len(),
            summary.failed.len(),
        );
        if let Some(merge) = &summary.merged {
            println!(
                "Merged {} keyword(s) into {}",
                merge.merged.len(),
                merge.path.display()
            );
        }
    }
}

/// Progress reporter that does nothing.
pub struct SilentProgress;

impl BatchProgress for SilentProgress {
    fn on_start(&self, _keyword: &str, _index: usize, _total: usize) {}
    fn on_complete(&self, _keyword: &str, _index: usize, _total: usize, _outcome: &KeywordOutcome) {
    }
    fn on_batch_complete(&self, _summary: &BatchSummary) {}
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: Vec<String>,
    pub incomplete: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub merged: Option<MergeSummary>,
}

impl BatchSummary {
    pub fn all_complete(&self) -> bool {
        self.completed.len() == self.total
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed.len() as f64 / self.total as f64 * 100.0
    }
}

/// Fetch every keyword of `plan` in order.
pub fn run_batch(
    plan: &BatchPlan,
    provider: &dyn TrendsProvider,
    sleeper: &dyn Sleeper,
    progress: &dyn BatchProgress,
) -> BatchSummary {
    let fetcher = RangeFetcher::new(provider, sleeper).with_options(plan.fetch);
    let total = plan.keywords.len();
    let mut summary = BatchSummary {
        total,
        ..BatchSummary::default()
    };

    info!(
        keywords = total,
        window = %plan.window,
        provider = provider.name(),
        "batch started"
    );

    for (i, keyword) in plan.keywords.iter().enumerate() {
        progress.on_start(keyword, i, total);

        let outcome = run_keyword(plan, &fetcher, keyword).unwrap_or_else(|e| {
            warn!(keyword = keyword.as_str(), error = %format!("{e:#}"), "keyword failed");
            KeywordOutcome::Failed {
                reason: format!("{e:#}"),
            }
        });
        progress.on_complete(keyword, i, total, &outcome);

        match &outcome {
            KeywordOutcome::Saved { .. } => summary.completed.push(keyword.clone()),
            KeywordOutcome::Incomplete { .. } => summary.incomplete.push(keyword.clone()),
            KeywordOutcome::Failed { reason } => {
                summary.failed.push((keyword.clone(), reason.clone()))
            }
        }

        if i + 1 < total {
            info!(
                delay_secs = plan.batch.keyword_delay.as_secs(),
                "pausing before next keyword"
            );
            sleeper.sleep(plan.batch.keyword_delay);
        }
    }

    if plan.batch.merge {
        match merge_keyword_files(&plan.batch.output_dir, &plan.keywords) {
            Ok(merged) => summary.merged = Some(merged),
            Err(e) => warn!(error = %format!("{e:#}"), "merge skipped"),
        }
    }

    progress.on_batch_complete(&summary);
    summary
}

fn run_keyword(
    plan: &BatchPlan,
    fetcher: &RangeFetcher<'_>,
    keyword: &str,
) -> Result<KeywordOutcome> {
    let request = plan.request(keyword);
    let mut store = FileCheckpointStore::for_keyword(&plan.batch.checkpoint_dir, keyword);
    let checkpoint = load_or_fresh(&store, &request)?;

    let report = fetcher
        .fetch(&request, checkpoint, &mut store)
        .with_context(|| format!("fetching '{keyword}'"))?;

    match report.outcome {
        Assembled::Complete(series) => {
            let path = plan
                .batch
                .output_dir
                .join(series_file_name(keyword, plan.batch.format));
            write_series(&series, &path)
                .with_context(|| format!("writing {}", path.display()))?;
            store
                .clear()
                .with_context(|| format!("removing checkpoint {}", store.path().display()))?;
            info!(keyword, path = %path.display(), rows = series.len(), "keyword saved");
            Ok(KeywordOutcome::Saved {
                path,
                rows: series.len(),
            })
        }
        Assembled::Incomplete { missing_months, .. } => {
            warn!(
                keyword,
                missing = missing_months.len(),
                "data gathering incomplete, keeping checkpoint"
            );
            Ok(KeywordOutcome::Incomplete {
                missing_months,
                halted: report.stats.halted,
            })
        }
    }
}

/// The stored checkpoint if it belongs to `request`, otherwise an empty one.
fn load_or_fresh(store: &FileCheckpointStore, request: &FetchRequest) -> Result<Checkpoint> {
    match store.load() {
        Ok(Some(cp)) if cp.belongs_to(&request.keyword, &request.geo, &request.window) => {
            info!(
                keyword = request.keyword.as_str(),
                months_cached = cp.months_cached(),
                "resuming from checkpoint"
            );
            Ok(cp)
        }
        Ok(Some(cp)) => {
            warn!(
                keyword = request.keyword.as_str(),
                found = cp.keyword.as_str(),
                found_window = %cp.window,
                "checkpoint is for a different request, starting fresh"
            );
            Ok(request.empty_checkpoint())
        }
        Ok(None) => Ok(request.empty_checkpoint()),
        Err(CheckpointError::Corrupt { path, reason }) => {
            warn!(path = %path.display(), %reason, "checkpoint unreadable, starting fresh");
            store.quarantine().context("quarantining corrupt checkpoint")?;
            Ok(request.empty_checkpoint())
        }
        Err(e) => Err(e).context("loading checkpoint"),
    }
}
