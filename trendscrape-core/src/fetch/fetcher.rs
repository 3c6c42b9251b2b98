//! Checkpointed, rate-limited range fetcher.
//!
//! Fetches one keyword's daily interest over a multi-month window:
//!
//! 1. one monthly-granularity query over the whole window (the reference),
//! 2. one daily query per calendar month, each on a fresh session,
//! 3. assembly of every cached month against the reference.
//!
//! The checkpoint is saved after every month that comes back, so a killed run
//! resumes at the last successful month and never re-queries a cached one.
//! A month that keeps failing is retried in place (never skipped) with
//! month-level backoff until it succeeds or an optional failure budget runs out.

use super::assemble::{assemble, Assembled};
use crate::data::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use crate::source::{
    fetch_with_retry, CallRetry, InterestPoint, MonthBackoff, PayloadRequest, Sleeper,
    TrendsError, TrendsProvider,
};
use crate::window::{QueryWindow, WindowError, YearMonth};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// What to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub keyword: String,
    pub window: QueryWindow,
    pub geo: String,
    pub category: u32,
}

impl FetchRequest {
    /// `keyword` from the first day of `start` to the last day of `stop`, US, all categories.
    pub fn new(keyword: &str, start: YearMonth, stop: YearMonth) -> Result<Self, WindowError> {
        Ok(Self::for_window(keyword, QueryWindow::for_range(start, stop)?))
    }

    pub fn for_window(keyword: &str, window: QueryWindow) -> Self {
        Self {
            keyword: keyword.to_string(),
            window,
            geo: "US".to_string(),
            category: 0,
        }
    }

    pub fn with_geo(mut self, geo: &str) -> Self {
        self.geo = geo.to_string();
        self
    }

    pub fn with_category(mut self, category: u32) -> Self {
        self.category = category;
        self
    }

    /// An empty checkpoint for this request.
    pub fn empty_checkpoint(&self) -> Checkpoint {
        Checkpoint::new(&self.keyword, &self.geo, self.window)
    }

    fn payload(&self, window: QueryWindow) -> PayloadRequest {
        PayloadRequest::single(&self.keyword, self.category, &self.geo, window)
    }
}

/// Pacing and retry knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Pause after every month served by the source.
    pub wait_time: Duration,
    pub call_retry: CallRetry,
    pub month_backoff: MonthBackoff,
    /// Stop after this many consecutive month failures. `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            wait_time: Duration::from_secs(5),
            call_retry: CallRetry::default(),
            month_backoff: MonthBackoff::default(),
            max_consecutive_failures: None,
        }
    }
}

/// Counters for one `fetch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Queries sent to the source, monthly reference included.
    pub queries: u32,
    /// Months served from the checkpoint.
    pub cache_hits: u32,
    pub months_fetched: u32,
    /// Failed attempts, monthly reference included.
    pub month_failures: u32,
    /// Why the month loop stopped early, if it did.
    pub halted: Option<String>,
}

#[derive(Debug)]
pub struct FetchReport {
    pub outcome: Assembled,
    /// The checkpoint after this run, handed back to the caller.
    pub checkpoint: Checkpoint,
    pub stats: FetchStats,
}

impl FetchReport {
    pub fn is_complete(&self) -> bool {
        self.outcome.is_complete()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("monthly reference for '{keyword}' could not be fetched: {source}")]
    MonthlyReference {
        keyword: String,
        #[source]
        source: TrendsError,
    },

    #[error("checkpoint belongs to '{found}' ({found_window}), not '{keyword}' ({window})")]
    CheckpointMismatch {
        keyword: String,
        window: QueryWindow,
        found: String,
        found_window: QueryWindow,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Drives one keyword's fetch over a provider.
pub struct RangeFetcher<'a> {
    provider: &'a dyn TrendsProvider,
    sleeper: &'a dyn Sleeper,
    options: FetchOptions,
}

impl<'a> RangeFetcher<'a> {
    pub fn new(provider: &'a dyn TrendsProvider, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            provider,
            sleeper,
            options: FetchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Fetch `request`, resuming from `checkpoint` and saving progress to `store`.
    ///
    /// Returns `Err` only when nothing can be assembled (the monthly reference
    /// failed for good) or the checkpoint cannot be saved. Months that could not be fetched make
    /// the outcome [`Assembled::Incomplete`].
    pub fn fetch(
        &self,
        request: &FetchRequest,
        mut checkpoint: Checkpoint,
        store: &mut dyn CheckpointStore,
    ) -> Result<FetchReport, FetchError> {
        if !checkpoint.belongs_to(&request.keyword, &request.geo, &request.window) {
            return Err(FetchError::CheckpointMismatch {
                keyword: request.keyword.clone(),
                window: request.window,
                found: checkpoint.keyword.clone(),
                found_window: checkpoint.window,
            });
        }

        let keyword = request.keyword.as_str();
        let mut stats = FetchStats::default();

        if checkpoint.monthly.is_none() {
            let monthly = self.fetch_reference(request, &mut stats)?;
            checkpoint.monthly = Some(monthly);
            checkpoint.touch();
            store.save(&checkpoint)?;
            self.sleeper.sleep(self.options.wait_time);
        } else {
            debug!(keyword, "reusing cached monthly reference");
        }

        let months = request.window.month_windows();
        let resume_at = checkpoint
            .last_successful_month
            .and_then(|last| months.iter().position(|m| m.contains(last)))
            .unwrap_or(0);
        let mut index = match months[..resume_at]
            .iter()
            .position(|m| !checkpoint.has_segment(m))
        {
            Some(gap) => {
                warn!(
                    keyword,
                    timeframe = %months[gap],
                    "month before the last successful one is missing, resuming there"
                );
                gap
            }
            None => resume_at,
        };
        let mut consecutive_failures = 0u32;

        while index < months.len() {
            let month = months[index];
            let timeframe = month.encode();

            if checkpoint.has_segment(&month) {
                debug!(keyword, %timeframe, "month served from checkpoint");
                stats.cache_hits += 1;
                checkpoint.last_successful_month = Some(month.start);
                index += 1;
                continue;
            }

            info!(keyword, %timeframe, "fetching month");
            stats.queries += 1;
            match self.query(request, month) {
                Ok(points) => {
                    checkpoint.insert_segment(&month, points);
                    checkpoint.last_successful_month = Some(month.start);
                    checkpoint.touch();
                    store.save(&checkpoint)?;

                    stats.months_fetched += 1;
                    consecutive_failures = 0;
                    index += 1;
                    self.sleeper.sleep(self.options.wait_time);
                }
                Err(err) if err.is_retryable() => {
                    stats.month_failures += 1;
                    consecutive_failures += 1;

                    if let Some(limit) = self.options.max_consecutive_failures {
                        if consecutive_failures >= limit {
                            warn!(
                                keyword,
                                %timeframe,
                                consecutive_failures,
                                "giving up on month after repeated failures"
                            );
                            stats.halted = Some(format!(
                                "{timeframe}: {consecutive_failures} consecutive failures, last: {err}"
                            ));
                            break;
                        }
                    }

                    let delay = self.options.month_backoff.delay_for(consecutive_failures);
                    warn!(
                        keyword,
                        %timeframe,
                        consecutive_failures,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "month failed, backing off"
                    );
                    self.sleeper.sleep(delay);
                }
                Err(err) => {
                    warn!(keyword, %timeframe, error = %err, "month failed with unrecoverable error");
                    stats.month_failures += 1;
                    stats.halted = Some(format!("{timeframe}: {err}"));
                    break;
                }
            }
        }

        let outcome = assemble(&checkpoint);
        match &outcome {
            Assembled::Complete(series) => {
                info!(keyword, rows = series.len(), "range fetched")
            }
            Assembled::Incomplete { missing_months, .. } => {
                warn!(keyword, missing = missing_months.len(), "range incomplete")
            }
        }

        Ok(FetchReport {
            outcome,
            checkpoint,
            stats,
        })
    }

    /// The monthly reference over the whole window, backing off between
    /// rejected attempts the same way a failing month does.
    fn fetch_reference(
        &self,
        request: &FetchRequest,
        stats: &mut FetchStats,
    ) -> Result<Vec<InterestPoint>, FetchError> {
        let keyword = request.keyword.as_str();
        let mut consecutive_failures = 0u32;

        loop {
            info!(keyword, window = %request.window, "fetching monthly reference");
            stats.queries += 1;
            let err = match self.query(request, request.window) {
                Ok(points) => return Ok(points),
                Err(err) => err,
            };

            stats.month_failures += 1;
            consecutive_failures += 1;
            let limit_hit = self
                .options
                .max_consecutive_failures
                .is_some_and(|limit| consecutive_failures >= limit);
            if !err.is_retryable() || limit_hit {
                return Err(FetchError::MonthlyReference {
                    keyword: keyword.to_string(),
                    source: err,
                });
            }

            let delay = self.options.month_backoff.delay_for(consecutive_failures);
            warn!(
                keyword,
                consecutive_failures,
                delay_secs = delay.as_secs(),
                error = %err,
                "monthly reference failed, backing off"
            );
            self.sleeper.sleep(delay);
        }
    }

    /// One query on a fresh session.
    fn query(
        &self,
        request: &FetchRequest,
        window: QueryWindow,
    ) -> Result<Vec<InterestPoint>, TrendsError> {
        let mut session = self.provider.open_session()?;
        fetch_with_retry(
            session.as_mut(),
            &request.payload(window),
            &self.options.call_retry,
            self.sleeper,
        )
    }
}
