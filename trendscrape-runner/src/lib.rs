//! trendscrape runner: batch orchestration on top of `trendscrape-core`.
//!
//! - TOML run configuration with research defaults
//! - Multi-keyword batch loop with per-keyword checkpoint files
//! - Wide merge of per-keyword outputs

pub mod batch;
pub mod config;
pub mod merge;

pub use batch::{
    run_batch, BatchOptions, BatchPlan, BatchProgress, BatchSummary, KeywordOutcome,
    SilentProgress, StdoutProgress,
};
pub use config::{ConfigError, RunConfig};
pub use merge::{merge_keyword_files, MergeSummary, MERGED_FILE_NAME};
