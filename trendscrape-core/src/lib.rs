//! trendscrape core: query windows, trends sources, checkpoints and the range fetcher.
//!
//! - Calendar windows and their `"YYYY-MM-DD YYYY-MM-DD"` encoding
//! - Trends source trait, the Google Trends client and a scripted source
//! - Per-call retry and month-level backoff behind an injectable sleeper
//! - Checkpoint record and stores
//! - Month-by-month range fetcher and assembly of the rescaled daily series
//! - CSV / Parquet output and keyword lists

pub mod data;
pub mod fetch;
pub mod source;
pub mod window;

pub use data::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use fetch::{Assembled, FetchOptions, FetchReport, FetchRequest, RangeFetcher, TrendSeries};
pub use source::{GoogleTrendsProvider, TrendsError, TrendsProvider};
pub use window::{QueryWindow, YearMonth};
