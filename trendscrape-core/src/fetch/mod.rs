//! Range fetching and assembly.

pub mod assemble;
pub mod fetcher;

pub use assemble::{assemble, scale_daily, Assembled, AssembledRow, TrendSeries};
pub use fetcher::{FetchError, FetchOptions, FetchReport, FetchRequest, FetchStats, RangeFetcher};
