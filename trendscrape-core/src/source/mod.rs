//! Trends sources and the retry machinery around them.

pub mod google;
pub mod provider;
pub mod retry;
pub mod scripted;

pub use google::{GoogleTrendsConfig, GoogleTrendsProvider};
pub use provider::{InterestPoint, PayloadRequest, TrendsError, TrendsProvider, TrendsSession};
pub use retry::{
    fetch_with_retry, CallRetry, MonthBackoff, RecordingSleeper, Sleeper, ThreadSleeper,
};
pub use scripted::{Scripted, ScriptedProvider};
