//! Trends source trait and structured error types.
//!
//! The provider abstracts over where interest-over-time tables come from (the
//! Google Trends web API, or a scripted in-memory source) so the fetch loop can
//! be exercised without the network.
//!
//! A provider hands out short-lived sessions. A session is first configured with
//! a payload (keywords, category, region, timeframe) and then asked for the
//! table. Either call may be rejected with a rate-limit error.

use crate::window::QueryWindow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One day (or week/month, depending on window length) of search interest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterestPoint {
    pub date: NaiveDate,
    /// Unscaled interest, 0-100 relative to the peak inside the queried window.
    pub value: Option<f64>,
    /// Set by the source on the trailing point of a window that is still open.
    #[serde(default)]
    pub is_partial: bool,
}

impl InterestPoint {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self {
            date,
            value: Some(value),
            is_partial: false,
        }
    }

    pub fn missing(date: NaiveDate) -> Self {
        Self {
            date,
            value: None,
            is_partial: false,
        }
    }
}

/// Query configuration submitted to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRequest {
    pub keywords: Vec<String>,
    pub category: u32,
    pub geo: String,
    pub window: QueryWindow,
    /// Google property filter (`""` for web search, `"news"`, `"youtube"`, ...).
    pub property: String,
}

impl PayloadRequest {
    /// Single-keyword web-search request.
    pub fn single(keyword: &str, category: u32, geo: &str, window: QueryWindow) -> Self {
        Self {
            keywords: vec![keyword.to_string()],
            category,
            geo: geo.to_string(),
            window,
            property: String::new(),
        }
    }

    pub fn timeframe(&self) -> String {
        self.window.encode()
    }
}

/// Structured error types for trends queries.
#[derive(Debug, Error)]
pub enum TrendsError {
    #[error("rate limited by trends source (HTTP 429)")]
    RateLimited,

    #[error("unexpected response status {status} from {endpoint}")]
    Response { status: u16, endpoint: String },

    #[error("gave up after {attempts} rejected attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("no payload configured: build_payload must succeed before interest_over_time")]
    NoPayload,

    #[error("network unreachable: {0}")]
    Network(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),
}

impl TrendsError {
    /// Whether the error belongs to the rejected-response class that the fetch
    /// loop backs off from and retries.
    ///
    /// Every non-success HTTP status lands here, not only 429, because the
    /// source rejects throttled clients with assorted statuses.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrendsError::RateLimited
                | TrendsError::Response { .. }
                | TrendsError::RetriesExhausted { .. }
        )
    }
}

/// A configured-then-queried conversation with the source.
pub trait TrendsSession {
    /// Configure the next query. Must succeed before [`interest_over_time`](Self::interest_over_time).
    fn build_payload(&mut self, request: &PayloadRequest) -> Result<(), TrendsError>;

    /// Fetch the interest-over-time table for the configured payload.
    fn interest_over_time(&mut self) -> Result<Vec<InterestPoint>, TrendsError>;
}

/// Trait for trends sources.
///
/// Every call to [`open_session`](Self::open_session) must return a session
/// with no cookies, tokens or other state shared with earlier sessions.
pub trait TrendsProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Start a fresh session.
    fn open_session(&self) -> Result<Box<dyn TrendsSession>, TrendsError>;
}
