//! Google Trends data provider.
//!
//! Talks to the unofficial web endpoints the Trends UI uses:
//!
//! 1. `GET /?geo=..` to pick up the `NID` cookie,
//! 2. `GET /trends/api/explore` to exchange a comparison request for widget tokens,
//! 3. `GET /trends/api/widgetdata/multiline` with the `TIMESERIES` widget's
//!    request and token to get the interest-over-time table.
//!
//! Every JSON body is preceded by an anti-hijacking prefix (`)]}'`), stripped
//! before parsing. The API is undocumented and changes without notice; format
//! surprises surface as [`TrendsError::ResponseFormatChanged`].

use super::provider::{InterestPoint, PayloadRequest, TrendsError, TrendsProvider, TrendsSession};
use chrono::DateTime;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://trends.google.com";
const EXPLORE_PATH: &str = "/trends/api/explore";
const MULTILINE_PATH: &str = "/trends/api/widgetdata/multiline";
const TIMESERIES_WIDGET: &str = "TIMESERIES";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Connection settings for [`GoogleTrendsProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleTrendsConfig {
    pub base_url: String,
    /// Host language, e.g. `en-US`.
    pub hl: String,
    /// Timezone offset in minutes, as the Trends UI sends it (360 = US Central).
    pub tz: i32,
    pub timeout: Duration,
}

impl Default for GoogleTrendsConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            hl: "en-US".to_string(),
            tz: 360,
            timeout: Duration::from_secs(30),
        }
    }
}

/// `explore` response: one widget per chart on the Trends page.
#[derive(Debug, Deserialize)]
struct ExploreResponse {
    widgets: Vec<Widget>,
}

#[derive(Debug, Clone, Deserialize)]
struct Widget {
    id: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    request: Value,
}

/// `widgetdata/multiline` response.
#[derive(Debug, Deserialize)]
struct MultilineResponse {
    default: MultilineDefault,
}

#[derive(Debug, Deserialize)]
struct MultilineDefault {
    #[serde(rename = "timelineData", default)]
    timeline_data: Vec<TimelinePoint>,
}

#[derive(Debug, Deserialize)]
struct TimelinePoint {
    /// Unix seconds, as a string.
    time: String,
    #[serde(default)]
    value: Vec<f64>,
    #[serde(rename = "isPartial", default)]
    is_partial: bool,
}

/// Google Trends provider. Each session gets its own HTTP client and cookie jar.
pub struct GoogleTrendsProvider {
    config: GoogleTrendsConfig,
}

impl GoogleTrendsProvider {
    pub fn new(config: GoogleTrendsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GoogleTrendsConfig {
        &self.config
    }
}

impl Default for GoogleTrendsProvider {
    fn default() -> Self {
        Self::new(GoogleTrendsConfig::default())
    }
}

impl TrendsProvider for GoogleTrendsProvider {
    fn name(&self) -> &str {
        "google_trends"
    }

    fn open_session(&self) -> Result<Box<dyn TrendsSession>, TrendsError> {
        let session = GoogleTrendsSession::connect(self.config.clone())?;
        Ok(Box::new(session))
    }
}

/// One cookie jar plus the most recent `TIMESERIES` widget.
pub struct GoogleTrendsSession {
    client: Client,
    config: GoogleTrendsConfig,
    widget: Option<Widget>,
}

impl GoogleTrendsSession {
    /// Build a client and pick up session cookies from the Trends home page.
    pub fn connect(config: GoogleTrendsConfig) -> Result<Self, TrendsError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .build()
            .map_err(|e| TrendsError::Network(format!("failed to build HTTP client: {e}")))?;

        let geo = config.hl.rsplit('-').next().unwrap_or("US").to_string();
        let resp = client
            .get(format!("{}/", config.base_url))
            .query(&[("geo", geo.as_str())])
            .send()
            .map_err(network_error)?;
        check_status(resp.status(), "cookie bootstrap")?;
        debug!(base_url = %config.base_url, "trends session opened");

        Ok(Self {
            client,
            config,
            widget: None,
        })
    }

    fn get_text(&self, path: &str, query: &[(&str, String)]) -> Result<String, TrendsError> {
        let resp = self
            .client
            .get(format!("{}{path}", self.config.base_url))
            .query(query)
            .send()
            .map_err(network_error)?;
        check_status(resp.status(), path)?;
        resp.text().map_err(network_error)
    }
}

impl TrendsSession for GoogleTrendsSession {
    fn build_payload(&mut self, request: &PayloadRequest) -> Result<(), TrendsError> {
        self.widget = None;
        let body = self.get_text(
            EXPLORE_PATH,
            &[
                ("hl", self.config.hl.clone()),
                ("tz", self.config.tz.to_string()),
                ("req", explore_request(request).to_string()),
            ],
        )?;
        self.widget = Some(parse_explore(&body)?);
        Ok(())
    }

    fn interest_over_time(&mut self) -> Result<Vec<InterestPoint>, TrendsError> {
        let widget = self.widget.as_ref().ok_or(TrendsError::NoPayload)?;
        let token = widget.token.clone().ok_or_else(|| {
            TrendsError::ResponseFormatChanged("TIMESERIES widget has no token".into())
        })?;
        let body = self.get_text(
            MULTILINE_PATH,
            &[
                ("hl", self.config.hl.clone()),
                ("tz", self.config.tz.to_string()),
                ("req", widget.request.to_string()),
                ("token", token),
            ],
        )?;
        parse_multiline(&body)
    }
}

/// Comparison request JSON for the `explore` endpoint.
fn explore_request(request: &PayloadRequest) -> Value {
    let timeframe = request.timeframe();
    let items: Vec<Value> = request
        .keywords
        .iter()
        .map(|kw| json!({ "keyword": kw, "time": timeframe, "geo": request.geo }))
        .collect();
    json!({
        "comparisonItem": items,
        "category": request.category,
        "property": request.property,
    })
}

fn check_status(status: StatusCode, endpoint: &str) -> Result<(), TrendsError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(TrendsError::RateLimited);
    }
    if !status.is_success() {
        return Err(TrendsError::Response {
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
        });
    }
    Ok(())
}

fn network_error(e: reqwest::Error) -> TrendsError {
    TrendsError::Network(e.to_string())
}

/// Drop the `)]}'` guard that precedes every JSON body.
fn strip_guard(body: &str) -> &str {
    body.find('{').map(|i| &body[i..]).unwrap_or(body)
}

fn parse_explore(body: &str) -> Result<Widget, TrendsError> {
    let resp: ExploreResponse = serde_json::from_str(strip_guard(body)).map_err(|e| {
        TrendsError::ResponseFormatChanged(format!("failed to parse explore response: {e}"))
    })?;
    resp.widgets
        .into_iter()
        .find(|w| w.id == TIMESERIES_WIDGET)
        .ok_or_else(|| TrendsError::ResponseFormatChanged("no TIMESERIES widget".into()))
}

fn parse_multiline(body: &str) -> Result<Vec<InterestPoint>, TrendsError> {
    let resp: MultilineResponse = serde_json::from_str(strip_guard(body)).map_err(|e| {
        TrendsError::ResponseFormatChanged(format!("failed to parse multiline response: {e}"))
    })?;

    resp.default
        .timeline_data
        .into_iter()
        .map(|point| {
            let ts: i64 = point.time.parse().map_err(|_| {
                TrendsError::ResponseFormatChanged(format!("invalid timestamp: {}", point.time))
            })?;
            let date = DateTime::from_timestamp(ts, 0)
                .map(|dt| dt.naive_utc().date())
                .ok_or_else(|| {
                    TrendsError::ResponseFormatChanged(format!("timestamp out of range: {ts}"))
                })?;
            Ok(InterestPoint {
                date,
                value: point.value.first().copied(),
                is_partial: point.is_partial,
            })
        })
        .collect()
}
