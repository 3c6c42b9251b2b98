//! Google Trends client against a mock HTTP server.

use chrono::NaiveDate;
use httpmock::{Method::GET, MockServer};
use std::time::Duration;
use trendscrape_core::source::{
    GoogleTrendsConfig, GoogleTrendsProvider, PayloadRequest, TrendsError, TrendsProvider,
};
use trendscrape_core::window::QueryWindow;

const EXPLORE_BODY: &str = r#")]}'
{"widgets":[{"request":{"time":"2004-01-01 2004-01-31","resolution":"DAY"},"token":"tok123","id":"TIMESERIES"}]}"#;

const MULTILINE_BODY: &str = r#")]}',
{"default":{"timelineData":[{"time":"1072915200","value":[41]},{"time":"1073001600","value":[100]},{"time":"1073088000","value":[7]}]}}"#;

fn provider(server: &MockServer) -> GoogleTrendsProvider {
    GoogleTrendsProvider::new(GoogleTrendsConfig {
        base_url: server.base_url(),
        timeout: Duration::from_secs(5),
        ..GoogleTrendsConfig::default()
    })
}

fn request() -> PayloadRequest {
    PayloadRequest::single("debt", 0, "US", QueryWindow::month(2004, 1).unwrap())
}

#[test]
fn session_fetches_interest_over_time() {
    let server = MockServer::start();
    let home = server.mock(|when, then| {
        when.method(GET).path("/").query_param("geo", "US");
        then.status(200)
            .header("set-cookie", "NID=abc; Path=/")
            .body("<html></html>");
    });
    let explore = server.mock(|when, then| {
        when.method(GET)
            .path("/trends/api/explore")
            .query_param("hl", "en-US")
            .query_param("tz", "360")
            .query_param_exists("req");
        then.status(200).body(EXPLORE_BODY);
    });
    let multiline = server.mock(|when, then| {
        when.method(GET)
            .path("/trends/api/widgetdata/multiline")
            .query_param("token", "tok123")
            .query_param_exists("req");
        then.status(200).body(MULTILINE_BODY);
    });

    let provider = provider(&server);
    let mut session = provider.open_session().unwrap();
    session.build_payload(&request()).unwrap();
    let points = session.interest_over_time().unwrap();

    home.assert();
    explore.assert();
    multiline.assert();
    assert_eq!(points.len(), 3);
    assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2004, 1, 1).unwrap());
    assert_eq!(points[1].value, Some(100.0));
}

#[test]
fn explore_429_is_rate_limited() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(GET).path("/trends/api/explore");
        then.status(429);
    });

    let mut session = provider(&server).open_session().unwrap();
    let err = session.build_payload(&request()).unwrap_err();
    assert!(matches!(err, TrendsError::RateLimited));
    assert!(err.is_retryable());
}

#[test]
fn other_failure_status_is_retryable_response_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(GET).path("/trends/api/explore");
        then.status(500);
    });

    let mut session = provider(&server).open_session().unwrap();
    let err = session.build_payload(&request()).unwrap_err();
    assert!(matches!(err, TrendsError::Response { status: 500, .. }));
    assert!(err.is_retryable());
}

#[test]
fn garbage_body_is_format_change() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(GET).path("/trends/api/explore");
        then.status(200).body("<html>captcha</html>");
    });

    let mut session = provider(&server).open_session().unwrap();
    let err = session.build_payload(&request()).unwrap_err();
    assert!(matches!(err, TrendsError::ResponseFormatChanged(_)));
    assert!(!err.is_retryable());
}

#[test]
fn unreachable_host_is_network_error() {
    let provider = GoogleTrendsProvider::new(GoogleTrendsConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        timeout: Duration::from_secs(2),
        ..GoogleTrendsConfig::default()
    });
    let err = provider.open_session().err().unwrap();
    assert!(matches!(err, TrendsError::Network(_)));
}
