//! End-to-end behaviour of the range fetcher against a scripted source.
//!
//! No test sleeps or touches the network: delays go to a `RecordingSleeper`
//! and queries to a `ScriptedProvider`.

use chrono::NaiveDate;
use std::time::Duration;
use tempfile::TempDir;
use trendscrape_core::data::{
    series_to_csv, Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
};
use trendscrape_core::fetch::{FetchOptions, FetchRequest, RangeFetcher};
use trendscrape_core::source::scripted::synthetic_series;
use trendscrape_core::source::{InterestPoint, RecordingSleeper, Scripted, ScriptedProvider};
use trendscrape_core::window::QueryWindow;

const JAN: &str = "2004-01-01 2004-01-31";
const FEB: &str = "2004-02-01 2004-02-29";
const MAR: &str = "2004-03-01 2004-03-31";

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn request(start: &str, stop: &str) -> FetchRequest {
    FetchRequest::new("debt", start.parse().unwrap(), stop.parse().unwrap()).unwrap()
}

fn options() -> FetchOptions {
    FetchOptions {
        wait_time: Duration::from_secs(1),
        ..FetchOptions::default()
    }
}

fn secs(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_secs).collect()
}

#[test]
fn full_year_has_one_row_per_day() {
    let provider = ScriptedProvider::new();
    let sleeper = RecordingSleeper::new();
    let fetcher = RangeFetcher::new(&provider, &sleeper).with_options(options());
    let req = request("2004-01", "2004-12");

    let report = fetcher
        .fetch(&req, req.empty_checkpoint(), &mut MemoryCheckpointStore::new())
        .unwrap();

    assert!(report.is_complete());
    let series = report.outcome.series();
    assert_eq!(series.len(), 366);
    assert!(series.covers(&req.window));
    assert_eq!(series.first_date(), Some(d(2004, 1, 1)));
    assert_eq!(series.last_date(), Some(d(2004, 12, 31)));
    assert_eq!(report.stats.months_fetched, 12);
}

#[test]
fn rate_limited_month_is_fetched_on_third_attempt() {
    let provider = ScriptedProvider::new();
    provider.script(MAR, [Scripted::RateLimited, Scripted::RateLimited, Scripted::Synthetic]);
    let sleeper = RecordingSleeper::new();
    let fetcher = RangeFetcher::new(&provider, &sleeper).with_options(options());
    let req = request("2004-01", "2004-03");

    let report = fetcher
        .fetch(&req, req.empty_checkpoint(), &mut MemoryCheckpointStore::new())
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(provider.calls_for(JAN), 1);
    assert_eq!(provider.calls_for(FEB), 1);
    assert_eq!(provider.calls_for(MAR), 3);
    assert!(sleeper.total() >= Duration::from_secs(60 + 65));
    assert_eq!(sleeper.delays(), secs(&[1, 1, 1, 60, 65, 1]));
    assert_eq!(report.checkpoint.last_successful_month, Some(d(2004, 3, 1)));
}

#[test]
fn exhausted_month_does_not_advance() {
    let provider = ScriptedProvider::new();
    provider.script(MAR, vec![Scripted::RateLimited; 4]);
    let sleeper = RecordingSleeper::new();
    let fetcher = RangeFetcher::new(&provider, &sleeper).with_options(FetchOptions {
        max_consecutive_failures: Some(1),
        ..options()
    });
    let req = request("2004-01", "2004-03");
    let mut store = MemoryCheckpointStore::new();

    let report = fetcher.fetch(&req, req.empty_checkpoint(), &mut store).unwrap();

    assert!(!report.is_complete());
    assert_eq!(
        report.outcome.missing_months(),
        &[QueryWindow::month(2004, 3).unwrap()]
    );
    assert_eq!(report.checkpoint.last_successful_month, Some(d(2004, 2, 1)));
    assert!(report.checkpoint.segment(MAR).is_none());
    assert_eq!(report.stats.month_failures, 1);
    assert!(report.stats.halted.is_some());

    let saved = store.saved().unwrap();
    assert_eq!(saved.last_successful_month, Some(d(2004, 2, 1)));
    assert_eq!(provider.calls_for(MAR), 4);
}

#[test]
fn exhausted_month_is_retried_until_it_succeeds() {
    let provider = ScriptedProvider::new();
    let mut script = vec![Scripted::RateLimited; 4];
    script.push(Scripted::Synthetic);
    provider.script(MAR, script);
    let sleeper = RecordingSleeper::new();
    let fetcher = RangeFetcher::new(&provider, &sleeper).with_options(options());
    let req = request("2004-01", "2004-03");

    let report = fetcher
        .fetch(&req, req.empty_checkpoint(), &mut MemoryCheckpointStore::new())
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(provider.calls_for(MAR), 5);
    assert_eq!(sleeper.delays(), secs(&[1, 1, 1, 60, 65, 70, 75, 60, 1]));
    assert_eq!(report.stats.month_failures, 1);
}

#[test]
fn month_backoff_escalates_on_fourth_consecutive_failure() {
    let provider = ScriptedProvider::new();
    let mut script = vec![Scripted::RateLimitedOnRead; 5];
    script.push(Scripted::Synthetic);
    provider.script(MAR, script);
    let sleeper = RecordingSleeper::new();
    let fetcher = RangeFetcher::new(&provider, &sleeper).with_options(options());
    let req = request("2004-01", "2004-03");

    let report = fetcher
        .fetch(&req, req.empty_checkpoint(), &mut MemoryCheckpointStore::new())
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(sleeper.delays(), secs(&[1, 1, 1, 60, 60, 60, 300, 60, 1]));
    // one fresh session per attempt, plus the reference and the two good months
    assert_eq!(provider.sessions_opened(), 9);
}

#[test]
fn cached_january_means_only_february_hits_the_network() {
    let req = request("2004-01", "2004-02");
    let jan = QueryWindow::month(2004, 1).unwrap();
    let mut checkpoint = req.empty_checkpoint();
    checkpoint.monthly = Some(synthetic_series(&req.window));
    checkpoint.insert_segment(&jan, synthetic_series(&jan));
    checkpoint.last_successful_month = Some(jan.start);

    let provider = ScriptedProvider::new();
    let sleeper = RecordingSleeper::new();
    let fetcher = RangeFetcher::new(&provider, &sleeper).with_options(options());

    let report = fetcher
        .fetch(&req, checkpoint, &mut MemoryCheckpointStore::new())
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(provider.payload_calls(), vec![FEB.to_string()]);
    assert_eq!(report.stats.cache_hits, 1);
}

#[test]
fn full_checkpoint_makes_no_calls_and_same_output() {
    let req = request("2004-01", "2004-03");
    let sleeper = RecordingSleeper::new();

    let first_provider = ScriptedProvider::new();
    let first = RangeFetcher::new(&first_provider, &sleeper)
        .with_options(options())
        .fetch(&req, req.empty_checkpoint(), &mut MemoryCheckpointStore::new())
        .unwrap();
    assert!(first.is_complete());
    let first_csv = series_to_csv(first.outcome.series()).unwrap();

    let second_provider = ScriptedProvider::new();
    let second = RangeFetcher::new(&second_provider, &sleeper)
        .with_options(options())
        .fetch(&req, first.checkpoint, &mut MemoryCheckpointStore::new())
        .unwrap();

    assert!(second.is_complete());
    assert!(second_provider.payload_calls().is_empty());
    assert_eq!(second_provider.sessions_opened(), 0);
    assert_eq!(second.stats.queries, 0);
    assert_eq!(series_to_csv(second.outcome.series()).unwrap(), first_csv);
}

#[test]
fn gap_before_last_successful_month_is_filled() {
    let req = request("2004-01", "2004-03");
    let feb = QueryWindow::month(2004, 2).unwrap();
    let mut checkpoint = req.empty_checkpoint();
    checkpoint.monthly = Some(synthetic_series(&req.window));
    checkpoint.insert_segment(&feb, synthetic_series(&feb));
    checkpoint.last_successful_month = Some(feb.start);

    let provider = ScriptedProvider::new();
    let sleeper = RecordingSleeper::new();
    let report = RangeFetcher::new(&provider, &sleeper)
        .with_options(options())
        .fetch(&req, checkpoint, &mut MemoryCheckpointStore::new())
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(provider.payload_calls(), vec![JAN.to_string(), MAR.to_string()]);
}

#[test]
fn short_cached_month_is_reused_and_reported_missing() {
    let req = request("2004-01", "2004-02");
    let jan = QueryWindow::month(2004, 1).unwrap();
    let feb = QueryWindow::month(2004, 2).unwrap();
    let mut short = synthetic_series(&jan);
    short.truncate(30);
    let mut checkpoint = req.empty_checkpoint();
    checkpoint.monthly = Some(synthetic_series(&req.window));
    checkpoint.insert_segment(&jan, short);
    checkpoint.insert_segment(&feb, synthetic_series(&feb));
    checkpoint.last_successful_month = Some(feb.start);

    let provider = ScriptedProvider::new();
    let sleeper = RecordingSleeper::new();
    let report = RangeFetcher::new(&provider, &sleeper)
        .with_options(options())
        .fetch(&req, checkpoint, &mut MemoryCheckpointStore::new())
        .unwrap();

    assert!(provider.payload_calls().is_empty());
    assert!(sleeper.delays().is_empty());
    assert_eq!(report.stats.cache_hits, 2);
    assert!(!report.is_complete());
    assert_eq!(report.outcome.missing_months(), &[jan]);
    assert_eq!(report.checkpoint.segment(JAN).unwrap().len(), 30);
}

#[test]
fn missing_monthly_value_carries_previous_scale() {
    let req = request("2004-01", "2004-02");
    let provider = ScriptedProvider::new();
    provider.script(
        "2004-01-01 2004-02-29",
        [Scripted::Points(vec![
            InterestPoint::new(d(2004, 1, 1), 80.0),
            InterestPoint::missing(d(2004, 2, 1)),
        ])],
    );
    let sleeper = RecordingSleeper::new();

    let report = RangeFetcher::new(&provider, &sleeper)
        .with_options(options())
        .fetch(&req, req.empty_checkpoint(), &mut MemoryCheckpointStore::new())
        .unwrap();

    let series = report.outcome.series();
    let feb_10 = series.rows.iter().find(|r| r.date == d(2004, 2, 10)).unwrap();
    assert_eq!(feb_10.monthly, Some(80.0));
    assert_eq!(feb_10.scale, Some(0.8));
}

#[test]
fn killed_run_resumes_from_checkpoint_file() {
    let dir = TempDir::new().unwrap();
    let req = request("2004-01", "2004-03");
    let sleeper = RecordingSleeper::new();

    // First run dies on March.
    let provider = ScriptedProvider::new();
    provider.script(MAR, [Scripted::NetworkDown]);
    let mut store = FileCheckpointStore::for_keyword(dir.path(), "debt");
    let report = RangeFetcher::new(&provider, &sleeper)
        .with_options(options())
        .fetch(&req, req.empty_checkpoint(), &mut store)
        .unwrap();
    assert!(!report.is_complete());

    // Second process: load from disk, only March goes out.
    let mut store = FileCheckpointStore::for_keyword(dir.path(), "debt");
    let checkpoint: Checkpoint = store.load().unwrap().unwrap();
    assert_eq!(checkpoint.last_successful_month, Some(d(2004, 2, 1)));

    let provider = ScriptedProvider::new();
    let report = RangeFetcher::new(&provider, &sleeper)
        .with_options(options())
        .fetch(&req, checkpoint, &mut store)
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(provider.payload_calls(), vec![MAR.to_string()]);
    assert_eq!(
        store.load().unwrap().unwrap().last_successful_month,
        Some(d(2004, 3, 1))
    );
}
