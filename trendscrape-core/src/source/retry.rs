//! Backoff policies and the per-call retry primitive.
//!
//! Two independent layers protect against rate limiting:
//!
//! - [`CallRetry`] wraps a single payload request: `base + step * attempt`
//!   between attempts, abandoning once more than `max_attempts` have failed.
//! - [`MonthBackoff`] is applied by the range fetcher when a whole month fails:
//!   a fixed delay, escalated on every `escalate_every`-th consecutive failure.
//!
//! All waiting goes through a [`Sleeper`] so tests can observe delays without
//! blocking.

use super::provider::{InterestPoint, PayloadRequest, TrendsError, TrendsSession};
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Blocking delay capability.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every requested delay, in call order.
    pub fn delays(&self) -> Vec<Duration> {
        self.slept.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn total(&self) -> Duration {
        self.delays().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
    }
}

/// Retry budget for one payload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRetry {
    pub base: Duration,
    pub step: Duration,
    /// The call is abandoned once the failure count exceeds this.
    pub max_attempts: u32,
}

impl Default for CallRetry {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            step: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

impl CallRetry {
    /// Delay after the `attempt`-th failure (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base + self.step * attempt
    }
}

/// Month-level backoff applied between retries of a failed month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthBackoff {
    pub delay: Duration,
    pub escalated_delay: Duration,
    /// Every n-th consecutive failure waits `escalated_delay` instead. 0 disables escalation.
    pub escalate_every: u32,
}

impl Default for MonthBackoff {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(60),
            escalated_delay: Duration::from_secs(300),
            escalate_every: 4,
        }
    }
}

impl MonthBackoff {
    /// Delay after `consecutive` failures in a row (one-based).
    pub fn delay_for(&self, consecutive: u32) -> Duration {
        if self.escalate_every > 0 && consecutive > 0 && consecutive % self.escalate_every == 0 {
            self.escalated_delay
        } else {
            self.delay
        }
    }
}

/// Configure `request` on `session`, retrying rejected payload calls, then read the table.
///
/// Only `build_payload` is retried here. A rejection from `interest_over_time`,
/// or exhaustion of the budget (reported as [`TrendsError::RetriesExhausted`]),
/// is returned to the caller, which owns the month-level retry.
pub fn fetch_with_retry(
    session: &mut dyn TrendsSession,
    request: &PayloadRequest,
    policy: &CallRetry,
    sleeper: &dyn Sleeper,
) -> Result<Vec<InterestPoint>, TrendsError> {
    let timeframe = request.timeframe();
    let mut attempts = 0u32;

    loop {
        match session.build_payload(request) {
            Ok(()) => break,
            Err(err) if err.is_retryable() => {
                let delay = policy.delay(attempts);
                warn!(
                    %timeframe,
                    attempt = attempts + 1,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "payload rejected, trying again"
                );
                sleeper.sleep(delay);
                attempts += 1;
                if attempts > policy.max_attempts {
                    warn!(%timeframe, attempts, "abandoning payload after repeated rejections");
                    return Err(TrendsError::RetriesExhausted { attempts });
                }
            }
            Err(err) => return Err(err),
        }
    }

    session.interest_over_time()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::QueryWindow;
    use chrono::NaiveDate;
    use std::collections::VecDeque;

    /// Session that rejects `build_payload` a fixed number of times.
    struct FlakySession {
        payload_results: VecDeque<Result<(), TrendsError>>,
        payload_calls: u32,
        fetch_calls: u32,
    }

    impl FlakySession {
        fn new(results: Vec<Result<(), TrendsError>>) -> Self {
            Self {
                payload_results: results.into(),
                payload_calls: 0,
                fetch_calls: 0,
            }
        }
    }

    impl TrendsSession for FlakySession {
        fn build_payload(&mut self, _request: &PayloadRequest) -> Result<(), TrendsError> {
            self.payload_calls += 1;
            self.payload_results.pop_front().unwrap_or(Ok(()))
        }

        fn interest_over_time(&mut self) -> Result<Vec<InterestPoint>, TrendsError> {
            self.fetch_calls += 1;
            Ok(vec![InterestPoint::new(
                NaiveDate::from_ymd_opt(2004, 3, 1).unwrap(),
                42.0,
            )])
        }
    }

    fn request() -> PayloadRequest {
        PayloadRequest::single("debt", 0, "US", QueryWindow::month(2004, 3).unwrap())
    }

    #[test]
    fn call_delay_grows_by_step() {
        let policy = CallRetry::default();
        assert_eq!(policy.delay(0), Duration::from_secs(60));
        assert_eq!(policy.delay(1), Duration::from_secs(65));
        assert_eq!(policy.delay(3), Duration::from_secs(75));
    }

    #[test]
    fn month_backoff_escalates_every_fourth_failure() {
        let backoff = MonthBackoff::default();
        let delays: Vec<u64> = (1..=8).map(|n| backoff.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![60, 60, 60, 300, 60, 60, 60, 300]);
    }

    #[test]
    fn succeeds_after_two_rejections() {
        let mut session = FlakySession::new(vec![
            Err(TrendsError::RateLimited),
            Err(TrendsError::RateLimited),
        ]);
        let sleeper = RecordingSleeper::new();

        let points =
            fetch_with_retry(&mut session, &request(), &CallRetry::default(), &sleeper).unwrap();

        assert_eq!(points.len(), 1);
        assert_eq!(session.payload_calls, 3);
        assert_eq!(session.fetch_calls, 1);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(60), Duration::from_secs(65)]
        );
    }

    #[test]
    fn abandons_after_budget_without_reading_table() {
        let mut session = FlakySession::new(
            (0..10).map(|_| Err(TrendsError::RateLimited)).collect(),
        );
        let sleeper = RecordingSleeper::new();

        let err = fetch_with_retry(&mut session, &request(), &CallRetry::default(), &sleeper)
            .unwrap_err();

        assert!(matches!(err, TrendsError::RetriesExhausted { attempts: 4 }));
        assert_eq!(session.payload_calls, 4);
        assert_eq!(session.fetch_calls, 0);
        assert_eq!(sleeper.total(), Duration::from_secs(60 + 65 + 70 + 75));
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let mut session = FlakySession::new(vec![Err(TrendsError::Network("reset".into()))]);
        let sleeper = RecordingSleeper::new();

        let err = fetch_with_retry(&mut session, &request(), &CallRetry::default(), &sleeper)
            .unwrap_err();

        assert!(matches!(err, TrendsError::Network(_)));
        assert_eq!(session.payload_calls, 1);
        assert!(sleeper.delays().is_empty());
    }
}
