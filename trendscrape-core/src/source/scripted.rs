//! Scripted in-memory trends source.
//!
//! Responses are queued per timeframe. A timeframe with nothing queued gets a
//! deterministic synthetic table: one point per day for single-month windows,
//! one point per month start for longer windows. Every `build_payload` call is
//! logged so callers can assert exactly which windows hit the "network".

use super::provider::{InterestPoint, PayloadRequest, TrendsError, TrendsProvider, TrendsSession};
use crate::window::QueryWindow;
use chrono::Datelike;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// One scripted reaction to a payload request.
#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
    /// Accept the payload and serve these points.
    Points(Vec<InterestPoint>),
    /// Accept the payload and serve the synthetic table.
    Synthetic,
    /// Reject `build_payload` with HTTP 429.
    RateLimited,
    /// Accept the payload, then reject `interest_over_time` with HTTP 429.
    RateLimitedOnRead,
    /// Fail `build_payload` with a non-retryable network error.
    NetworkDown,
}

#[derive(Debug, Default)]
struct ScriptState {
    queued: HashMap<String, VecDeque<Scripted>>,
    payload_calls: Vec<String>,
    sessions_opened: usize,
}

/// In-memory [`TrendsProvider`].
#[derive(Debug, Default, Clone)]
pub struct ScriptedProvider {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue reactions for `timeframe`, consumed one per `build_payload`.
    pub fn script(&self, timeframe: &str, reactions: impl IntoIterator<Item = Scripted>) {
        self.lock()
            .queued
            .entry(timeframe.to_string())
            .or_default()
            .extend(reactions);
    }

    /// Timeframes passed to `build_payload`, in call order.
    pub fn payload_calls(&self) -> Vec<String> {
        self.lock().payload_calls.clone()
    }

    /// Number of `build_payload` calls for `timeframe`.
    pub fn calls_for(&self, timeframe: &str) -> usize {
        self.lock()
            .payload_calls
            .iter()
            .filter(|t| t.as_str() == timeframe)
            .count()
    }

    pub fn sessions_opened(&self) -> usize {
        self.lock().sessions_opened
    }
}

impl TrendsProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open_session(&self) -> Result<Box<dyn TrendsSession>, TrendsError> {
        self.lock().sessions_opened += 1;
        Ok(Box::new(ScriptedSession {
            state: Arc::clone(&self.state),
            pending: None,
        }))
    }
}

enum Pending {
    Points(Vec<InterestPoint>),
    RejectRead,
}

struct ScriptedSession {
    state: Arc<Mutex<ScriptState>>,
    pending: Option<Pending>,
}

impl TrendsSession for ScriptedSession {
    fn build_payload(&mut self, request: &PayloadRequest) -> Result<(), TrendsError> {
        let timeframe = request.timeframe();
        let reaction = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.payload_calls.push(timeframe.clone());
            state
                .queued
                .get_mut(&timeframe)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(Scripted::Synthetic)
        };

        self.pending = None;
        match reaction {
            Scripted::Points(points) => self.pending = Some(Pending::Points(points)),
            Scripted::Synthetic => {
                self.pending = Some(Pending::Points(synthetic_series(&request.window)))
            }
            Scripted::RateLimited => return Err(TrendsError::RateLimited),
            Scripted::RateLimitedOnRead => self.pending = Some(Pending::RejectRead),
            Scripted::NetworkDown => {
                return Err(TrendsError::Network("scripted network failure".into()))
            }
        }
        Ok(())
    }

    fn interest_over_time(&mut self) -> Result<Vec<InterestPoint>, TrendsError> {
        match self.pending.take() {
            Some(Pending::Points(points)) => Ok(points),
            Some(Pending::RejectRead) => Err(TrendsError::RateLimited),
            None => Err(TrendsError::NoPayload),
        }
    }
}

/// Deterministic table for `window`.
///
/// Single-month windows get daily points with values cycling through 1..=100;
/// longer windows get one point per month start with values in 20..=99.
pub fn synthetic_series(window: &QueryWindow) -> Vec<InterestPoint> {
    let months = window.month_starts();
    if months.len() <= 1 {
        window
            .start
            .iter_days()
            .take_while(|d| *d <= window.end)
            .map(|d| InterestPoint::new(d, f64::from((d.ordinal() * 7) % 100 + 1)))
            .collect()
    } else {
        months
            .into_iter()
            .map(|m| InterestPoint::new(m, f64::from((m.month() * 13 + m.year() as u32) % 80 + 20)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unscripted_month_gets_daily_synthetic_points() {
        let window = QueryWindow::month(2004, 2).unwrap();
        let points = synthetic_series(&window);
        assert_eq!(points.len(), 29);
        assert!(points.iter().all(|p| matches!(p.value, Some(v) if (1.0..=100.0).contains(&v))));
    }

    #[test]
    fn long_window_gets_monthly_points() {
        let window = QueryWindow::new(
            QueryWindow::month(2004, 1).unwrap().start,
            QueryWindow::month(2004, 12).unwrap().end,
        )
        .unwrap();
        assert_eq!(synthetic_series(&window).len(), 12);
    }

    #[test]
    fn scripted_reactions_consumed_in_order() {
        let provider = ScriptedProvider::new();
        let window = QueryWindow::month(2004, 3).unwrap();
        provider.script(&window.encode(), [Scripted::RateLimited, Scripted::Synthetic]);

        let req = PayloadRequest::single("debt", 0, "US", window);
        let mut session = provider.open_session().unwrap();
        assert!(matches!(session.build_payload(&req), Err(TrendsError::RateLimited)));
        session.build_payload(&req).unwrap();
        assert_eq!(session.interest_over_time().unwrap().len(), 31);
        assert_eq!(provider.calls_for("2004-03-01 2004-03-31"), 2);
        assert_eq!(provider.sessions_opened(), 1);
    }

    #[test]
    fn read_without_payload_fails() {
        let provider = ScriptedProvider::new();
        let mut session = provider.open_session().unwrap();
        assert!(matches!(session.interest_over_time(), Err(TrendsError::NoPayload)));
    }
}
