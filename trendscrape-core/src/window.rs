//! Calendar windows for trends queries.
//!
//! Google Trends accepts a timeframe string of the form `"YYYY-MM-DD YYYY-MM-DD"`.
//! Daily granularity is only served for short timeframes, so long ranges are
//! split into month windows (first day to last day of one calendar month).
//! The encoded timeframe doubles as the checkpoint key for a fetched month.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors from building or parsing windows.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("invalid month {year}-{month:02}")]
    InvalidMonth { year: i32, month: u32 },

    #[error("window start {start} is after end {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },

    #[error("malformed timeframe '{0}' (expected 'YYYY-MM-DD YYYY-MM-DD')")]
    MalformedTimeframe(String),

    #[error("malformed year-month '{0}' (expected 'YYYY-MM')")]
    MalformedYearMonth(String),
}

/// First day of the given month.
pub fn first_day_of_month(year: i32, month: u32) -> Result<NaiveDate, WindowError> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or(WindowError::InvalidMonth { year, month })
}

/// Last day of the given month (handles leap years).
pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate, WindowError> {
    let first = first_day_of_month(year, month)?;
    Ok(month_end(first))
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Last day of the month containing `date`.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    month_start(date)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

/// First day of the month following the one containing `date`.
///
/// `None` only at the end of chrono's representable range.
pub fn next_month(date: NaiveDate) -> Option<NaiveDate> {
    month_start(date).checked_add_months(Months::new(1))
}

/// A `(year, month)` pair written as `YYYY-MM` in configs and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, WindowError> {
        first_day_of_month(year, month)?;
        Ok(Self { year, month })
    }

    pub fn first_day(&self) -> Result<NaiveDate, WindowError> {
        first_day_of_month(self.year, self.month)
    }

    pub fn last_day(&self) -> Result<NaiveDate, WindowError> {
        last_day_of_month(self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = WindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || WindowError::MalformedYearMonth(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(malformed)?;
        let year: i32 = year.parse().map_err(|_| malformed())?;
        let month: u32 = month.parse().map_err(|_| malformed())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for YearMonth {
    type Error = WindowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(ym: YearMonth) -> Self {
        ym.to_string()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// A contiguous, inclusive calendar interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl QueryWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// `[first_day(start), last_day(stop)]`.
    pub fn for_range(start: YearMonth, stop: YearMonth) -> Result<Self, WindowError> {
        Self::new(start.first_day()?, stop.last_day()?)
    }

    /// The window of a whole calendar month.
    pub fn month(year: i32, month: u32) -> Result<Self, WindowError> {
        Self::new(first_day_of_month(year, month)?, last_day_of_month(year, month)?)
    }

    /// Canonical timeframe string submitted to the source and used as a memo key.
    pub fn encode(&self) -> String {
        format!(
            "{} {}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn parse(timeframe: &str) -> Result<Self, WindowError> {
        let malformed = || WindowError::MalformedTimeframe(timeframe.to_string());
        let (start, end) = timeframe.trim().split_once(' ').ok_or_else(malformed)?;
        let start = NaiveDate::parse_from_str(start, DATE_FORMAT).map_err(|_| malformed())?;
        let end = NaiveDate::parse_from_str(end.trim(), DATE_FORMAT).map_err(|_| malformed())?;
        Self::new(start, end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of calendar days in the window, both ends included.
    pub fn day_count(&self) -> usize {
        ((self.end - self.start).num_days() + 1) as usize
    }

    /// First day of every month that overlaps the window, ascending.
    pub fn month_starts(&self) -> Vec<NaiveDate> {
        let mut months = Vec::new();
        let mut current = month_start(self.start);
        while current <= self.end {
            months.push(current);
            match next_month(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        months
    }

    /// The window split at month boundaries, in order.
    ///
    /// Each piece runs to the end of its month, clipped to the window, so the
    /// pieces tile the window exactly.
    pub fn month_windows(&self) -> Vec<QueryWindow> {
        self.month_starts()
            .into_iter()
            .map(|m| QueryWindow {
                start: m.max(self.start),
                end: month_end(m).min(self.end),
            })
            .collect()
    }
}

impl fmt::Display for QueryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
