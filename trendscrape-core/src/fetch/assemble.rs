//! Stitching monthly daily segments into one rescaled series.
//!
//! Each month of daily data is normalized to its own peak (0-100). The monthly
//! reference, fetched once over the whole window, says how months compare, so
//! every day is multiplied by `monthly / 100` of its month:
//!
//! ```text
//! daily segments (month order) ──left join on date──▶ monthly reference
//!            │                                              │
//!            └──────── forward fill monthly ◀───────────────┘
//!                            │
//!                 scale = monthly / 100, scaled = unscaled * scale
//! ```

use crate::data::checkpoint::Checkpoint;
use crate::source::InterestPoint;
use crate::window::QueryWindow;
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::BTreeMap;

/// One day of the assembled series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssembledRow {
    pub date: NaiveDate,
    pub unscaled: Option<f64>,
    /// Monthly reference value, forward filled.
    pub monthly: Option<f64>,
    pub scale: Option<f64>,
    pub scaled: Option<f64>,
}

/// A keyword's daily series, rows in date order.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendSeries {
    pub keyword: String,
    pub rows: Vec<AssembledRow>,
}

impl TrendSeries {
    pub fn unscaled_column(&self) -> String {
        format!("{}_unscaled", self.keyword)
    }

    pub fn monthly_column(&self) -> String {
        format!("{}_monthly", self.keyword)
    }

    pub fn scaled_column(&self) -> String {
        self.keyword.clone()
    }

    /// Output header: `date, {kw}_unscaled, {kw}_monthly, scale, {kw}`.
    pub fn column_names(&self) -> [String; 5] {
        [
            "date".to_string(),
            self.unscaled_column(),
            self.monthly_column(),
            "scale".to_string(),
            self.scaled_column(),
        ]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|r| r.date)
    }

    /// Whether the rows are exactly the days of `window`: one row per day, no gaps, no extras.
    pub fn covers(&self, window: &QueryWindow) -> bool {
        self.rows.len() == window.day_count()
            && self
                .rows
                .iter()
                .zip(window.start.iter_days())
                .all(|(row, day)| row.date == day)
    }

    /// Convert to a DataFrame with a `Date`-typed `date` column.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let epoch = NaiveDate::default();
        let dates: Vec<i32> = self
            .rows
            .iter()
            .map(|r| (r.date - epoch).num_days() as i32)
            .collect();
        let unscaled: Vec<Option<f64>> = self.rows.iter().map(|r| r.unscaled).collect();
        let monthly: Vec<Option<f64>> = self.rows.iter().map(|r| r.monthly).collect();
        let scale: Vec<Option<f64>> = self.rows.iter().map(|r| r.scale).collect();
        let scaled: Vec<Option<f64>> = self.rows.iter().map(|r| r.scaled).collect();

        DataFrame::new(vec![
            Column::new("date".into(), dates).cast(&DataType::Date)?,
            Column::new(self.unscaled_column().into(), unscaled),
            Column::new(self.monthly_column().into(), monthly),
            Column::new("scale".into(), scale),
            Column::new(self.scaled_column().into(), scaled),
        ])
    }
}

/// Result of assembling a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Assembled {
    /// Every day of the window is present exactly once.
    Complete(TrendSeries),
    /// Some months are absent or short; `series` holds what is there.
    Incomplete {
        series: TrendSeries,
        missing_months: Vec<QueryWindow>,
    },
}

impl Assembled {
    pub fn is_complete(&self) -> bool {
        matches!(self, Assembled::Complete(_))
    }

    pub fn series(&self) -> &TrendSeries {
        match self {
            Assembled::Complete(series) => series,
            Assembled::Incomplete { series, .. } => series,
        }
    }

    pub fn into_series(self) -> TrendSeries {
        match self {
            Assembled::Complete(series) => series,
            Assembled::Incomplete { series, .. } => series,
        }
    }

    pub fn missing_months(&self) -> &[QueryWindow] {
        match self {
            Assembled::Complete(_) => &[],
            Assembled::Incomplete { missing_months, .. } => missing_months,
        }
    }
}

/// Assemble every segment the checkpoint holds for its window.
///
/// Segments are restricted to their own month and de-duplicated by date, so a
/// source that pads a month with neighbouring days cannot double-count. A
/// month whose segment is absent or lacks days is listed as missing. Without a
/// monthly reference the scale columns are empty and the result is never
/// complete.
pub fn assemble(checkpoint: &Checkpoint) -> Assembled {
    let mut daily = Vec::new();
    let mut missing_months = Vec::new();

    for month in checkpoint.window.month_windows() {
        let Some(points) = checkpoint.segment(&month.encode()) else {
            missing_months.push(month);
            continue;
        };

        let mut in_month: Vec<InterestPoint> = points
            .iter()
            .copied()
            .filter(|p| month.contains(p.date))
            .collect();
        in_month.sort_by_key(|p| p.date);
        in_month.dedup_by_key(|p| p.date);

        if in_month.len() != month.day_count() {
            missing_months.push(month);
        }
        daily.extend(in_month);
    }

    let monthly = checkpoint.monthly.as_deref().unwrap_or_default();
    let series = TrendSeries {
        keyword: checkpoint.keyword.clone(),
        rows: scale_daily(&daily, monthly),
    };

    if missing_months.is_empty() && checkpoint.monthly.is_some() && series.covers(&checkpoint.window)
    {
        Assembled::Complete(series)
    } else {
        Assembled::Incomplete {
            series,
            missing_months,
        }
    }
}

/// Left join `daily` with `monthly` on date, forward fill, and rescale.
///
/// Rows keep the order of `daily`. Until the first monthly value is seen the
/// monthly, scale and scaled columns stay empty.
pub fn scale_daily(daily: &[InterestPoint], monthly: &[InterestPoint]) -> Vec<AssembledRow> {
    let reference: BTreeMap<NaiveDate, Option<f64>> =
        monthly.iter().map(|p| (p.date, p.value)).collect();

    let mut last_monthly: Option<f64> = None;
    daily
        .iter()
        .map(|point| {
            if let Some(Some(value)) = reference.get(&point.date) {
                last_monthly = Some(*value);
            }
            let scale = last_monthly.map(|m| m / 100.0);
            AssembledRow {
                date: point.date,
                unscaled: point.value,
                monthly: last_monthly,
                scale,
                scaled: point.value.zip(scale).map(|(v, s)| v * s),
            }
        })
        .collect()
}
