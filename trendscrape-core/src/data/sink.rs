//! Tabular output of assembled series, and read-back for merging.
//!
//! CSV columns: `date,{kw}_unscaled,{kw}_monthly,scale,{kw}`. Missing values
//! are written as empty fields. Parquet goes through polars with a
//! `Date`-typed date column. Files are written to a temp path and renamed
//! into place.

use super::checkpoint::file_stem;
use crate::fetch::TrendSeries;
use chrono::NaiveDate;
use polars::prelude::{ParquetWriter, PolarsError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parquet error: {0}")]
    Parquet(String),

    #[error("unsupported output format: '{0}'")]
    UnsupportedFormat(String),

    #[error("malformed table {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

impl From<PolarsError> for SinkError {
    fn from(e: PolarsError) -> Self {
        SinkError::Parquet(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }

    /// Format implied by the file extension.
    pub fn from_path(path: &Path) -> Result<Self, SinkError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        ext.parse()
    }
}

impl FromStr for OutputFormat {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "parquet" | "pq" => Ok(OutputFormat::Parquet),
            other => Err(SinkError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// `data_{keyword}.{ext}`.
pub fn series_file_name(keyword: &str, format: OutputFormat) -> String {
    format!("data_{}.{}", file_stem(keyword), format.extension())
}

/// Write `series` to `path`, picking the format from the extension.
pub fn write_series(series: &TrendSeries, path: &Path) -> Result<(), SinkError> {
    let format = OutputFormat::from_path(path)?;
    let bytes = match format {
        OutputFormat::Csv => series_to_csv(series)?,
        OutputFormat::Parquet => series_to_parquet(series)?,
    };
    write_atomic(path, &bytes)?;
    debug!(path = %path.display(), rows = series.len(), %format, "series written");
    Ok(())
}

/// CSV rendering of `series`, header included.
pub fn series_to_csv(series: &TrendSeries) -> Result<Vec<u8>, SinkError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(series.column_names())?;
    for row in &series.rows {
        wtr.write_record([
            row.date.format(DATE_FORMAT).to_string(),
            format_value(row.unscaled),
            format_value(row.monthly),
            format_value(row.scale),
            format_value(row.scaled),
        ])?;
    }
    wtr.into_inner()
        .map_err(|e| SinkError::Csv(csv::Error::from(e.into_error())))
}

fn series_to_parquet(series: &TrendSeries) -> Result<Vec<u8>, SinkError> {
    let mut df = series.to_dataframe()?;
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf).finish(&mut df)?;
    Ok(buf)
}

fn format_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    let io_err = |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    fs::write(&tmp_path, bytes).map_err(io_err)?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        io_err(e)
    })
}

/// A date-keyed CSV table: every column after `date`, rows sorted by date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataTable {
    pub columns: Vec<String>,
    pub rows: BTreeMap<NaiveDate, Vec<String>>,
}

impl DataTable {
    /// Outer join on date. Cells absent on one side are left empty.
    pub fn outer_join(mut self, other: DataTable) -> DataTable {
        let left_width = self.columns.len();
        let right_width = other.columns.len();

        for cells in self.rows.values_mut() {
            cells.resize(left_width + right_width, String::new());
        }
        for (date, cells) in other.rows {
            let row = self
                .rows
                .entry(date)
                .or_insert_with(|| vec![String::new(); left_width + right_width]);
            for (i, cell) in cells.into_iter().enumerate().take(right_width) {
                row[left_width + i] = cell;
            }
        }
        self.columns.extend(other.columns);
        self
    }

    /// Write with a leading `date` column.
    pub fn write_csv(&self, path: &Path) -> Result<(), SinkError> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push("date");
        header.extend(self.columns.iter().map(String::as_str));
        wtr.write_record(&header)?;
        for (date, cells) in &self.rows {
            let mut record = Vec::with_capacity(cells.len() + 1);
            record.push(date.format(DATE_FORMAT).to_string());
            record.extend(cells.iter().cloned());
            wtr.write_record(&record)?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| SinkError::Csv(csv::Error::from(e.into_error())))?;
        write_atomic(path, &bytes)
    }
}

/// Read a CSV whose first column is a `YYYY-MM-DD` date.
///
/// A date that appears twice keeps its first row.
pub fn read_table(path: &Path) -> Result<DataTable, SinkError> {
    let malformed = |reason: String| SinkError::Malformed {
        path: path.to_path_buf(),
        reason,
    };
    let file = fs::File::open(path).map_err(|source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut rdr = csv::Reader::from_reader(file);

    let headers = rdr.headers()?.clone();
    if headers.get(0).map(str::trim) != Some("date") {
        return Err(malformed("first column must be 'date'".into()));
    }
    let columns: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut rows = BTreeMap::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let raw = record.get(0).unwrap_or_default();
        let date = NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
            .map_err(|e| malformed(format!("row {}: bad date '{raw}': {e}", i + 1)))?;
        let mut cells: Vec<String> = record.iter().skip(1).map(str::to_string).collect();
        cells.resize(columns.len(), String::new());
        rows.entry(date).or_insert(cells);
    }

    Ok(DataTable { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::AssembledRow;
    use tempfile::TempDir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn series() -> TrendSeries {
        TrendSeries {
            keyword: "debt".into(),
            rows: vec![
                AssembledRow {
                    date: d(2004, 1, 1),
                    unscaled: Some(40.0),
                    monthly: Some(50.0),
                    scale: Some(0.5),
                    scaled: Some(20.0),
                },
                AssembledRow {
                    date: d(2004, 1, 2),
                    unscaled: None,
                    monthly: Some(50.0),
                    scale: Some(0.5),
                    scaled: None,
                },
            ],
        }
    }

    #[test]
    fn csv_has_header_and_empty_missing_fields() {
        let text = String::from_utf8(series_to_csv(&series()).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "date,debt_unscaled,debt_monthly,scale,debt");
        assert_eq!(lines[1], "2004-01-01,40,50,0.5,20");
        assert_eq!(lines[2], "2004-01-02,,50,0.5,");
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            OutputFormat::from_path(Path::new("out/data_debt.csv")).unwrap(),
            OutputFormat::Csv
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("data_debt.parquet")).unwrap(),
            OutputFormat::Parquet
        );
        assert!(matches!(
            OutputFormat::from_path(Path::new("data_debt.xlsx")),
            Err(SinkError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn file_name_uses_safe_stem() {
        assert_eq!(series_file_name("debt", OutputFormat::Csv), "data_debt.csv");
        assert_eq!(
            series_file_name("a/b", OutputFormat::Parquet),
            "data_a_b.parquet"
        );
    }

    #[test]
    fn written_csv_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data_debt.csv");
        write_series(&series(), &path).unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.columns, vec!["debt_unscaled", "debt_monthly", "scale", "debt"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[&d(2004, 1, 2)][0], "");
        assert!(!dir.path().join("data_debt.csv.tmp").exists());
    }

    #[test]
    fn parquet_file_is_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data_debt.parquet");
        write_series(&series(), &path).unwrap();
        assert!(fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn outer_join_fills_gaps_with_empty_cells() {
        let mut left = DataTable {
            columns: vec!["a".into()],
            ..Default::default()
        };
        left.rows.insert(d(2004, 1, 1), vec!["1".into()]);
        let mut right = DataTable {
            columns: vec!["b".into()],
            ..Default::default()
        };
        right.rows.insert(d(2004, 1, 2), vec!["2".into()]);

        let joined = left.outer_join(right);
        assert_eq!(joined.columns, vec!["a", "b"]);
        assert_eq!(joined.rows[&d(2004, 1, 1)], vec!["1", ""]);
        assert_eq!(joined.rows[&d(2004, 1, 2)], vec!["", "2"]);
    }

    #[test]
    fn table_without_date_column_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "day,x\n2004-01-01,1\n").unwrap();
        assert!(matches!(read_table(&path), Err(SinkError::Malformed { .. })));
    }
}
