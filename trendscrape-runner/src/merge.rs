//! Wide merge of per-keyword output files.
//!
//! Every `data_{keyword}.csv` in a directory is outer-joined on date into
//! `merged_interest_over_time.csv`, columns in keyword order. Keywords without
//! a file are reported and skipped.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use trendscrape_core::data::{read_table, series_file_name, DataTable, OutputFormat};

pub const MERGED_FILE_NAME: &str = "merged_interest_over_time.csv";

#[derive(Debug, Clone, PartialEq)]
pub struct MergeSummary {
    pub path: PathBuf,
    pub merged: Vec<String>,
    pub missing: Vec<String>,
    pub rows: usize,
}

/// Merge the CSV outputs of `keywords` found in `dir` into `dir/merged_interest_over_time.csv`.
pub fn merge_keyword_files(dir: &Path, keywords: &[String]) -> Result<MergeSummary> {
    let mut merged_table: Option<DataTable> = None;
    let mut merged = Vec::new();
    let mut missing = Vec::new();

    for keyword in keywords {
        let path = dir.join(series_file_name(keyword, OutputFormat::Csv));
        if !path.exists() {
            warn!(keyword = keyword.as_str(), path = %path.display(), "no output file for keyword");
            missing.push(keyword.clone());
            continue;
        }

        let table =
            read_table(&path).with_context(|| format!("reading {}", path.display()))?;
        merged_table = Some(match merged_table {
            Some(acc) => acc.outer_join(table),
            None => table,
        });
        merged.push(keyword.clone());
    }

    let Some(table) = merged_table else {
        bail!("no per-keyword output files found in {}", dir.display());
    };

    let path = dir.join(MERGED_FILE_NAME);
    table
        .write_csv(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    info!(
        path = %path.display(),
        keywords = merged.len(),
        rows = table.rows.len(),
        "merged output written"
    );

    Ok(MergeSummary {
        path,
        merged,
        missing,
        rows: table.rows.len(),
    })
}
