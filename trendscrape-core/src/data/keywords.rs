//! Keyword lists.
//!
//! A keyword list is a one-column CSV with a `Keywords` header. Lists are
//! built by gathering the top related queries out of a folder of Trends CSV
//! exports: each export carries four preamble lines, then the ranked queries.

use super::sink::SinkError;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const KEYWORDS_COLUMN: &str = "Keywords";

/// Preamble lines in a Trends related-queries export.
const EXPORT_PREAMBLE_LINES: usize = 4;
/// Ranked queries taken from each export.
const EXPORT_TOP_N: usize = 10;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SinkError + '_ {
    move |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Keywords from the `Keywords` column of `path` (or its first column when
/// there is no such header), trimmed, blanks dropped, first occurrence kept.
pub fn load_keywords(path: &Path) -> Result<Vec<String>, SinkError> {
    let file = fs::File::open(path).map_err(io_err(path))?;
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);

    let headers = rdr.headers()?.clone();
    let column = headers
        .iter()
        .position(|h| h.trim() == KEYWORDS_COLUMN)
        .unwrap_or_else(|| {
            debug!(path = %path.display(), "no Keywords header, using first column");
            0
        });

    let mut keywords = Vec::new();
    for record in rdr.records() {
        let record = record?;
        if let Some(value) = record.get(column) {
            keywords.push(value.to_string());
        }
    }
    Ok(dedup_keywords(keywords))
}

/// Trim, drop blanks, keep the first occurrence of each keyword.
pub fn dedup_keywords<I, S>(keywords: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    keywords
        .into_iter()
        .map(|k| k.as_ref().trim().to_string())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

/// Top queries from every `*.csv` export in `folder`, files in name order.
///
/// Unreadable files are logged and skipped.
pub fn gather_keywords(folder: &Path) -> Result<Vec<String>, SinkError> {
    let mut files: Vec<PathBuf> = fs::read_dir(folder)
        .map_err(io_err(folder))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("csv"))
        .collect();
    files.sort();

    let mut gathered = Vec::new();
    for file in &files {
        match top_queries(file) {
            Ok(queries) => {
                debug!(path = %file.display(), count = queries.len(), "export read");
                gathered.extend(queries);
            }
            Err(e) => warn!(path = %file.display(), error = %e, "skipping unreadable export"),
        }
    }

    let keywords = dedup_keywords(gathered);
    debug!(files = files.len(), keywords = keywords.len(), "keywords gathered");
    Ok(keywords)
}

/// First field of the first ranked rows of one export.
fn top_queries(path: &Path) -> Result<Vec<String>, SinkError> {
    let content = fs::read_to_string(path).map_err(io_err(path))?;
    let body: String = content
        .lines()
        .skip(EXPORT_PREAMBLE_LINES)
        .filter(|line| !line.trim().is_empty())
        .take(EXPORT_TOP_N)
        .map(|line| format!("{line}\n"))
        .collect();

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());
    let mut queries = Vec::new();
    for record in rdr.records() {
        if let Some(first) = record?.get(0) {
            queries.push(first.to_string());
        }
    }
    Ok(queries)
}

/// Write a `Keywords` list.
pub fn write_keywords(path: &Path, keywords: &[String]) -> Result<(), SinkError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err(path))?;
        }
    }
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record([KEYWORDS_COLUMN])?;
    for keyword in keywords {
        wtr.write_record([keyword])?;
    }
    wtr.flush().map_err(io_err(path))?;
    Ok(())
}
