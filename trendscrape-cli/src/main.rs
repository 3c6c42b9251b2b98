//! trendscrape CLI: fetch, merge, keyword and checkpoint commands.
//!
//! Commands:
//! - `fetch`: fetch daily Google Trends interest for keywords, month by month, with checkpoints
//! - `merge`: join per-keyword outputs into `merged_interest_over_time.csv`
//! - `keywords gather`: collect top queries from a folder of Trends CSV exports
//! - `checkpoint status`: list checkpoints and how far each keyword got
//! - `checkpoint clear`: delete a keyword's checkpoint

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use trendscrape_core::data::{
    gather_keywords, load_keywords, write_keywords, CheckpointStore, FileCheckpointStore,
    OutputFormat,
};
use trendscrape_core::source::{GoogleTrendsProvider, ThreadSleeper};
use trendscrape_core::window::YearMonth;
use trendscrape_runner::{merge_keyword_files, run_batch, RunConfig, StdoutProgress};

#[derive(Parser)]
#[command(
    name = "trendscrape",
    about = "trendscrape: checkpointed Google Trends daily interest fetcher"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch daily interest for every keyword, resuming from checkpoints.
    Fetch {
        /// Keywords to fetch (e.g., debt "stock market").
        keywords: Vec<String>,

        /// Path to a TOML run config. Flags override its values.
        #[arg(long)]
        config: Option<PathBuf>,

        /// CSV keyword list with a `Keywords` column.
        #[arg(long)]
        keywords_file: Option<PathBuf>,

        /// First month (YYYY-MM). Defaults to 2004-01.
        #[arg(long)]
        start: Option<YearMonth>,

        /// Last month, inclusive (YYYY-MM). Defaults to 2011-12.
        #[arg(long)]
        stop: Option<YearMonth>,

        /// Region code. Defaults to US.
        #[arg(long)]
        geo: Option<String>,

        /// Seconds to pause after every fetched month. Defaults to 10.
        #[arg(long)]
        wait_secs: Option<f64>,

        /// Seconds to pause between keywords. Defaults to 60.
        #[arg(long)]
        keyword_delay_secs: Option<f64>,

        /// Give up on a keyword after this many consecutive month failures.
        #[arg(long)]
        max_failures: Option<u32>,

        /// Checkpoint directory. Defaults to ./checkpoints.
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Output directory. Defaults to ./data.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Output format: csv or parquet.
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Merge all keyword outputs when done.
        #[arg(long, default_value_t = false)]
        merge: bool,
    },
    /// Merge per-keyword CSV outputs into one wide CSV.
    Merge {
        /// Keywords to merge, in column order.
        keywords: Vec<String>,

        /// CSV keyword list with a `Keywords` column.
        #[arg(long)]
        keywords_file: Option<PathBuf>,

        /// Directory holding `data_{keyword}.csv` files. Defaults to ./data.
        #[arg(long, default_value = "data")]
        output_dir: PathBuf,
    },
    /// Keyword list commands.
    Keywords {
        #[command(subcommand)]
        action: KeywordsAction,
    },
    /// Checkpoint management commands.
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum KeywordsAction {
    /// Gather the top 10 queries of every CSV export in a folder into one list.
    Gather {
        /// Folder of Google Trends related-queries CSV exports.
        folder: PathBuf,

        /// Output keyword list.
        #[arg(long, default_value = "final_keywords.csv")]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Show every checkpoint and how many months it holds.
    Status {
        /// Checkpoint directory. Defaults to ./checkpoints.
        #[arg(long, default_value = "checkpoints")]
        checkpoint_dir: PathBuf,
    },
    /// Delete the checkpoints of the given keywords.
    Clear {
        #[arg(required = true)]
        keywords: Vec<String>,

        /// Checkpoint directory. Defaults to ./checkpoints.
        #[arg(long, default_value = "checkpoints")]
        checkpoint_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Fetch {
            keywords,
            config,
            keywords_file,
            start,
            stop,
            geo,
            wait_secs,
            keyword_delay_secs,
            max_failures,
            checkpoint_dir,
            output_dir,
            format,
            merge,
        } => {
            let mut run = match &config {
                Some(path) => RunConfig::from_file(path)?,
                None => RunConfig::default(),
            };
            if !keywords.is_empty() {
                run.fetch.keywords = keywords;
                if keywords_file.is_none() {
                    run.fetch.keywords_file = None;
                }
            }
            if keywords_file.is_some() {
                run.fetch.keywords_file = keywords_file;
            }
            if let Some(start) = start {
                run.fetch.start = start;
            }
            if let Some(stop) = stop {
                run.fetch.stop = stop;
            }
            if let Some(geo) = geo {
                run.fetch.geo = geo;
            }
            if let Some(secs) = wait_secs {
                run.fetch.wait_secs = secs;
            }
            if max_failures.is_some() {
                run.fetch.max_consecutive_failures = max_failures;
            }
            if let Some(secs) = keyword_delay_secs {
                run.batch.keyword_delay_secs = secs;
            }
            if let Some(dir) = checkpoint_dir {
                run.batch.checkpoint_dir = dir;
            }
            if let Some(dir) = output_dir {
                run.batch.output_dir = dir;
            }
            if let Some(format) = format {
                run.batch.format = format;
            }
            run.batch.merge |= merge;
            run_fetch(&run)
        }
        Commands::Merge {
            keywords,
            keywords_file,
            output_dir,
        } => run_merge(keywords, keywords_file, &output_dir),
        Commands::Keywords { action } => match action {
            KeywordsAction::Gather { folder, output } => run_gather(&folder, &output),
        },
        Commands::Checkpoint { action } => match action {
            CheckpointAction::Status { checkpoint_dir } => run_checkpoint_status(&checkpoint_dir),
            CheckpointAction::Clear {
                keywords,
                checkpoint_dir,
            } => run_checkpoint_clear(&keywords, &checkpoint_dir),
        },
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_fetch(config: &RunConfig) -> Result<()> {
    let plan = config.plan().context("invalid run configuration")?;
    let provider = GoogleTrendsProvider::new(config.google_config());

    println!(
        "Fetching {} keyword(s) for {} ({}), checkpoints in {}",
        plan.keywords.len(),
        plan.window,
        plan.geo,
        plan.batch.checkpoint_dir.display()
    );

    let summary = run_batch(&plan, &provider, &ThreadSleeper, &StdoutProgress);
    info!(
        completed = summary.completed.len(),
        incomplete = summary.incomplete.len(),
        failed = summary.failed.len(),
        "batch finished"
    );

    if !summary.failed.is_empty() {
        bail!("{} keyword(s) failed", summary.failed.len());
    }
    Ok(())
}

fn run_merge(keywords: Vec<String>, keywords_file: Option<PathBuf>, output_dir: &Path) -> Result<()> {
    let mut all = keywords;
    if let Some(path) = keywords_file {
        all.extend(
            load_keywords(&path)
                .with_context(|| format!("loading keywords from {}", path.display()))?,
        );
    }
    let keywords = trendscrape_core::data::dedup_keywords(all);
    if keywords.is_empty() {
        bail!("no keywords given: pass KEYWORD... or --keywords-file");
    }

    let summary = merge_keyword_files(output_dir, &keywords)?;
    println!(
        "Merged {} keyword(s), {} rows, into {}",
        summary.merged.len(),
        summary.rows,
        summary.path.display()
    );
    for keyword in &summary.missing {
        println!("  missing: {keyword}");
    }
    Ok(())
}

fn run_gather(folder: &Path, output: &Path) -> Result<()> {
    let keywords = gather_keywords(folder)
        .with_context(|| format!("gathering keywords from {}", folder.display()))?;
    write_keywords(output, &keywords)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("{} unique keywords exported to {}", keywords.len(), output.display());
    Ok(())
}

fn run_checkpoint_status(checkpoint_dir: &Path) -> Result<()> {
    if !checkpoint_dir.exists() {
        println!("Checkpoint directory does not exist: {}", checkpoint_dir.display());
        return Ok(());
    }

    let statuses = FileCheckpointStore::scan(checkpoint_dir)?;
    if statuses.is_empty() {
        println!("No checkpoints in {}", checkpoint_dir.display());
        return Ok(());
    }

    println!("Checkpoints: {}", checkpoint_dir.display());
    println!();
    println!(
        "{:<24} {:<23} {:>9} {:<8} {:<12} {:<19}",
        "Keyword", "Window", "Months", "Monthly", "Last OK", "Updated"
    );
    println!("{}", "-".repeat(100));
    for status in &statuses {
        if let Some(error) = &status.error {
            println!("{:<24} (unreadable: {error})", status.keyword);
            continue;
        }
        let window = status.window.map(|w| w.to_string()).unwrap_or_default();
        let last_ok = status
            .last_successful_month
            .map(|d| d.format("%Y-%m").to_string())
            .unwrap_or_else(|| "-".into());
        let updated = status
            .updated_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<24} {:<23} {:>9} {:<8} {:<12} {:<19}",
            status.keyword,
            window,
            format!("{}/{}", status.months_cached, status.months_total),
            if status.has_monthly { "yes" } else { "no" },
            last_ok,
            updated
        );
    }
    Ok(())
}

fn run_checkpoint_clear(keywords: &[String], checkpoint_dir: &Path) -> Result<()> {
    for keyword in keywords {
        let mut store = FileCheckpointStore::for_keyword(checkpoint_dir, keyword);
        if !store.path().exists() {
            println!("No checkpoint for {keyword}");
            continue;
        }
        store
            .clear()
            .with_context(|| format!("removing {}", store.path().display()))?;
        println!("Cleared checkpoint for {keyword}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fetch_flags_parse() {
        let cli = Cli::try_parse_from([
            "trendscrape",
            "fetch",
            "debt",
            "stock market",
            "--start",
            "2005-01",
            "--stop",
            "2005-06",
            "--format",
            "parquet",
            "--merge",
        ])
        .unwrap();
        match cli.command {
            Commands::Fetch {
                keywords,
                start,
                stop,
                format,
                merge,
                ..
            } => {
                assert_eq!(keywords, vec!["debt", "stock market"]);
                assert_eq!(start, Some(YearMonth { year: 2005, month: 1 }));
                assert_eq!(stop, Some(YearMonth { year: 2005, month: 6 }));
                assert_eq!(format, Some(OutputFormat::Parquet));
                assert!(merge);
            }
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn bad_month_is_rejected() {
        assert!(Cli::try_parse_from(["trendscrape", "fetch", "debt", "--start", "2005-13"]).is_err());
    }

    #[test]
    fn checkpoint_clear_requires_keyword() {
        assert!(Cli::try_parse_from(["trendscrape", "checkpoint", "clear"]).is_err());
    }
}
