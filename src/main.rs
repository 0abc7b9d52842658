//! Thin CLI binary wiring the pipeline together for manual exercising.
//! The CLI surface itself is an explicit Non-goal collaborator (§1); this
//! binary exists only so the library can be driven end to end without a
//! caller writing Rust.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fundquotes::adjustment::{build_adjusted_series, TickerSeriesSpec};
use fundquotes::cache::{Cache, CachePolicy};
use fundquotes::config::PipelineConfig;
use fundquotes::ingest::Ingestor;
use fundquotes::store::{EventStore, QuoteStore};
use fundquotes::{db, error::Result as PipelineResult};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fundquotes", about = "Fund-ticker quote ingest pipeline")]
struct Cli {
    /// Path to the SQLite store file.
    #[arg(long, default_value = "fundquotes.db")]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every recognized archive in a directory.
    Ingest {
        /// Directory containing downloaded archives.
        dir: PathBuf,
    },
    /// Print a store summary (row count, ticker count, date range).
    Stats,
    /// Print the adjusted, ticker-merged series for a rename chain.
    Adjust {
        /// Comma-separated ticker chain, oldest first, terminal symbol last.
        tickers: String,
    },
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::default();
    let conn = db::open(&cli.db_path, config.db_timeout_secs).context("opening store")?;

    match cli.command {
        Commands::Ingest { dir } => run_ingest(&conn, &config, &dir)?,
        Commands::Stats => run_stats(&conn)?,
        Commands::Adjust { tickers } => run_adjust(&conn, &tickers)?,
    }

    Ok(())
}

fn run_ingest(conn: &rusqlite::Connection, config: &PipelineConfig, dir: &std::path::Path) -> PipelineResult<()> {
    let ingestor = Ingestor::new(conn, config);
    let mut cache = Cache::new(CachePolicy::new(config.cache_default_ttl_secs, config.cache_max_size));
    let workers = std::thread::available_parallelism().map(|n| n.get().saturating_sub(1)).unwrap_or(1);
    let summary = ingestor.ingest_directory(dir, &mut cache, workers.max(1))?;

    tracing::info!(
        channel = "ingest",
        processed = summary.processed,
        unchanged = summary.unchanged,
        rows_inserted = summary.rows_inserted,
        failed = summary.failed.len(),
        "ingest run complete"
    );
    for (name, reason) in &summary.failed {
        tracing::warn!(channel = "ingest", archive_name = name, reason, "archive failed");
    }

    if summary.is_total_failure() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_stats(conn: &rusqlite::Connection) -> PipelineResult<()> {
    let store = QuoteStore::new(conn);
    let stats = store.stats(None)?;
    println!(
        "rows={} tickers={} date_min={:?} date_max={:?}",
        stats.rows, stats.tickers, stats.date_min, stats.date_max
    );
    Ok(())
}

fn run_adjust(conn: &rusqlite::Connection, tickers: &str) -> PipelineResult<()> {
    let chain: Vec<String> = tickers.split(',').map(|s| s.trim().to_uppercase()).collect();
    let spec = TickerSeriesSpec::new(chain.clone());
    let quote_store = QuoteStore::new(conn);
    let event_store = EventStore::new(conn);

    let per_ticker_rows: Vec<_> = chain
        .iter()
        .map(|t| quote_store.query_all(t))
        .collect::<PipelineResult<Vec<_>>>()?;

    let mut actions = Vec::new();
    for ticker in &chain {
        actions.extend(event_store.list(Some(ticker), None, None)?);
    }

    let adjusted = build_adjusted_series(&spec, &per_ticker_rows, &actions);
    for row in adjusted {
        println!("{} {} close={} cum_factor={}", row.date, row.ticker, row.close, row.cumulative_factor);
    }
    Ok(())
}
