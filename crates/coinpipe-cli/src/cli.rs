//! CLI argument definitions for coinpipe.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Fetch, validate, load and summarize one or more assets |
//! | `summary` | Statistics over already stored prices |
//! | `series` | Stored `(timestamp, price)` series as JSON |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | TOML configuration file |
//! | `--db` | `$COINPIPE_HOME/coinpipe.duckdb` | DuckDB store file |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--verbose` | `false` | Debug logging (unless `RUST_LOG` is set) |
//!
//! # Examples
//!
//! ```bash
//! coinpipe run --asset bitcoin --asset ethereum --days 30
//! coinpipe summary --asset bitcoin --start 2024-01-01T00:00:00Z --end 2024-02-01T00:00:00Z
//! coinpipe series --asset bitcoin --days 7 --pretty
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "coinpipe",
    author,
    version,
    about = "Cryptocurrency price ETL: CoinGecko to DuckDB with quality checks and analytics",
    long_about = "coinpipe fetches historical prices from CoinGecko, rejects malformed records \
and statistical outliers, upserts the rest into a local DuckDB file, and reports summary \
statistics.\n\
\n\
Exit codes: 0 success, 2 usage or configuration error, 3 source unavailable, \
4 malformed response, 5 storage unavailable, 6 insufficient data."
)]
pub struct Cli {
    /// TOML configuration file. Flags override its values.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// DuckDB store file.
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the pipeline.
    Run(RunArgs),
    /// Summarize stored prices without fetching.
    Summary(QueryArgs),
    /// Print the stored price series.
    Series(QueryArgs),
}

/// Time window flags. When any is given, the configured window is replaced.
#[derive(Debug, Clone, Default, Args)]
pub struct WindowArgs {
    /// Trailing days ending at `--end` (or now).
    #[arg(long, conflicts_with = "start")]
    pub days: Option<u32>,

    /// Window start, RFC3339 UTC.
    #[arg(long, value_name = "TIMESTAMP")]
    pub start: Option<String>,

    /// Window end, RFC3339 UTC. Defaults to now.
    #[arg(long, value_name = "TIMESTAMP")]
    pub end: Option<String>,
}

impl WindowArgs {
    pub fn is_set(&self) -> bool {
        self.days.is_some() || self.start.is_some() || self.end.is_some()
    }
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Asset id to process; repeat for several. Replaces the configured list.
    #[arg(long = "asset", value_name = "ID")]
    pub assets: Vec<String>,

    #[command(flatten)]
    pub window: WindowArgs,

    /// Quote currency.
    #[arg(long, value_name = "CODE")]
    pub vs_currency: Option<String>,

    /// Outlier distance in standard deviations.
    #[arg(long)]
    pub outlier_threshold: Option<f64>,

    /// Accepted records required before outlier detection applies.
    #[arg(long)]
    pub min_samples: Option<usize>,

    /// Accepted records in the rolling statistics window.
    #[arg(long)]
    pub rolling_window: Option<usize>,

    /// Retries per request on transient failures.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Per-request timeout in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Rows per load transaction.
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// API base URL.
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Skip chart rendering.
    #[arg(long, default_value_t = false)]
    pub no_chart: bool,

    /// Directory for SVG charts.
    #[arg(long, value_name = "DIR")]
    pub chart_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    /// Asset id.
    #[arg(long, value_name = "ID")]
    pub asset: String,

    #[command(flatten)]
    pub window: WindowArgs,
}
