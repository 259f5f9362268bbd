//! connramp — connection-ramp latency benchmark
//!
//! Holds 1, 2, ... N concurrent PostgreSQL connections and times one
//! transaction per connection at every level.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 1000 connections, 50 tables, local connections-test database
//! connramp 2> results.csv
//!
//! # Smaller ramp against another database
//! connramp --loops 200 --database-url postgres://bench@db/bench 2> results.csv
//! ```

use anyhow::Context;
use clap::Parser;
use colored::*;
use connramp::config::{self, BenchConfig};
use connramp::report::Reporter;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "connramp")]
#[command(version)]
#[command(
    about = "Measure transaction latency as concurrent connections ramp up",
    long_about = None
)]
#[command(after_help = "OUTPUT:
    Progress and per-step summaries go to stdout.
    CSV rows (connections,p50,p75,p95 in seconds) go to stderr.
    A fatal error is written to stderr as a '#' comment line.

EXAMPLES:
    connramp 2> results.csv
    connramp --loops 100 --tables 10 2> results.csv")]
struct Cli {
    /// Config file (default: ./connramp.toml, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database connection URL
    #[arg(long, env = "CONNRAMP_DATABASE_URL")]
    database_url: Option<String>,

    /// Ramp ceiling: the highest number of concurrent connections
    #[arg(short = 'n', long)]
    loops: Option<usize>,

    /// Number of scratch tables the workload is spread over
    #[arg(short, long)]
    tables: Option<usize>,

    /// Attempts per connection acquisition
    #[arg(long)]
    retries: Option<u32>,

    /// Seconds per backoff draw between connection attempts
    #[arg(long)]
    backoff: Option<f64>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", fatal_line(format!("{e:#}")));
            std::process::exit(1);
        }
    };

    tracing::info!(
        loops = config.num_loops,
        tables = config.num_tables,
        "starting connection ramp"
    );

    if let Err(e) = connramp::run(&config, Reporter::stdio(!cli.no_color)).await {
        eprintln!("{}", fatal_line(e));
        std::process::exit(1);
    }
}

/// Fatal error line for stderr. The leading `#` keeps it a comment to CSV
/// readers, like the header.
fn fatal_line(err: impl std::fmt::Display) -> String {
    format!("# {} {}", "Error:".red().bold(), err)
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "connramp=debug,sqlx=warn"
    } else {
        "connramp=info,sqlx=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stderr carries the CSV, so diagnostics share stdout with the progress text
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();
}

fn build_config(cli: &Cli) -> anyhow::Result<BenchConfig> {
    let mut config = config::load(cli.config.as_deref()).context("loading configuration")?;

    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }
    if let Some(loops) = cli.loops {
        config.num_loops = loops;
    }
    if let Some(tables) = cli.tables {
        config.num_tables = tables;
    }
    if let Some(retries) = cli.retries {
        config.connect_retries = retries;
    }
    if let Some(secs) = cli.backoff {
        config.backoff_unit = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("--backoff {secs} is not a usable number of seconds"))?;
    }

    config.validate()?;
    Ok(config)
}
