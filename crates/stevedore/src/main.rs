//! stevedore - bulk-insert JSON log records into ElasticSearch
//!
//! Reads one JSON record per line from standard input, buffers them in a
//! persistent on-disk queue, and forwards them in bulk to a pool of
//! ElasticSearch-compatible backends. Records survive restarts until the
//! backend has accepted them (at-least-once).
//!
//! # Usage
//!
//! ```bash
//! tail -F app.json | stevedore -h es1 -h es2 -i logs -q /var/lib/stevedore
//! ```
//!
//! `SIGINT`/`SIGTERM` trigger a graceful shutdown; `SIGUSR1` dumps the
//! internal metrics to the log.

mod app;
mod pidfile;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

/// Bulk-insert JSON log records from standard input into ElasticSearch
#[derive(Parser, Debug)]
#[command(name = "stevedore", version, about, disable_help_flag = true)]
pub struct Cli {
    /// Print help
    #[arg(long, action = ArgAction::HelpLong)]
    help: Option<bool>,

    /// Hostname of an ElasticSearch server (repeatable)
    #[arg(short = 'h', long = "host", default_value = "localhost")]
    pub hosts: Vec<String>,

    /// Protocol of the ElasticSearch servers
    #[arg(short = 'P', long, default_value = "http", value_parser = ["http", "https"])]
    pub protocol: String,

    /// Port of the ElasticSearch servers
    #[arg(short = 'p', long, default_value_t = 9200)]
    pub port: u16,

    /// Username for basic authentication
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Password for basic authentication
    #[arg(short = 'w', long)]
    pub passwd: Option<String>,

    /// Index name prefix
    #[arg(short = 'i', long, default_value = "logs")]
    pub index: String,

    /// Document type
    #[arg(short = 't', long = "type", default_value = "log")]
    pub doc_type: String,

    /// Maximum number of records in a batch
    #[arg(short = 'n', long, default_value_t = 500)]
    pub batch_size: usize,

    /// Maximum delay between flushes
    #[arg(short = 'f', long, default_value = "1s", value_parser = parse_duration)]
    pub flush_delay: Duration,

    /// Directory of the persistent queue
    #[arg(short = 'q', long, default_value = ".queue")]
    pub queue_dir: PathBuf,

    /// Expected charset for non-UTF-8 input
    #[arg(short = 'c', long, default_value = "ISO-8859-1")]
    pub input_charset: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Write the process id to this file
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Dump metrics to the log at a regular interval
    #[arg(long, value_parser = parse_duration)]
    pub metric_dump: Option<Duration>,

    /// Log debugging information
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Log progress information
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;
    app::run(cli).await
}

/// Initialize the tracing subscriber
///
/// Logs go to stderr (stdin carries the data, stdout stays clean) or to
/// `--log-file`. `RUST_LOG` overrides the flag-derived filter.
fn init_logging(cli: &Cli) -> Result<()> {
    let default_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    // Metrics dumps are operator-requested (SIGUSR1 / --metric-dump) and
    // stay visible regardless of the verbosity flags.
    let directives = format!("{default_level},{}=info", app::METRICS_TARGET);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            builder
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

/// Parse durations like `500ms`, `1s`, `2m`
fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {input:?}"))?;
    let secs = match unit {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return Err(format!("unknown duration unit: {unit:?}")),
    };
    Ok(Duration::from_secs_f64(secs))
}
