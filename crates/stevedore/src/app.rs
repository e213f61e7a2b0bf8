//! Pipeline wiring and lifecycle supervision
//!
//! Builds the five pipeline components, spawns them as tasks, and owns the
//! two coordination surfaces: the process-wide shutdown token (closed once,
//! on the first SIGINT/SIGTERM) and the reader-done token (closed by the
//! stdin source at end of input).
//!
//! ```text
//! stdin → reader → queue ⇉ batcher → sink → backends
//!                    ▲                │
//!                    └──── ack ───────┘
//! ```
//!
//! After shutdown begins every task gets a 2 second deadline to come down;
//! exceeding it is a forced exit with status 1.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use stevedore_metrics::MetricsProvider;
use stevedore_pipeline::{Batcher, BatcherConfig};
use stevedore_queue::{Queue, QueueConfig};
use stevedore_sinks::{BackendPool, ElasticConfig, ElasticSink};
use stevedore_sources::{StdinConfig, StdinSource};
use tokio::io::BufReader;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::pidfile::PidFile;
use crate::Cli;

/// Hard deadline for task teardown once shutdown begins
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(2);

/// Tracing target of the metrics dump, filtered independently of the
/// verbosity flags
pub const METRICS_TARGET: &str = "stevedore::metrics";

/// Run the pipeline until end of input or a shutdown signal
pub async fn run(cli: Cli) -> Result<()> {
    let started = Instant::now();

    let _pid_file = match &cli.pid_file {
        Some(path) => match PidFile::create(path) {
            Ok(pid_file) => Some(pid_file),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not write pid file");
                None
            }
        },
        None => None,
    };

    let queue = Queue::open(
        &cli.queue_dir,
        QueueConfig {
            flush_delay: cli.flush_delay,
            ..QueueConfig::default()
        },
    )
    .with_context(|| format!("cannot open queue in {}", cli.queue_dir.display()))?;

    let shutdown = CancellationToken::new();
    let reader_done = CancellationToken::new();
    let (batch_tx, batch_rx) = mpsc::channel(1);

    let elastic_config = ElasticConfig {
        hosts: cli.hosts.clone(),
        protocol: cli.protocol.clone(),
        port: cli.port,
        username: cli.user.clone(),
        password: cli.passwd.clone(),
        ..ElasticConfig::default()
    };
    let pool = BackendPool::new(elastic_config.bulk_urls(), elastic_config.backoff.clone());

    let source = StdinSource::new(
        BufReader::new(tokio::io::stdin()),
        queue.clone(),
        StdinConfig {
            input_charset: cli.input_charset.clone(),
        },
        shutdown.clone(),
        reader_done.clone(),
    )
    .context("cannot initialize input reader")?;

    let batcher = Batcher::new(
        queue.peek(shutdown.clone()),
        batch_tx,
        BatcherConfig {
            index_prefix: cli.index.clone(),
            doc_type: cli.doc_type.clone(),
            batch_size: cli.batch_size,
            flush_delay: cli.flush_delay,
        },
        shutdown.clone(),
        reader_done.clone(),
    );

    let sink = ElasticSink::new(
        batch_rx,
        queue.clone(),
        pool.clone(),
        elastic_config,
        shutdown.clone(),
    );

    let providers: Vec<Arc<dyn MetricsProvider>> = vec![
        Arc::new(source.metrics_handle()),
        Arc::new(batcher.metrics_handle()),
        Arc::new(sink.metrics_handle()),
        Arc::new(queue.metrics_handle()),
    ];

    let mut sigint = signal(SignalKind::interrupt()).context("cannot install SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;
    let mut sigusr1 =
        signal(SignalKind::user_defined1()).context("cannot install SIGUSR1 handler")?;

    tracing::info!(
        queue_dir = %cli.queue_dir.display(),
        queued = queue.len(),
        "pipeline starting"
    );

    let workers = vec![
        tokio::spawn(source.run()),
        tokio::spawn(batcher.run()),
        tokio::spawn(sink.run()),
    ];

    let signal_task = {
        let shutdown = shutdown.clone();
        let providers = providers.clone();
        let metric_dump = cli.metric_dump;
        tokio::spawn(async move {
            let mut ticker = metric_dump.map(|period| {
                tokio::time::interval_at(tokio::time::Instant::now() + period, period)
            });
            loop {
                tokio::select! {
                    _ = sigint.recv() => {
                        tracing::info!("received SIGINT, shutting down");
                        shutdown.cancel();
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("received SIGTERM, shutting down");
                        shutdown.cancel();
                    }
                    _ = sigusr1.recv() => dump_metrics(&providers, started),
                    _ = tick(&mut ticker) => dump_metrics(&providers, started),
                }
            }
        })
    };

    let join_workers = async {
        for worker in workers {
            let _ = worker.await;
        }
    };
    tokio::pin!(join_workers);

    let forced = tokio::select! {
        _ = &mut join_workers => false,
        _ = shutdown.cancelled() => {
            tokio::time::timeout(SHUTDOWN_DEADLINE, &mut join_workers)
                .await
                .is_err()
        }
    };

    signal_task.abort();
    pool.close();

    if forced {
        tracing::error!(
            deadline_secs = SHUTDOWN_DEADLINE.as_secs(),
            "shutdown deadline exceeded, terminating"
        );
        let _ = queue.persist();
        std::process::exit(1);
    }

    queue.persist().context("cannot flush queue")?;
    if cli.debug {
        dump_metrics(&providers, started);
    }
    tracing::info!(queued = queue.len(), "clean shutdown");
    Ok(())
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Render every provider's metrics to the log
fn dump_metrics(providers: &[Arc<dyn MetricsProvider>], started: Instant) {
    tracing::info!(
        target: METRICS_TARGET,
        uptime_secs = started.elapsed().as_secs(),
        "===== metrics dump ====="
    );
    for provider in providers {
        for (name, value) in provider.dump() {
            tracing::info!(target: METRICS_TARGET, "{}.{}: {}", provider.component(), name, value);
        }
    }
}
