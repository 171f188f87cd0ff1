use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scan_jobs_rs::config::{HttpArgs, QueueArgs, WorkerArgs};
use scan_jobs_rs::notifier::Notifier;
use scan_jobs_rs::server;
use scan_jobs_rs::worker::WorkerPool;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for completion notices still in flight.
const NOTICE_GRACE: Duration = Duration::from_secs(5);

/// scan-jobs-rs: queue network scans over HTTP and run them with an external scanner.
#[derive(Debug, Parser)]
#[command(
    name = "scan-jobs-rs",
    version,
    about = "Queue network scans over HTTP and run them with an external scanner.",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API, plus embedded workers unless `--workers 0`.
    Serve {
        #[command(flatten)]
        http: HttpArgs,
        #[command(flatten)]
        queue: QueueArgs,
        #[command(flatten)]
        workers: WorkerArgs,
    },
    /// Run workers only, pulling from a shared (Redis) queue.
    Worker {
        #[command(flatten)]
        queue: QueueArgs,
        #[command(flatten)]
        workers: WorkerArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            shutdown.cancel();
        });
    }

    match cli.command {
        Command::Serve { http, queue, workers } => serve(http, queue, workers, shutdown).await,
        Command::Worker { queue, workers } => run_workers(queue, workers, shutdown).await,
    }
}

async fn serve(http: HttpArgs, queue_args: QueueArgs, workers: WorkerArgs, shutdown: CancellationToken) -> Result<()> {
    let queue = queue_args.open().await?;
    let app = server::router(queue.clone(), &http.cors_origins, http.rate_limit())?;

    let worker_cancel = CancellationToken::new();
    let mut pool = JoinSet::new();
    let mut notices = Notifier::disabled();
    if workers.workers > 0 {
        let worker = workers.worker(queue.clone())?;
        notices = worker.notifier().clone();
        pool = WorkerPool::new(worker, workers.workers).spawn(worker_cancel.clone());
        info!(workers = workers.workers, "embedded workers started");
    } else if !queue_args.is_shared() {
        warn!("no workers and no shared queue: submitted scans will never run");
    }

    let served = server::spawn_server(&http.bind, app, shutdown).await;

    worker_cancel.cancel();
    drain(&mut pool).await;
    notices.flush(NOTICE_GRACE).await;
    served
}

async fn run_workers(queue_args: QueueArgs, workers: WorkerArgs, shutdown: CancellationToken) -> Result<()> {
    if !queue_args.is_shared() {
        warn!("worker started with an in-memory queue; nothing else can submit jobs to it");
    }
    let queue = queue_args.open().await?;
    let worker = workers.worker(queue).context("failed to configure workers")?;
    let notices = worker.notifier().clone();
    let mut pool = WorkerPool::new(worker, workers.workers.max(1)).spawn(shutdown.clone());
    info!(workers = workers.workers.max(1), "workers started");

    shutdown.cancelled().await;
    drain(&mut pool).await;
    notices.flush(NOTICE_GRACE).await;
    Ok(())
}

/// Wait for workers to finish their in-flight scans.
async fn drain(pool: &mut JoinSet<()>) {
    while let Some(res) = pool.join_next().await {
        if let Err(e) = res {
            warn!(error = %e, "worker task ended abnormally");
        }
    }
}
