//! Worker process entry point.
//!
//! Polls the shared Postgres backlog and resolves tasks until told to
//! drain. Several instances can run against the same database; the store's
//! atomic claim keeps them from double-processing.

use std::path::PathBuf;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use mailspool_queue::{PostgresTaskStore, Queue};
use mailspool_worker::{NoopDelivery, Worker, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "mailspool-worker")]
#[command(about = "Email task queue worker")]
struct Args {
    /// Path to a YAML worker config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Override the poll interval from the config file
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    /// Worker name used in logs
    #[arg(long)]
    name: Option<String>,

    /// Apply the email_tasks schema before starting
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mailspool_observability::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };
    if let Some(secs) = args.poll_interval_secs {
        config.poll_interval_secs = secs;
    }
    if let Some(name) = args.name {
        config.name = name;
    }

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&args.database_url)
        .await?;
    let store = PostgresTaskStore::new(pool);
    if args.migrate {
        store.migrate().await?;
    }

    let queue = Queue::new(store);
    let stats = queue.stats().await?;
    tracing::info!(
        pending = stats.pending,
        processing = stats.processing,
        "connected to task store"
    );

    // No SMTP transport is wired in this binary; delivery logs the would-be
    // send. Real transports implement `Delivery` and swap in here.
    let worker = Worker::new(queue, NoopDelivery, config);

    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received, finishing current task");
            shutdown.drain();
        }
    });

    worker.run().await;
    Ok(())
}
