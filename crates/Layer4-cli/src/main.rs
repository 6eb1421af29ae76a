//! FilePipe CLI - Main entry point
//!
//! Thin request surface: validates input, calls the task manager, and
//! for `worker` hosts the consumer pool plus maintenance loops. All
//! state lives in the shared record store.

use anyhow::Context;
use clap::{Parser, Subcommand};
use filepipe_foundation::{PipelineConfig, TaskKind, TaskStatus, TaskStore, CONFIG_FILE};
use filepipe_processor::ProcessorRegistry;
use filepipe_task::{Broker, ExecutionRunner, MemoryBroker, TaskManager};
use filepipe_worker::{Maintenance, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// FilePipe - asynchronous file-processing pipeline
#[derive(Parser, Debug)]
#[command(name = "filepipe")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to the configuration file
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit one file for processing
    Submit {
        /// Source file
        path: PathBuf,

        /// Task kind (image, video, document, archive)
        #[arg(short, long)]
        kind: TaskKind,

        /// Owner id recorded on the task
        #[arg(short, long)]
        owner: Option<i64>,

        /// Processing options as a JSON object
        #[arg(long)]
        options: Option<String>,
    },
    /// Submit an ordered batch as one logical job
    SubmitBatch {
        /// Source files, processed in the given order
        paths: Vec<PathBuf>,

        /// Task kind applied to every item
        #[arg(short, long)]
        kind: TaskKind,

        /// Owner id recorded on the task
        #[arg(short, long)]
        owner: Option<i64>,
    },
    /// Show the current record snapshot
    Status { job_id: String },
    /// Show the audit event trail
    Events { job_id: String },
    /// Show the progress history
    History { job_id: String },
    /// Cancel a job
    Cancel { job_id: String },
    /// Retry a failed job
    Retry { job_id: String },
    /// List an owner's tasks
    List {
        #[arg(short, long)]
        owner: i64,

        /// Filter by status
        #[arg(short, long)]
        status: Option<TaskStatus>,
    },
    /// Show aggregate record counts
    Stats,
    /// Run the worker pool until interrupted
    Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = PipelineConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let store = Arc::new(TaskStore::new(&config.storage.data_dir)?);
    let (broker, receiver) = MemoryBroker::channel();
    let manager = Arc::new(
        TaskManager::new(Arc::clone(&store), Arc::clone(&broker) as Arc<dyn Broker>)
            .with_max_retries(config.worker.max_retries),
    );

    match args.command {
        Command::Submit {
            path,
            kind,
            owner,
            options,
        } => {
            let options: serde_json::Value = match options {
                Some(raw) => serde_json::from_str(&raw).context("parsing --options")?,
                None => serde_json::Value::Null,
            };

            let metadata = serde_json::json!({ "options": options });
            let record = manager.create_task(&path, kind, owner, metadata).await?;
            println!("{}", record.job_id);
        }
        Command::SubmitBatch { paths, kind, owner } => {
            anyhow::ensure!(!paths.is_empty(), "batch needs at least one file");

            let batch_files: Vec<String> = paths
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect();
            let metadata = serde_json::json!({ "batch_files": batch_files });
            let record = manager
                .create_task(&paths[0], kind, owner, metadata)
                .await?;
            println!("{}", record.job_id);
        }
        Command::Status { job_id } => {
            let snapshot = manager.get_status(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Events { job_id } => {
            for event in manager.events(&job_id).await? {
                println!(
                    "[{}] {:<10} {}",
                    event.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
                    event.kind.as_str(),
                    event.message
                );
            }
        }
        Command::History { job_id } => {
            for entry in manager.progress_history(&job_id).await? {
                println!(
                    "[{}] {:>3}% {}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
                    entry.progress,
                    entry.message
                );
            }
        }
        Command::Cancel { job_id } => {
            manager.cancel_task(&job_id).await?;
            println!("cancelled {job_id}");
        }
        Command::Retry { job_id } => {
            manager.retry_task(&job_id).await?;
            println!("retry queued for {job_id}");
        }
        Command::List { owner, status } => {
            for record in manager.get_owner_tasks(owner, status).await? {
                println!(
                    "{}  {:<10} {:>3}%  {}",
                    record.job_id,
                    record.status.as_str(),
                    record.progress,
                    record.file_name
                );
            }
        }
        Command::Stats => {
            let stats = manager.stats().await?;
            println!(
                "total {}  pending {}  processing {}  retry {}  completed {}  failed {}  cancelled {}",
                stats.total,
                stats.pending,
                stats.processing,
                stats.retry,
                stats.completed,
                stats.failed,
                stats.cancelled
            );
        }
        Command::Worker => {
            run_worker(config, store, manager, broker, receiver).await?;
        }
    }

    Ok(())
}

async fn run_worker(
    config: PipelineConfig,
    store: Arc<TaskStore>,
    manager: Arc<TaskManager>,
    broker: Arc<MemoryBroker>,
    receiver: filepipe_task::JobReceiver,
) -> anyhow::Result<()> {
    let registry = Arc::new(ProcessorRegistry::with_builtins());
    let runner = Arc::new(
        ExecutionRunner::new(Arc::clone(&manager), registry)
            .with_retry_delay(Duration::from_secs(config.worker.retry_delay_secs)),
    );

    let pool = WorkerPool::new(
        runner,
        Arc::clone(&broker),
        receiver,
        config.worker.pool_size,
    );
    let _workers = pool.spawn();

    let maintenance = Arc::new(Maintenance::new(
        store,
        Arc::clone(&broker) as Arc<dyn Broker>,
        config.maintenance.clone(),
    ));

    // Pick up records left behind by earlier runs, then sweep on a timer
    let requeued = maintenance.requeue_stranded().await?;
    tracing::info!("Startup requeue: {requeued} jobs");
    let _sweeper = Arc::clone(&maintenance).start();

    tracing::info!(
        "Worker pool running ({} workers); press Ctrl-C to stop",
        config.worker.pool_size
    );
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    Ok(())
}
