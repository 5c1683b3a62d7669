mod cli;

use catalog_worker::config::{Config, LoggerConfig};
use catalog_worker::task::Task;
use catalog_worker::worker::CatalogWorker;
use clap::Parser;
use cli::{Cli, Commands, RunArgs};
use std::fs::OpenOptions;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    init_tracing(&config.logger)?;

    match cli.command {
        Commands::Run(args) => {
            if !run(&config, &args).await? {
                std::process::exit(1);
            }
        }
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(logger: &LoggerConfig) -> Result<(), AnyError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logger.level));

    match logger.log_path(std::process::id()) {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

async fn run(config: &Config, args: &RunArgs) -> Result<bool, AnyError> {
    let payload = if args.reads_stdin() {
        let mut buf = Vec::new();
        tokio::io::stdin().read_to_end(&mut buf).await?;
        buf
    } else {
        tokio::fs::read(&args.task).await?
    };
    let task = Task::from_slice(&payload)?;

    let worker = CatalogWorker::from_config(config)?;
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let outcome = worker.run_task(&task, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    let metrics = worker.metrics().snapshot();
    info!(
        task_id = task.id(),
        pages = metrics.pages_written,
        jobs_failed = metrics.jobs_failed,
        "Run complete"
    );

    Ok(outcome.ok())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Interrupt received, cancelling task");
        cancel.cancel();
    }
}
