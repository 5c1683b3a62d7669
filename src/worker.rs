//! Catalog worker
//!
//! Entry point for one received task: decode it, run its jobs into an
//! object-store sink under `tasks/{task id}`, announce the upload and report a
//! single boolean.

use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, StorageConfig, StorageProvider};
use crate::fetcher::http::InventoryClient;
use crate::fetcher::{FetchError, ResourceFetcher};
use crate::notify::{CompletionNotice, CompletionPublisher, LogPublisher};
use crate::observability::Metrics;
use crate::runner::{JobRunner, RunnerError};
use crate::sink::ObjectStoreSink;
use crate::task::{Outcome, Task};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to build inventory client: {0}")]
    Client(#[from] FetchError),

    #[error("Failed to open page storage: {0}")]
    Storage(String),
}

pub struct CatalogWorker {
    fetcher: Arc<dyn ResourceFetcher>,
    store: Arc<dyn ObjectStore>,
    publisher: Arc<dyn CompletionPublisher>,
    max_parallel_jobs: usize,
    metrics: Arc<Metrics>,
}

impl CatalogWorker {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        store: Arc<dyn ObjectStore>,
        publisher: Arc<dyn CompletionPublisher>,
    ) -> Self {
        Self {
            fetcher,
            store,
            publisher,
            max_parallel_jobs: 1,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_max_parallel_jobs(mut self, max_parallel_jobs: usize) -> Self {
        self.max_parallel_jobs = max_parallel_jobs;
        self
    }

    /// Wire the REST client, page storage and log publisher from configuration.
    pub fn from_config(config: &Config) -> Result<Self, WorkerError> {
        let client = InventoryClient::from_config(&config.inventory, &config.proxies)?;
        let store = open_store(&config.storage)?;
        Ok(Self::new(Arc::new(client), store, Arc::new(LogPublisher::new()))
            .with_max_parallel_jobs(config.runner.max_parallel_jobs))
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run a decoded task and publish its completion notice.
    pub async fn run_task(
        &self,
        task: &Task,
        cancel: &CancellationToken,
    ) -> Result<Outcome, RunnerError> {
        let sink = Arc::new(ObjectStoreSink::new(
            self.store.clone(),
            format!("tasks/{}", task.id()),
        ));
        let runner = JobRunner::new(self.fetcher.clone(), sink.clone())
            .with_max_parallel_jobs(self.max_parallel_jobs)
            .with_metrics(self.metrics.clone());

        for (index, job) in task.polling_jobs() {
            info!(
                task_id = task.id(),
                job = index,
                refresh_interval_secs = job.refresh_interval_seconds,
                "Polling job runs once per invocation"
            );
        }

        let outcome = runner.run(task, cancel).await?;

        let url = if task.input.upload_url.is_empty() {
            sink.location().to_string()
        } else {
            task.input.upload_url.clone()
        };
        if let Err(e) = self.publisher.publish(&CompletionNotice::new(url)).await {
            warn!(task_id = task.id(), error = %e, "Failed to publish completion notice");
        }

        Ok(outcome)
    }

    /// Process a raw task payload and report whether it fully succeeded.
    pub async fn process(&self, payload: &[u8], cancel: &CancellationToken) -> bool {
        let task = match Task::from_slice(payload) {
            Ok(task) => task,
            Err(e) => {
                error!(error = %e, "Rejected task");
                return false;
            }
        };

        match self.run_task(&task, cancel).await {
            Ok(outcome) => outcome.ok(),
            Err(e) => {
                error!(task_id = task.id(), error = %e, "Task aborted");
                false
            }
        }
    }
}

fn open_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, WorkerError> {
    match config.provider {
        StorageProvider::Memory => Ok(Arc::new(InMemory::new())),
        StorageProvider::Local => {
            std::fs::create_dir_all(&config.root)
                .map_err(|e| WorkerError::Storage(format!("{}: {}", config.root.display(), e)))?;
            let store = LocalFileSystem::new_with_prefix(&config.root)
                .map_err(|e| WorkerError::Storage(e.to_string()))?;
            Ok(Arc::new(store))
        }
    }
}
