//! Job runner
//!
//! Runs every job of a task through the [`PaginationController`], at most
//! `max_parallel_jobs` at a time, and folds the per-job results into an
//! [`Outcome`]. Job results are collected in task order, so the error list
//! always follows the job list regardless of which job finished first.

use futures::{StreamExt, TryStreamExt, stream};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::fetcher::ResourceFetcher;
use crate::observability::Metrics;
use crate::pagination::{JobFailure, PaginationController};
use crate::sink::{PageSink, SinkError};
use crate::task::{Job, Outcome, OutcomeStatus, PageNaming, Task};

/// Task-fatal failure. Job failures end up in the [`Outcome`] instead.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Page sink failed: {0}")]
    Sink(#[from] SinkError),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

enum JobResult {
    Done,
    Failed(String),
    Interrupted,
}

/// Shared state of one task run.
struct RunContext<'a> {
    task_id: &'a str,
    naming: PageNaming,
    /// Cancelled on external cancellation, session failure or sink failure
    halt: CancellationToken,
    session_failure: OnceLock<String>,
}

pub struct JobRunner {
    fetcher: Arc<dyn ResourceFetcher>,
    sink: Arc<dyn PageSink>,
    max_parallel_jobs: usize,
    metrics: Arc<Metrics>,
}

impl JobRunner {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, sink: Arc<dyn PageSink>) -> Self {
        Self {
            fetcher,
            sink,
            max_parallel_jobs: 1,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_max_parallel_jobs(mut self, max_parallel_jobs: usize) -> Self {
        self.max_parallel_jobs = max_parallel_jobs.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run all jobs of `task`, then flush the sink once and, when any job
    /// failed, hand it the error list.
    pub async fn run(&self, task: &Task, cancel: &CancellationToken) -> Result<Outcome> {
        let ctx = RunContext {
            task_id: task.id(),
            naming: PageNaming::new(&task.input.response_format),
            halt: cancel.child_token(),
            session_failure: OnceLock::new(),
        };
        let ctx = &ctx;

        info!(
            task_id = ctx.task_id,
            jobs = task.jobs().len(),
            max_parallel_jobs = self.max_parallel_jobs,
            "Running task"
        );

        let results: Vec<JobResult> = stream::iter(task.jobs().iter().enumerate())
            .map(move |(index, job)| self.run_job(ctx, index, job))
            .buffered(self.max_parallel_jobs)
            .try_collect()
            .await?;

        let errors: Vec<String> = results
            .into_iter()
            .filter_map(|result| match result {
                JobResult::Failed(message) => Some(message),
                JobResult::Done | JobResult::Interrupted => None,
            })
            .collect();

        self.sink.flush().await?;
        if !errors.is_empty() {
            self.sink.flush_errors(&errors).await?;
        }
        self.metrics.task_processed();

        let status = if cancel.is_cancelled() {
            OutcomeStatus::Cancelled
        } else if errors.is_empty() {
            OutcomeStatus::Completed
        } else {
            OutcomeStatus::Failed
        };
        info!(task_id = ctx.task_id, ?status, errors = errors.len(), "Task finished");

        Ok(Outcome { status, errors })
    }

    async fn run_job(
        &self,
        ctx: &RunContext<'_>,
        index: usize,
        job: &Job,
    ) -> std::result::Result<JobResult, SinkError> {
        if ctx.halt.is_cancelled() {
            return Ok(self.skipped(ctx, job));
        }

        info!(task_id = ctx.task_id, job = index, href_slug = %job.href_slug, "Starting job");
        let controller = PaginationController::new(
            self.fetcher.as_ref(),
            self.sink.as_ref(),
            &ctx.naming,
            &self.metrics,
        );

        match controller.run(job, &ctx.halt).await {
            Ok(progress) if progress.interrupted => Ok(self.skipped(ctx, job)),
            Ok(_) => {
                self.metrics.job_succeeded();
                Ok(JobResult::Done)
            }
            Err(JobFailure::Sink(e)) => {
                ctx.halt.cancel();
                Err(e)
            }
            Err(failure) => {
                self.metrics.job_failed();
                let message = failure.to_string();
                warn!(task_id = ctx.task_id, job = index, error = %message, "Job failed");
                if failure.is_session_fatal() {
                    // Record the cause before halting so every skipped job sees it.
                    let _ = ctx.session_failure.set(message.clone());
                    ctx.halt.cancel();
                }
                Ok(JobResult::Failed(message))
            }
        }
    }

    /// A job that never finished because the run was halted.
    fn skipped(&self, ctx: &RunContext<'_>, job: &Job) -> JobResult {
        match ctx.session_failure.get() {
            Some(cause) => {
                self.metrics.job_failed();
                JobResult::Failed(format!(
                    "{}: skipped after session failure: {}",
                    job.href_slug, cause
                ))
            }
            None => JobResult::Interrupted,
        }
    }
}
