//! Run counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle shared by the runner and its jobs
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    pages_written: AtomicU64,
    related_fetched: AtomicU64,
    tasks_processed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_succeeded", "Metric incremented");
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_failed", "Metric incremented");
    }

    pub fn page_written(&self) {
        self.pages_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn related_fetched(&self) {
        self.related_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_processed(&self) {
        self.tasks_processed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_processed", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
            related_fetched: self.related_fetched.load(Ordering::Relaxed),
            tasks_processed: self.tasks_processed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub pages_written: u64,
    pub related_fetched: u64,
    pub tasks_processed: u64,
}
