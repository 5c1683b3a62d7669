//! Page sinks
//!
//! The runner hands every finished page to a [`PageSink`], then calls
//! [`PageSink::flush`] exactly once per task and [`PageSink::flush_errors`] at most
//! once, only when job errors were recorded.

mod store;

pub use store::{ERRORS_FILE, ErrorReport, MANIFEST_FILE, ObjectStoreSink, PageManifest};

use async_trait::async_trait;
use thiserror::Error;

use crate::task::Page;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Write of page '{name}' failed: {reason}")]
    Write { name: String, reason: String },

    #[error("Flush failed: {0}")]
    Flush(String),
}

pub type Result<T> = std::result::Result<T, SinkError>;

#[async_trait]
pub trait PageSink: Send + Sync {
    /// Take ownership of one finished page.
    async fn write(&self, page: Page) -> Result<()>;

    async fn flush(&self) -> Result<()>;

    async fn flush_errors(&self, messages: &[String]) -> Result<()>;
}
