//! Resource fetching
//!
//! The pipeline only needs two capabilities from the inventory API: fetch one page
//! of a job and fetch one related sub-resource of an item. [`ResourceFetcher`] is
//! that seam; [`http::InventoryClient`] implements it over REST.

pub mod http;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::task::{Job, RelatedResource};

/// Failure of a remote call, with the HTTP status when one was received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{message}", status_prefix(.status))]
pub struct FetchError {
    pub status: Option<u16>,
    pub message: String,
}

fn status_prefix(status: &Option<u16>) -> String {
    status.map(|s| format!("HTTP {}: ", s)).unwrap_or_default()
}

impl FetchError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    /// Authentication rejected for the whole session; no later call can succeed.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// One page request. `continuation` is the token reported by the previous page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub method: String,
    pub path: String,
    pub params: Map<String, Value>,
    pub continuation: Option<String>,
}

impl PageRequest {
    pub fn for_job(job: &Job, continuation: Option<String>) -> Self {
        Self {
            method: job.method.clone(),
            path: job.href_slug.clone(),
            params: job.params.clone(),
            continuation,
        }
    }
}

/// A fetched page body and the token for the page after it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub body: Value,
    pub next: Option<String>,
}

#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch_page(&self, request: PageRequest) -> Result<FetchedPage>;

    async fn fetch_related(&self, descriptor: &RelatedResource, item: &Value) -> Result<Value>;
}
