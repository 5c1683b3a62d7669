//! Related-resource expansion

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::fetcher::{FetchError, ResourceFetcher};
use crate::task::RelatedResource;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("fetching related '{key}' failed: {source}")]
pub struct RelatedFetchError {
    pub key: String,
    #[source]
    pub source: FetchError,
}

impl RelatedFetchError {
    pub fn is_session_fatal(&self) -> bool {
        self.source.is_session_fatal()
    }
}

/// Fetches related sub-resources for page items. Never mutates the item; the
/// caller decides how results are merged.
pub struct RelatedExpander<'a> {
    fetcher: &'a dyn ResourceFetcher,
}

impl<'a> RelatedExpander<'a> {
    pub fn new(fetcher: &'a dyn ResourceFetcher) -> Self {
        Self { fetcher }
    }

    pub async fn expand(
        &self,
        descriptor: &RelatedResource,
        item: &Value,
    ) -> Result<Value, RelatedFetchError> {
        debug!(key = %descriptor.key, "Fetching related resource");
        self.fetcher
            .fetch_related(descriptor, item)
            .await
            .map_err(|source| RelatedFetchError {
                key: descriptor.key.clone(),
                source,
            })
    }

    /// Expand every descriptor that matches `item`, in descriptor order.
    pub async fn expand_all(
        &self,
        descriptors: &[RelatedResource],
        item: &Value,
    ) -> Result<Vec<(String, Value)>, RelatedFetchError> {
        let mut expanded = Vec::new();
        for descriptor in descriptors.iter().filter(|d| d.matches(item)) {
            let related = self.expand(descriptor, item).await?;
            expanded.push((descriptor.key.clone(), related));
        }
        Ok(expanded)
    }
}
