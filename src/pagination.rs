//! Pagination controller: drives one job across its pages
//!
//! Each fetched page is filtered, its items are expanded with related resources,
//! and the result is written to the sink as `{page_prefix}_page{n}.{ext}` with `n`
//! counting from 0 in fetch order. The page that carries no continuation is still
//! written; with `fetch_all_pages` unset only the first page is fetched.

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::fetcher::{FetchError, PageRequest, ResourceFetcher};
use crate::filter::{Filter, FilterError};
use crate::observability::Metrics;
use crate::related::{RelatedExpander, RelatedFetchError};
use crate::sink::{PageSink, SinkError};
use crate::task::{Job, Page, PageNaming};

const RESULTS_KEY: &str = "results";

/// Failure scoped to a single job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Related(#[from] RelatedFetchError),

    #[error("failed to encode page: {0}")]
    Encode(#[from] serde_json::Error),
}

impl JobError {
    pub fn is_session_fatal(&self) -> bool {
        match self {
            JobError::Fetch(e) => e.is_session_fatal(),
            JobError::Related(e) => e.is_session_fatal(),
            _ => false,
        }
    }
}

/// Why a job stopped early. Sink failures are task-fatal and kept apart.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("{href_slug} page {page}: {source}")]
    Job {
        href_slug: String,
        page: usize,
        #[source]
        source: JobError,
    },

    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl JobFailure {
    fn at(job: &Job, page: usize, source: impl Into<JobError>) -> Self {
        JobFailure::Job {
            href_slug: job.href_slug.clone(),
            page,
            source: source.into(),
        }
    }

    pub fn is_session_fatal(&self) -> bool {
        matches!(self, JobFailure::Job { source, .. } if source.is_session_fatal())
    }
}

/// Pages written by one pass over a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobProgress {
    pub pages: usize,
    /// Stopped by cancellation before the last page
    pub interrupted: bool,
}

pub struct PaginationController<'a> {
    fetcher: &'a dyn ResourceFetcher,
    sink: &'a dyn PageSink,
    naming: &'a PageNaming,
    metrics: &'a Metrics,
}

impl<'a> PaginationController<'a> {
    pub fn new(
        fetcher: &'a dyn ResourceFetcher,
        sink: &'a dyn PageSink,
        naming: &'a PageNaming,
        metrics: &'a Metrics,
    ) -> Self {
        Self {
            fetcher,
            sink,
            naming,
            metrics,
        }
    }

    /// Run one pass over `job`. No page is fetched after a failure or once
    /// `cancel` fires.
    pub async fn run(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<JobProgress, JobFailure> {
        let filter =
            Filter::from_value(job.apply_filter.as_ref()).map_err(|e| JobFailure::at(job, 0, e))?;

        let mut continuation: Option<String> = None;
        let mut ordinal = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(interrupted(ordinal));
            }

            debug!(href_slug = %job.href_slug, page = ordinal, "Fetching page");
            let request = PageRequest::for_job(job, continuation.take());
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(interrupted(ordinal)),
                result = self.fetcher.fetch_page(request) => {
                    result.map_err(|e| JobFailure::at(job, ordinal, e))?
                }
            };

            let mut body = match &filter {
                Some(filter) => filter
                    .apply(&fetched.body)
                    .map_err(|e| JobFailure::at(job, ordinal, e))?,
                None => fetched.body,
            };

            self.expand_items(job, &mut body)
                .await
                .map_err(|e| JobFailure::at(job, ordinal, e))?;

            let data = serde_json::to_vec(&body).map_err(|e| JobFailure::at(job, ordinal, e))?;
            let page = Page {
                name: self.naming.page_name(&job.page_prefix, ordinal),
                data: Bytes::from(data),
            };
            self.sink.write(page).await?;
            self.metrics.page_written();
            ordinal += 1;

            match fetched.next {
                Some(next) if job.fetch_all_pages => continuation = Some(next),
                _ => break,
            }
        }

        info!(href_slug = %job.href_slug, pages = ordinal, "Job finished");
        Ok(JobProgress {
            pages: ordinal,
            interrupted: false,
        })
    }

    async fn expand_items(&self, job: &Job, body: &mut Value) -> Result<(), RelatedFetchError> {
        if job.fetch_related.is_empty() {
            return Ok(());
        }

        let expander = RelatedExpander::new(self.fetcher);
        for item in page_items(body) {
            let expanded = expander.expand_all(&job.fetch_related, item).await?;
            for (key, related) in expanded {
                self.metrics.related_fetched();
                if !merge_related(item, key.clone(), related) {
                    debug!(key, "Item already has key, related result dropped");
                }
            }
        }
        Ok(())
    }
}

fn interrupted(pages: usize) -> JobProgress {
    JobProgress {
        pages,
        interrupted: true,
    }
}

/// Items of a filtered page: the `results` array of a listing, the elements of a
/// bare array, or a single object.
fn page_items(body: &mut Value) -> Vec<&mut Value> {
    if body.get(RESULTS_KEY).is_some_and(Value::is_array) {
        match body.get_mut(RESULTS_KEY) {
            Some(Value::Array(items)) => items.iter_mut().collect(),
            _ => Vec::new(),
        }
    } else if body.is_object() {
        vec![body]
    } else if let Value::Array(items) = body {
        items.iter_mut().collect()
    } else {
        Vec::new()
    }
}

/// Existing keys are never overwritten.
fn merge_related(item: &mut Value, key: String, related: Value) -> bool {
    match item {
        Value::Object(map) if !map.contains_key(&key) => {
            map.insert(key, related);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchedPage;
    use crate::task::RelatedResource;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves canned pages in order and records every request.
    #[derive(Default)]
    struct ScriptedFetcher {
        pages: Mutex<VecDeque<crate::fetcher::Result<FetchedPage>>>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl ScriptedFetcher {
        fn with_pages(pages: Vec<crate::fetcher::Result<FetchedPage>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<PageRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ResourceFetcher for ScriptedFetcher {
        async fn fetch_page(&self, request: PageRequest) -> crate::fetcher::Result<FetchedPage> {
            self.requests.lock().unwrap().push(request);
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::transport("no more pages")))
        }

        async fn fetch_related(
            &self,
            descriptor: &RelatedResource,
            item: &Value,
        ) -> crate::fetcher::Result<Value> {
            Ok(json!({"for": item["id"].clone(), "key": descriptor.key.clone()}))
        }
    }

    #[derive(Default)]
    struct VecSink {
        pages: Mutex<Vec<Page>>,
    }

    impl VecSink {
        fn names(&self) -> Vec<String> {
            self.pages.lock().unwrap().iter().map(|p| p.name.clone()).collect()
        }

        fn body(&self, index: usize) -> Value {
            serde_json::from_slice(&self.pages.lock().unwrap()[index].data).unwrap()
        }
    }

    #[async_trait]
    impl PageSink for VecSink {
        async fn write(&self, page: Page) -> crate::sink::Result<()> {
            self.pages.lock().unwrap().push(page);
            Ok(())
        }

        async fn flush(&self) -> crate::sink::Result<()> {
            Ok(())
        }

        async fn flush_errors(&self, _messages: &[String]) -> crate::sink::Result<()> {
            Ok(())
        }
    }

    fn listing(ids: &[u64], next: Option<&str>) -> crate::fetcher::Result<FetchedPage> {
        let results: Vec<Value> = ids.iter().map(|id| json!({"id": id, "name": format!("item-{}", id)})).collect();
        Ok(FetchedPage {
            body: json!({"count": ids.len(), "next": next, "results": results}),
            next: next.map(str::to_string),
        })
    }

    async fn run_job(
        fetcher: &ScriptedFetcher,
        sink: &VecSink,
        job: &Job,
    ) -> Result<JobProgress, JobFailure> {
        let naming = PageNaming::new("json");
        let metrics = Metrics::new();
        let controller = PaginationController::new(fetcher, sink, &naming, &metrics);
        controller.run(job, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_fetch_all_pages_follows_continuations() {
        let fetcher = ScriptedFetcher::with_pages(vec![
            listing(&[1], Some("/hosts/?page=2")),
            listing(&[2], Some("/hosts/?page=3")),
            listing(&[3], Some("/hosts/?page=4")),
            listing(&[4], None),
        ]);
        let sink = VecSink::default();
        let mut job = Job::get("/hosts/", "hosts");
        job.fetch_all_pages = true;

        let progress = run_job(&fetcher, &sink, &job).await.unwrap();

        assert_eq!(progress, JobProgress { pages: 4, interrupted: false });
        assert_eq!(
            sink.names(),
            vec![
                "hosts_page0.json",
                "hosts_page1.json",
                "hosts_page2.json",
                "hosts_page3.json"
            ]
        );
        let continuations: Vec<Option<String>> =
            fetcher.requests().into_iter().map(|r| r.continuation).collect();
        assert_eq!(
            continuations,
            vec![
                None,
                Some("/hosts/?page=2".to_string()),
                Some("/hosts/?page=3".to_string()),
                Some("/hosts/?page=4".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_single_page_when_fetch_all_unset() {
        let fetcher = ScriptedFetcher::with_pages(vec![
            listing(&[1], Some("/hosts/?page=2")),
            listing(&[2], None),
        ]);
        let sink = VecSink::default();
        let job = Job::get("/hosts/", "hosts");

        let progress = run_job(&fetcher, &sink, &job).await.unwrap();

        assert_eq!(progress.pages, 1);
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_final_page_is_written() {
        let fetcher = ScriptedFetcher::with_pages(vec![
            listing(&[1], Some("/hosts/?page=2")),
            listing(&[], None),
        ]);
        let sink = VecSink::default();
        let mut job = Job::get("/hosts/", "hosts");
        job.fetch_all_pages = true;

        run_job(&fetcher, &sink, &job).await.unwrap();

        assert_eq!(sink.names().len(), 2);
        assert_eq!(sink.body(1)["results"], json!([]));
    }

    #[tokio::test]
    async fn test_failure_stops_fetching_and_is_tagged() {
        let fetcher = ScriptedFetcher::with_pages(vec![
            listing(&[1], Some("/hosts/?page=2")),
            Err(FetchError::new(Some(500), "Internal Server Error")),
            listing(&[3], None),
        ]);
        let sink = VecSink::default();
        let mut job = Job::get("/hosts/", "hosts");
        job.fetch_all_pages = true;

        let err = run_job(&fetcher, &sink, &job).await.unwrap_err();

        assert_eq!(fetcher.requests().len(), 2);
        assert_eq!(sink.names(), vec!["hosts_page0.json"]);
        assert!(!err.is_session_fatal());
        assert_eq!(
            err.to_string(),
            "/hosts/ page 1: fetch failed: HTTP 500: Internal Server Error"
        );
    }

    #[tokio::test]
    async fn test_invalid_filter_fails_before_fetching() {
        let fetcher = ScriptedFetcher::with_pages(vec![listing(&[1], None)]);
        let sink = VecSink::default();
        let mut job = Job::get("/hosts/", "hosts");
        job.apply_filter = Some(json!("Not a valid expression"));

        let err = run_job(&fetcher, &sink, &job).await.unwrap_err();

        assert!(matches!(
            err,
            JobFailure::Job { page: 0, source: JobError::Filter(FilterError::InvalidFilterSpec(_)), .. }
        ));
        assert!(fetcher.requests().is_empty());
        assert!(sink.names().is_empty());
    }

    #[tokio::test]
    async fn test_filter_and_related_merge() {
        let fetcher = ScriptedFetcher::with_pages(vec![listing(&[1, 2], None)]);
        let sink = VecSink::default();
        let mut job = Job::get("/job_templates/", "templates");
        job.apply_filter = Some(json!("results[].{id:id, name:name}"));
        job.fetch_related = vec![RelatedResource {
            key: "survey_spec".to_string(),
            href_slug: Some("/job_templates/{id}/survey_spec/".to_string()),
            id_field: "id".to_string(),
            predicate: None,
        }];

        run_job(&fetcher, &sink, &job).await.unwrap();

        let body = sink.body(0);
        assert_eq!(body["count"], json!(2));
        assert_eq!(
            body["results"][1],
            json!({"id": 2, "name": "item-2", "survey_spec": {"for": 2, "key": "survey_spec"}})
        );
        assert!(body["results"][0].get("age").is_none());
    }

    #[tokio::test]
    async fn test_related_never_overwrites_existing_key() {
        let fetcher = ScriptedFetcher::with_pages(vec![listing(&[1], None)]);
        let sink = VecSink::default();
        let mut job = Job::get("/job_templates/", "templates");
        job.fetch_related = vec![RelatedResource {
            key: "name".to_string(),
            href_slug: Some("/job_templates/{id}/".to_string()),
            id_field: "id".to_string(),
            predicate: None,
        }];

        run_job(&fetcher, &sink, &job).await.unwrap();

        assert_eq!(sink.body(0)["results"][0]["name"], json!("item-1"));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_page() {
        let fetcher = ScriptedFetcher::with_pages(vec![listing(&[1], None)]);
        let sink = VecSink::default();
        let job = Job::get("/hosts/", "hosts");
        let naming = PageNaming::new("json");
        let metrics = Metrics::new();
        let controller = PaginationController::new(&fetcher, &sink, &naming, &metrics);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let progress = controller.run(&job, &cancel).await.unwrap();

        assert_eq!(progress, JobProgress { pages: 0, interrupted: true });
        assert!(fetcher.requests().is_empty());
    }

    /// Serves one page, then cancels on the next request and never answers it.
    struct StallingFetcher {
        cancel: CancellationToken,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl ResourceFetcher for StallingFetcher {
        async fn fetch_page(&self, _request: PageRequest) -> crate::fetcher::Result<FetchedPage> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if call == 1 {
                return listing(&[1], Some("/hosts/?page=2"));
            }
            self.cancel.cancel();
            std::future::pending().await
        }

        async fn fetch_related(
            &self,
            _descriptor: &RelatedResource,
            _item: &Value,
        ) -> crate::fetcher::Result<Value> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_fetch() {
        let cancel = CancellationToken::new();
        let fetcher = StallingFetcher {
            cancel: cancel.clone(),
            calls: Mutex::new(0),
        };
        let sink = VecSink::default();
        let naming = PageNaming::new("json");
        let metrics = Metrics::new();
        let controller = PaginationController::new(&fetcher, &sink, &naming, &metrics);
        let mut job = Job::get("/hosts/", "hosts");
        job.fetch_all_pages = true;

        let progress = controller.run(&job, &cancel).await.unwrap();

        assert_eq!(progress, JobProgress { pages: 1, interrupted: true });
        assert_eq!(sink.names(), vec!["hosts_page0.json"]);
        assert_eq!(*fetcher.calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_page_items_shapes() {
        let mut listing = json!({"count": 2, "results": [{"a": 1}, {"a": 2}]});
        assert_eq!(page_items(&mut listing).len(), 2);

        let mut array = json!([{"a": 1}, 2, 3]);
        assert_eq!(page_items(&mut array).len(), 3);

        let mut single = json!({"id": 1});
        assert_eq!(page_items(&mut single).len(), 1);

        let mut scalar = json!("x");
        assert!(page_items(&mut scalar).is_empty());
    }
}
