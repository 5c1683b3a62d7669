//! Catalog task model
//!
//! A [`Task`] arrives as JSON from the catalog inventory service:
//!
//! ```json
//! {
//!   "id": "4f1c…",
//!   "state": "running",
//!   "status": "ok",
//!   "created_at": "2024-05-01T10:00:00Z",
//!   "updated_at": "2024-05-01T10:00:00Z",
//!   "input": {
//!     "response_format": "json",
//!     "upload_url": "https://cloud.example.com/ingress/upload",
//!     "jobs": [
//!       {
//!         "method": "GET",
//!         "href_slug": "/api/v2/job_templates/",
//!         "fetch_all_pages": true,
//!         "params": {"page_size": 50},
//!         "apply_filter": "results[].{id:id, name:name}",
//!         "fetch_related": [{"key": "survey_spec", "predicate": "survey_enabled"}],
//!         "page_prefix": "job_templates"
//!       }
//!     ]
//!   }
//! }
//! ```
//!
//! Unknown fields are ignored.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

use crate::filter::is_truthy;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("malformed task: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("task {0} has no jobs")]
    NoJobs(String),

    #[error("task {task} repeats page prefix '{prefix}'")]
    DuplicatePagePrefix { task: String, prefix: String },
}

/// One unit of received work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub status: String,
    pub input: TaskInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInput {
    #[serde(default = "default_response_format")]
    pub response_format: String,
    #[serde(default)]
    pub upload_url: String,
    pub jobs: Vec<Job>,
}

fn default_response_format() -> String {
    "json".to_string()
}

impl Task {
    pub fn new(id: impl Into<String>, input: TaskInput) -> Result<Self, TaskError> {
        let task = Self {
            id: id.into(),
            created_at: Some(Utc::now()),
            updated_at: None,
            state: String::new(),
            status: String::new(),
            input,
        };
        task.validate()?;
        Ok(task)
    }

    /// Decode and validate an incoming task payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self, TaskError> {
        let task: Task = serde_json::from_slice(payload)?;
        task.validate()?;
        Ok(task)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn jobs(&self) -> &[Job] {
        &self.input.jobs
    }

    /// Jobs an external scheduler should re-run on their refresh interval.
    pub fn polling_jobs(&self) -> impl Iterator<Item = (usize, &Job)> {
        self.input
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.is_polling())
    }

    fn validate(&self) -> Result<(), TaskError> {
        if self.input.jobs.is_empty() {
            return Err(TaskError::NoJobs(self.id.clone()));
        }

        let mut seen = HashSet::new();
        for job in &self.input.jobs {
            if !seen.insert(job.page_prefix.as_str()) {
                return Err(TaskError::DuplicatePagePrefix {
                    task: self.id.clone(),
                    prefix: job.page_prefix.clone(),
                });
            }
        }
        Ok(())
    }
}

/// One fetch-and-filter unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(default = "default_method")]
    pub method: String,
    pub href_slug: String,
    #[serde(default)]
    pub fetch_all_pages: bool,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Raw filter value, classified by [`crate::filter::FilterSpec::parse`]
    #[serde(default)]
    pub apply_filter: Option<Value>,
    #[serde(default)]
    pub refresh_interval_seconds: u64,
    #[serde(default)]
    pub fetch_related: Vec<RelatedResource>,
    #[serde(default)]
    pub page_prefix: String,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Job {
    pub fn get(href_slug: impl Into<String>, page_prefix: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            href_slug: href_slug.into(),
            fetch_all_pages: false,
            params: Map::new(),
            apply_filter: None,
            refresh_interval_seconds: 0,
            fetch_related: Vec::new(),
            page_prefix: page_prefix.into(),
        }
    }

    pub fn is_polling(&self) -> bool {
        self.refresh_interval_seconds > 0
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.is_polling()
            .then(|| Duration::from_secs(self.refresh_interval_seconds))
    }
}

/// Describes a sub-resource to fetch for each matching item of a page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedResource {
    /// Key the related object is stored under in the item
    pub key: String,
    /// Path template; `{id}` is replaced by the item's id. Falls back to
    /// `item.related.<key>` when absent.
    #[serde(default)]
    pub href_slug: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Only items whose predicate field is truthy are expanded
    #[serde(default)]
    pub predicate: Option<String>,
}

fn default_id_field() -> String {
    "id".to_string()
}

impl RelatedResource {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            href_slug: None,
            id_field: default_id_field(),
            predicate: None,
        }
    }

    /// Path to fetch for `item`, if one can be resolved.
    pub fn resolve_path(&self, item: &Value) -> Option<String> {
        let fields = item.as_object()?;
        match &self.href_slug {
            Some(template) if template.contains("{id}") => {
                let id = match fields.get(&self.id_field)? {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some(template.replace("{id}", &id))
            }
            Some(path) => Some(path.clone()),
            None => fields
                .get("related")?
                .get(&self.key)?
                .as_str()
                .map(str::to_string),
        }
    }

    pub fn matches(&self, item: &Value) -> bool {
        if !item.is_object() {
            return false;
        }
        if let Some(predicate) = &self.predicate {
            if !item.get(predicate).is_some_and(is_truthy) {
                return false;
            }
        }
        self.resolve_path(item).is_some()
    }
}

/// One named unit of output.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub name: String,
    pub data: Bytes,
}

/// Builds page names from a job prefix and a 0-based ordinal.
#[derive(Debug, Clone)]
pub struct PageNaming {
    extension: String,
}

impl PageNaming {
    pub fn new(response_format: &str) -> Self {
        let extension = match response_format.trim().to_ascii_lowercase().as_str() {
            "" => "json".to_string(),
            other => other.to_string(),
        };
        Self { extension }
    }

    pub fn page_name(&self, prefix: &str, ordinal: usize) -> String {
        format!("{}_page{}.{}", prefix, ordinal, self.extension)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Final result of one task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub errors: Vec<String>,
}

impl Outcome {
    pub fn ok(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}
