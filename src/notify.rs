//! Completion notices
//!
//! After a task run the worker announces where its pages were written. Delivery is
//! best-effort: a failed publish is logged and never changes the task result.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CATALOG_KIND: &str = "catalog";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Failed to encode notice: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NotifyError>;

/// Announcement of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionNotice {
    pub url: String,
    pub kind: String,
    /// RFC 3339 timestamp
    pub sent: String,
}

impl CompletionNotice {
    pub fn new(url: impl Into<String>) -> Self {
        Self::at(url, Utc::now())
    }

    pub fn at(url: impl Into<String>, sent: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            kind: CATALOG_KIND.to_string(),
            sent: sent.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[async_trait]
pub trait CompletionPublisher: Send + Sync {
    async fn publish(&self, notice: &CompletionNotice) -> Result<()>;
}

/// Writes notices to the log; used when no message bus is configured.
#[derive(Debug, Clone, Default)]
pub struct LogPublisher;

impl LogPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CompletionPublisher for LogPublisher {
    async fn publish(&self, notice: &CompletionNotice) -> Result<()> {
        let payload = serde_json::to_string(notice)?;
        tracing::info!(url = %notice.url, kind = %notice.kind, payload, "Completion notice");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_notice_fields() {
        let sent = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let notice = CompletionNotice::at("https://cloud.example.com/upload/1", sent);

        assert_eq!(notice.kind, "catalog");
        assert_eq!(notice.sent, "2024-05-01T10:00:00Z");
        assert_eq!(
            serde_json::to_value(&notice).unwrap(),
            serde_json::json!({
                "url": "https://cloud.example.com/upload/1",
                "kind": "catalog",
                "sent": "2024-05-01T10:00:00Z"
            })
        );
    }

    #[tokio::test]
    async fn test_log_publisher_accepts_notice() {
        let publisher = LogPublisher::new();
        assert!(publisher.publish(&CompletionNotice::new("tasks/1")).await.is_ok());
    }
}
