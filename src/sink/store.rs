//! Object-store backed page sink

use async_trait::async_trait;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{ObjectStore, PutPayload, path::Path as StoragePath};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{PageSink, Result, SinkError};
use crate::task::Page;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const ERRORS_FILE: &str = "errors.json";

/// Listing written on flush, page names in write order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageManifest {
    pub pages: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub errors: Vec<String>,
}

/// Uploads pages under `{prefix}/{page name}`.
pub struct ObjectStoreSink {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    written: Mutex<Vec<String>>,
}

impl ObjectStoreSink {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_matches('/').to_string(),
            written: Mutex::new(Vec::new()),
        }
    }

    /// In-memory storage for testing/development
    pub fn in_memory(prefix: impl Into<String>) -> Self {
        Self::new(Arc::new(InMemory::new()), prefix)
    }

    /// Pages stored as files below `root`; the directory is created if missing.
    pub fn local(root: &Path, prefix: impl Into<String>) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let store = LocalFileSystem::new_with_prefix(root).map_err(std::io::Error::other)?;
        Ok(Self::new(Arc::new(store), prefix))
    }

    pub fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    pub fn location(&self) -> &str {
        &self.prefix
    }

    /// Page names written so far, in write order.
    pub fn written(&self) -> Vec<String> {
        self.written
            .lock()
            .map(|names| names.clone())
            .unwrap_or_default()
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> std::result::Result<(), object_store::Error> {
        let size = data.len();
        self.store
            .put(&StoragePath::from(key), PutPayload::from(data))
            .await?;
        tracing::debug!(key, size, "Uploaded to storage");
        Ok(())
    }
}

#[async_trait]
impl PageSink for ObjectStoreSink {
    async fn write(&self, page: Page) -> Result<()> {
        let key = self.key(&page.name);
        let size = page.data.len();

        self.store
            .put(&StoragePath::from(key.as_str()), PutPayload::from(page.data))
            .await
            .map_err(|e| SinkError::Write {
                name: page.name.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(key, size, "Page stored");

        self.written
            .lock()
            .map_err(|_| SinkError::Write {
                name: page.name.clone(),
                reason: "page index poisoned".to_string(),
            })?
            .push(page.name);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let pages = self.written();
        let manifest = PageManifest {
            count: pages.len(),
            pages,
        };
        let data = serde_json::to_vec(&manifest).map_err(|e| SinkError::Flush(e.to_string()))?;

        self.put(&self.key(MANIFEST_FILE), data)
            .await
            .map_err(|e| SinkError::Flush(e.to_string()))?;

        tracing::info!(prefix = %self.prefix, pages = manifest.count, "Pages flushed");
        Ok(())
    }

    async fn flush_errors(&self, messages: &[String]) -> Result<()> {
        let report = ErrorReport {
            errors: messages.to_vec(),
        };
        let data = serde_json::to_vec(&report).map_err(|e| SinkError::Flush(e.to_string()))?;

        self.put(&self.key(ERRORS_FILE), data)
            .await
            .map_err(|e| SinkError::Flush(e.to_string()))?;

        tracing::warn!(prefix = %self.prefix, errors = messages.len(), "Error report flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    async fn read(sink: &ObjectStoreSink, name: &str) -> Vec<u8> {
        sink.store
            .get(&StoragePath::from(sink.key(name).as_str()))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap()
            .to_vec()
    }

    fn page(name: &str, body: &str) -> Page {
        Page {
            name: name.to_string(),
            data: Bytes::from(body.to_string()),
        }
    }

    #[tokio::test]
    async fn test_write_and_flush_manifest() {
        let sink = ObjectStoreSink::in_memory("tasks/t1");
        sink.write(page("hosts_page0.json", "{\"a\":1}")).await.unwrap();
        sink.write(page("hosts_page1.json", "{\"a\":2}")).await.unwrap();
        sink.flush().await.unwrap();

        assert_eq!(read(&sink, "hosts_page1.json").await, b"{\"a\":2}");

        let manifest: PageManifest =
            serde_json::from_slice(&read(&sink, MANIFEST_FILE).await).unwrap();
        assert_eq!(manifest.count, 2);
        assert_eq!(manifest.pages, vec!["hosts_page0.json", "hosts_page1.json"]);
    }

    #[tokio::test]
    async fn test_flush_errors_report() {
        let sink = ObjectStoreSink::in_memory("tasks/t2");
        let messages = vec!["job 0 failed".to_string()];
        sink.flush_errors(&messages).await.unwrap();

        let report: ErrorReport = serde_json::from_slice(&read(&sink, ERRORS_FILE).await).unwrap();
        assert_eq!(report.errors, messages);
    }

    #[tokio::test]
    async fn test_local_sink_creates_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("pages");
        let sink = ObjectStoreSink::local(&root, "tasks/t3").unwrap();

        sink.write(page("x_page0.json", "[]")).await.unwrap();
        sink.flush().await.unwrap();

        assert!(root.join("tasks/t3/x_page0.json").is_file());
        assert!(root.join("tasks/t3/manifest.json").is_file());
    }

    #[test]
    fn test_key_without_prefix() {
        let sink = ObjectStoreSink::in_memory("/");
        assert_eq!(sink.key("a.json"), "a.json");
        assert_eq!(sink.location(), "");
    }
}
