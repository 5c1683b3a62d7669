use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub proxies: ProxySettings,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
}

/// Inventory API connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InventoryConfig {
    #[serde(default = "default_inventory_url")]
    pub url: String,
    /// API token (loaded from environment, not from config file)
    #[serde(skip)]
    pub token: Option<String>,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: ByteSize,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            url: default_inventory_url(),
            token: None,
            verify_ssl: true,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_body_size: default_max_body_size(),
        }
    }
}

fn default_inventory_url() -> String {
    "http://localhost:8052".to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_body_size() -> ByteSize {
    ByteSize(10 * 1024 * 1024) // 10 MB
}

/// Outbound proxy settings applied to the inventory client
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProxySettings {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

/// Job runner tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Jobs of one task fetched concurrently
    #[serde(default = "default_max_parallel_jobs")]
    pub max_parallel_jobs: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: default_max_parallel_jobs(),
        }
    }
}

fn default_max_parallel_jobs() -> usize {
    4
}

/// Storage provider type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Local,
    Memory,
}

/// Page storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Local,
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/pages")
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggerConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// JSON logs go to `<logfile><pid>.log` when set; stdout otherwise
    #[serde(default)]
    pub logfile: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            logfile: None,
        }
    }
}

impl LoggerConfig {
    pub fn log_path(&self, pid: u32) -> Option<PathBuf> {
        self.logfile
            .as_deref()
            .filter(|prefix| !prefix.is_empty())
            .map(|prefix| PathBuf::from(format!("{}{}.log", prefix, pid)))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
