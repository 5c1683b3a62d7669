//! Configuration management for the catalog worker
//!
//! Settings are layered from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use catalog_worker::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Inventory API: {}", config.inventory.url);
//! ```
//!
//! # Environment Variables
//!
//! Any key can be overridden with `CATALOG_WORKER__<section>__<key>`:
//! - `CATALOG_WORKER__INVENTORY__URL=https://tower.example.com`
//! - `CATALOG_WORKER__RUNNER__MAX_PARALLEL_JOBS=8`
//!
//! The API token is only read from `CATALOG_WORKER_TOKEN` (or `INVENTORY_TOKEN`).
//!
//! # Configuration File
//!
//! `CATALOG_WORKER_CONFIG` names the file explicitly. Otherwise the first existing of
//! `./catalog.toml`, `~/.config/catalog-worker/catalog.toml` and
//! `/etc/catalog-worker/catalog.toml` is used.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    Config, InventoryConfig, LoggerConfig, ProxySettings, RunnerConfig, StorageConfig,
    StorageProvider,
};
pub use sources::candidate_config_files;
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let mut config = sources::load_from_sources(path)?;
        sources::load_secrets(&mut config);
        validation::validate(&config)?;
        Ok(config)
    }
}
