use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "CATALOG_WORKER_CONFIG";
const CONFIG_FILE_NAME: &str = "catalog.toml";
const ENV_PREFIX: &str = "CATALOG_WORKER";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (explicit path, or the first candidate that exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .ok()
        .or_else(|| candidate_config_files().into_iter().find(|p| p.is_file()))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);
    Ok(config)
}

/// Config file locations searched in order
pub fn candidate_config_files() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(home) = env::var_os("HOME") {
        candidates.push(
            PathBuf::from(home)
                .join(".config/catalog-worker")
                .join(CONFIG_FILE_NAME),
        );
    }
    candidates.push(PathBuf::from("/etc/catalog-worker").join(CONFIG_FILE_NAME));
    candidates
}

/// Secrets are never stored in TOML files, only in environment
pub(super) fn load_secrets(config: &mut Config) {
    if let Ok(token) = env::var("CATALOG_WORKER_TOKEN") {
        config.inventory.token = Some(token);
    }

    if config.inventory.token.is_none() {
        if let Ok(token) = env::var("INVENTORY_TOKEN") {
            config.inventory.token = Some(token);
        }
    }
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // CATALOG_WORKER__INVENTORY__URL -> inventory.url
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.inventory.request_timeout_secs, 60);
        assert_eq!(config.runner.max_parallel_jobs, 4);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("catalog.toml");

        let toml_content = r#"
[inventory]
url = "https://tower.example.com"
verify_ssl = false
request_timeout_secs = 15

[proxies]
http_proxy = "http://myproxy:3128"
https_proxy = "http://myproxy:3128"
no_proxy = "localhost"

[runner]
max_parallel_jobs = 2

[logger]
level = "debug"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.inventory.url, "https://tower.example.com");
        assert!(!config.inventory.verify_ssl);
        assert_eq!(config.inventory.request_timeout_secs, 15);
        assert_eq!(config.proxies.http_proxy.as_deref(), Some("http://myproxy:3128"));
        assert_eq!(config.proxies.no_proxy.as_deref(), Some("localhost"));
        assert_eq!(config.runner.max_parallel_jobs, 2);
        assert_eq!(config.logger.level, "debug");
        assert!(config.inventory.token.is_none());
    }

    #[test]
    fn test_token_not_read_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("catalog.toml");
        fs::write(&config_path, "[inventory]\ntoken = \"leaked\"\n").unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert!(config.inventory.token.is_none());
    }

    #[test]
    fn test_candidate_order() {
        let candidates = candidate_config_files();
        assert_eq!(candidates.first(), Some(&PathBuf::from("catalog.toml")));
        assert_eq!(
            candidates.last(),
            Some(&PathBuf::from("/etc/catalog-worker/catalog.toml"))
        );
    }
}
