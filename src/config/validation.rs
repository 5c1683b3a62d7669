use super::models::Config;
use reqwest::Url;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Inventory URL '{url}' is invalid: {reason}")]
    InvalidInventoryUrl { url: String, reason: String },

    #[error("Proxy {field} '{url}' is not a valid URL")]
    InvalidProxyUrl { field: String, url: String },

    #[error("runner.max_parallel_jobs must be at least 1")]
    NoParallelism,

    #[error("Timeout must be positive: {field} = {value}")]
    InvalidTimeout { field: String, value: u64 },

    #[error("inventory.max_body_size must be positive")]
    InvalidBodyLimit,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_inventory(config)?;
    validate_proxies(config)?;
    validate_runner(config)?;
    Ok(())
}

fn validate_inventory(config: &Config) -> Result<(), ValidationError> {
    let inventory = &config.inventory;

    let url = Url::parse(&inventory.url).map_err(|e| ValidationError::InvalidInventoryUrl {
        url: inventory.url.clone(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidInventoryUrl {
            url: inventory.url.clone(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    for (field, value) in [
        ("connect_timeout_secs", inventory.connect_timeout_secs),
        ("request_timeout_secs", inventory.request_timeout_secs),
    ] {
        if value == 0 {
            return Err(ValidationError::InvalidTimeout {
                field: field.to_string(),
                value,
            });
        }
    }

    if inventory.max_body_size.as_u64() == 0 {
        return Err(ValidationError::InvalidBodyLimit);
    }

    Ok(())
}

fn validate_proxies(config: &Config) -> Result<(), ValidationError> {
    let proxies = [
        ("http_proxy", &config.proxies.http_proxy),
        ("https_proxy", &config.proxies.https_proxy),
    ];
    for (field, value) in proxies {
        if let Some(url) = value {
            if Url::parse(url).is_err() {
                return Err(ValidationError::InvalidProxyUrl {
                    field: field.to_string(),
                    url: url.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_runner(config: &Config) -> Result<(), ValidationError> {
    if config.runner.max_parallel_jobs == 0 {
        return Err(ValidationError::NoParallelism);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::ByteSize;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_inventory_url() {
        let mut config = Config::default();
        config.inventory.url = "tower.example.com".to_string();

        let result = validate(&config);
        assert!(matches!(
            result,
            Err(ValidationError::InvalidInventoryUrl { .. })
        ));
    }

    #[test]
    fn test_unsupported_scheme() {
        let mut config = Config::default();
        config.inventory.url = "ftp://tower.example.com".to_string();

        let result = validate(&config);
        assert!(matches!(
            result,
            Err(ValidationError::InvalidInventoryUrl { ref reason, .. }) if reason.contains("ftp")
        ));
    }

    #[test]
    fn test_invalid_proxy() {
        let mut config = Config::default();
        config.proxies.https_proxy = Some("::nope".to_string());

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::InvalidProxyUrl { .. })));
    }

    #[test]
    fn test_zero_parallelism() {
        let mut config = Config::default();
        config.runner.max_parallel_jobs = 0;

        assert!(matches!(validate(&config), Err(ValidationError::NoParallelism)));
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = Config::default();
        config.inventory.request_timeout_secs = 0;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidTimeout { .. })
        ));
    }

    #[test]
    fn test_zero_body_limit() {
        let mut config = Config::default();
        config.inventory.max_body_size = ByteSize(0);

        assert!(matches!(validate(&config), Err(ValidationError::InvalidBodyLimit)));
    }
}
