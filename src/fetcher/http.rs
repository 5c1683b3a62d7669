//! REST client for the inventory API

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, NoProxy, Proxy, StatusCode, Url};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{FetchError, FetchedPage, PageRequest, ResourceFetcher, Result};
use crate::config::{InventoryConfig, ProxySettings};
use crate::task::RelatedResource;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub max_body_bytes: u64,
    pub verify_ssl: bool,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            max_body_bytes: 10 * 1024 * 1024,
            verify_ssl: true,
            user_agent: concat!("catalog-worker/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl From<&InventoryConfig> for HttpConfig {
    fn from(config: &InventoryConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_body_bytes: config.max_body_size.as_u64(),
            verify_ssl: config.verify_ssl,
            ..Self::default()
        }
    }
}

/// Inventory API client
pub struct InventoryClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
    config: HttpConfig,
}

impl InventoryClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        config: HttpConfig,
        proxies: &ProxySettings,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| FetchError::transport(format!("Invalid base URL '{}': {}", base_url, e)))?;

        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .redirect(reqwest::redirect::Policy::limited(10));

        let no_proxy = proxies.no_proxy.as_deref().and_then(NoProxy::from_string);
        if let Some(url) = &proxies.http_proxy {
            let proxy = Proxy::http(url)
                .map_err(|e| FetchError::transport(format!("Invalid HTTP proxy: {}", e)))?
                .no_proxy(no_proxy.clone());
            builder = builder.proxy(proxy);
        }
        if let Some(url) = &proxies.https_proxy {
            let proxy = Proxy::https(url)
                .map_err(|e| FetchError::transport(format!("Invalid HTTPS proxy: {}", e)))?
                .no_proxy(no_proxy);
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token,
            config,
        })
    }

    pub fn from_config(config: &InventoryConfig, proxies: &ProxySettings) -> Result<Self> {
        Self::new(
            &config.url,
            config.token.clone(),
            HttpConfig::from(config),
            proxies,
        )
    }

    /// Send a request, retrying transport failures and retryable statuses with
    /// exponential backoff.
    async fn send_json(&self, method: Method, url: Url) -> Result<Value> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.send_once(method.clone(), url.clone()).await {
                Ok(body) => {
                    if attempts > 1 {
                        debug!(%url, attempts, "Request succeeded after retry");
                    }
                    return Ok(body);
                }
                Err(e) if is_retryable(&e) && attempts < self.config.max_retries => {
                    warn!(%url, attempts, error = %e, "Request failed, retrying");
                    tokio::time::sleep(backoff_delay(self.config.retry_backoff, attempts)).await;
                }
                Err(e) => {
                    warn!(%url, attempts, error = %e, "Request failed");
                    return Err(e);
                }
            }
        }
    }

    async fn send_once(&self, method: Method, url: Url) -> Result<Value> {
        debug!(%method, %url, "Sending request");

        let mut request = self
            .client
            .request(method, url.clone())
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::transport("Request timed out")
            } else {
                FetchError::transport(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                Some(status.as_u16()),
                status.canonical_reason().unwrap_or("Unknown"),
            ));
        }

        if let Some(length) = response.content_length() {
            self.check_body_size(length)?;
        }

        let bytes: Bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::transport(format!("Failed to read body: {}", e)))?;
        self.check_body_size(bytes.len() as u64)?;

        debug!(%url, size = bytes.len(), "Response received");

        serde_json::from_slice(&bytes).map_err(|e| {
            FetchError::new(Some(status.as_u16()), format!("Invalid JSON body: {}", e))
        })
    }

    fn check_body_size(&self, size: u64) -> Result<()> {
        if size > self.config.max_body_bytes {
            return Err(FetchError::transport(format!(
                "Response body of {} bytes exceeds limit of {} bytes",
                size, self.config.max_body_bytes
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceFetcher for InventoryClient {
    async fn fetch_page(&self, request: PageRequest) -> Result<FetchedPage> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| FetchError::transport(format!("Invalid method '{}'", request.method)))?;

        let url = match &request.continuation {
            // The continuation link already carries the query string.
            Some(next) => join(&self.base_url, next)?,
            None => page_url(&self.base_url, &request.path, &request.params)?,
        };

        let body = self.send_json(method, url).await?;
        let next = next_link(&body);
        Ok(FetchedPage { body, next })
    }

    async fn fetch_related(&self, descriptor: &RelatedResource, item: &Value) -> Result<Value> {
        let path = descriptor.resolve_path(item).ok_or_else(|| {
            FetchError::transport(format!("No link to related '{}'", descriptor.key))
        })?;
        let url = join(&self.base_url, &path)?;
        self.send_json(Method::GET, url).await
    }
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| FetchError::transport(format!("Invalid path '{}': {}", path, e)))
}

/// Build the first-page URL; list parameters repeat their key.
pub(crate) fn page_url(base: &Url, path: &str, params: &Map<String, Value>) -> Result<Url> {
    let mut url = join(base, path)?;
    if !params.is_empty() {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            match value {
                Value::Array(items) => {
                    for item in items {
                        if let Some(text) = query_value(item) {
                            query.append_pair(key, &text);
                        }
                    }
                }
                other => {
                    if let Some(text) = query_value(other) {
                        query.append_pair(key, &text);
                    }
                }
            }
        }
    }
    Ok(url)
}

fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// `next` link of a paginated listing body; absent, null or empty means last page.
pub(crate) fn next_link(body: &Value) -> Option<String> {
    body.get("next")
        .and_then(Value::as_str)
        .filter(|next| !next.is_empty())
        .map(str::to_string)
}

/// Exponential backoff before retry `attempt` (1-based), capped at [`MAX_BACKOFF`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_BACKOFF)
}

fn is_retryable(error: &FetchError) -> bool {
    match error.status {
        None => true,
        Some(status) => {
            status == StatusCode::TOO_MANY_REQUESTS.as_u16() || (500..600).contains(&status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 3);
        assert!(config.verify_ssl);
        assert!(config.user_agent.starts_with("catalog-worker/"));
    }

    #[test]
    fn test_page_url_encodes_params() {
        let base = Url::parse("https://tower.example.com").unwrap();
        let params = json!({"page_size": 50, "name": "web servers", "id__in": [1, 2], "skip": null});
        let url = page_url(&base, "/api/v2/hosts/", params.as_object().unwrap()).unwrap();
        assert_eq!(
            url.as_str(),
            "https://tower.example.com/api/v2/hosts/?page_size=50&name=web+servers&id__in=1&id__in=2"
        );
    }

    #[test]
    fn test_next_link() {
        assert_eq!(
            next_link(&json!({"next": "/api/v2/hosts/?page=2"})).as_deref(),
            Some("/api/v2/hosts/?page=2")
        );
        assert_eq!(next_link(&json!({"next": null})), None);
        assert_eq!(next_link(&json!({"next": ""})), None);
        assert_eq!(next_link(&json!([1, 2])), None);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(&FetchError::transport("reset")));
        assert!(is_retryable(&FetchError::new(Some(503), "Service Unavailable")));
        assert!(is_retryable(&FetchError::new(Some(429), "Too Many Requests")));
        assert!(!is_retryable(&FetchError::new(Some(404), "Not Found")));
        assert!(!is_retryable(&FetchError::new(Some(401), "Unauthorized")));
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 4), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 33), MAX_BACKOFF);
        assert_eq!(backoff_delay(base, 40), MAX_BACKOFF);
        assert_eq!(backoff_delay(Duration::MAX, u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn test_invalid_base_url() {
        let result = InventoryClient::new(
            "not a url",
            None,
            HttpConfig::default(),
            &ProxySettings::default(),
        );
        assert!(result.is_err());
    }
}
