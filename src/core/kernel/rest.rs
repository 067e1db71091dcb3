use crate::core::clock::{Clock, SystemClock};
use crate::core::errors::ExchangeError;
use crate::core::kernel::signer::Signer;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, trace};

/// Raw HTTP response: status plus the undecoded body text
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: u16,
    pub body: String,
}

impl RestResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ExchangeError> {
        serde_json::from_str(&self.body).map_err(|e| {
            ExchangeError::DeserializationError(format!("Failed to parse JSON response: {}", e))
        })
    }
}

/// REST client trait for making HTTP requests
///
/// Implementations attach authentication and transport settings; interpreting
/// the body is left to the venue layer. Transport failures are returned as
/// errors and never retried here.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Make a request
    ///
    /// # Arguments
    /// * `method` - HTTP method
    /// * `endpoint` - The API endpoint path
    /// * `query_params` - Query parameters as key-value pairs
    /// * `body` - Request body as raw bytes, sent and signed as is
    /// * `authenticated` - Whether to sign the request
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
        body: &[u8],
        authenticated: bool,
    ) -> Result<RestResponse, ExchangeError>;

    /// Make a GET request
    async fn get(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<RestResponse, ExchangeError> {
        self.request(Method::GET, endpoint, query_params, &[], authenticated)
            .await
    }

    /// Make a POST request with a pre-serialized body
    async fn post(
        &self,
        endpoint: &str,
        body: &[u8],
        authenticated: bool,
    ) -> Result<RestResponse, ExchangeError> {
        self.request(Method::POST, endpoint, &[], body, authenticated)
            .await
    }
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    /// Whole-request timeout
    pub timeout: Duration,
    /// Optional upstream proxy URL
    pub proxy: Option<String>,
    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,
    /// How long an idle pooled connection is kept
    pub pool_idle_timeout: Duration,
    /// User agent string to include in requests
    pub user_agent: String,
    /// Headers attached to every request
    pub default_headers: Vec<(String, String)>,
}

impl RestClientConfig {
    /// Create a new configuration
    ///
    /// # Arguments
    /// * `base_url` - Base URL for the API
    /// * `exchange_name` - Name of the exchange
    pub fn new(base_url: String, exchange_name: String) -> Self {
        Self {
            base_url,
            exchange_name,
            timeout: Duration::from_secs(1),
            proxy: None,
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(3),
            user_agent: "okx-session/0.1".to_string(),
            default_headers: Vec::new(),
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Route requests through a proxy
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy.filter(|p| !p.is_empty());
        self
    }

    /// Bound the connection pool
    pub fn with_pool(mut self, max_idle_per_host: usize, idle_timeout: Duration) -> Self {
        self.pool_max_idle_per_host = max_idle_per_host;
        self.pool_idle_timeout = idle_timeout;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Add a header sent with every request
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.default_headers
            .push((name.to_string(), value.to_string()));
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
    clock: Arc<dyn Clock>,
}

impl RestClientBuilder {
    /// Create a new builder with the given configuration
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            signer: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Set the signer for authenticated requests
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Set the clock used for request timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the REST client
    pub fn build(self) -> Result<ReqwestRest, ExchangeError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ExchangeError::ConfigurationError(format!("Invalid header name '{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                ExchangeError::ConfigurationError(format!("Invalid header value: {}", e))
            })?;
            headers.insert(name, value);
        }

        let mut builder = Client::builder()
            .timeout(self.config.timeout)
            .user_agent(&self.config.user_agent)
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
            .pool_idle_timeout(self.config.pool_idle_timeout)
            .default_headers(headers);

        if let Some(proxy) = &self.config.proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| {
                ExchangeError::ConfigurationError(format!("Invalid proxy URL: {}", e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| {
            ExchangeError::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(ReqwestRest {
            client,
            config: self.config,
            signer: self.signer,
            clock: self.clock,
        })
    }
}

/// Implementation of `RestClient` using reqwest
#[derive(Clone)]
pub struct ReqwestRest {
    client: Client,
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ReqwestRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestRest")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

impl ReqwestRest {
    pub fn config(&self) -> &RestClientConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Build the full URL for an endpoint with its query string
    fn build_url(&self, endpoint: &str, query_params: &[(&str, &str)]) -> Result<Url, ExchangeError> {
        let raw = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut url = Url::parse(&raw)
            .map_err(|e| ExchangeError::ConfigurationError(format!("Invalid URL '{}': {}", raw, e)))?;

        if !query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query_params {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// Path plus `?query`, exactly as it appears on the wire
    fn request_path(url: &Url) -> String {
        match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        }
    }
}

#[async_trait]
impl RestClient for ReqwestRest {
    #[instrument(skip(self, query_params, body), fields(exchange = %self.config.exchange_name, method = %method, endpoint = %endpoint))]
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
        body: &[u8],
        authenticated: bool,
    ) -> Result<RestResponse, ExchangeError> {
        let url = self.build_url(endpoint, query_params)?;
        let request_path = Self::request_path(&url);
        let mut request = self.client.request(method.clone(), url);

        if authenticated {
            let signer = self.signer.as_ref().ok_or_else(|| {
                ExchangeError::AuthError(
                    "Authentication required but no signer provided".to_string(),
                )
            })?;
            let headers =
                signer.sign_request(method.as_str(), &request_path, body, self.clock.now_ms())?;
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        if !body.is_empty() || method == Method::POST {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            ExchangeError::NetworkError(format!("Failed to read response body: {}", e))
        })?;

        trace!(status, "Response body: {}", body);

        Ok(RestResponse { status, body })
    }
}
