//! HTTP client seam used by the web workers
//!
//! Workers talk to upstream APIs through the [`HttpClient`] trait so the
//! pipeline can be driven by [`ReqwestClient`] in production and by stub
//! clients in tests. One `fetch` is one upstream call: retries belong to the
//! worker, which takes a rate limiter slot before every attempt.
//!
//! The reqwest implementation provides:
//! - Connect and request timeouts
//! - Per-call request metrics
//! - [`TransportError::Unavailable`] for network errors, 429 and 5xx, so the
//!   caller knows the call is worth retrying

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::defaults::{HTTP_CONNECT_TIMEOUT_SECS, HTTP_REQUEST_TIMEOUT_SECS};
use super::TransportError;
use crate::metrics::HttpRequestMetrics;

/// Successful upstream response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Response status
    pub status: StatusCode,
    /// Declared `Content-Type`, if any
    pub content_type: Option<String>,
    /// Raw body
    pub body: Bytes,
}

/// Performs one upstream call
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute `method url` once and return the response body.
    ///
    /// Failures worth retrying are returned as
    /// [`TransportError::Unavailable`], other non-success statuses as
    /// [`TransportError::Http`].
    async fn fetch(&self, method: &Method, url: &Url) -> Result<HttpResponse, TransportError>;
}

/// Client handle shared read-only by every worker
pub type SharedHttpClient = Arc<dyn HttpClient>;

/// reqwest-backed [`HttpClient`]
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Build a client with the default timeouts
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                TransportError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self::with_client(client))
    }

    /// Wrap an existing reqwest client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Convert into a shared trait object
    pub fn shared(self) -> SharedHttpClient {
        Arc::new(self)
    }
}

fn http_error(url: &Url, message: impl Into<String>) -> TransportError {
    TransportError::Http {
        url: url.to_string(),
        message: message.into(),
    }
}

fn unavailable(url: &Url, message: impl Into<String>) -> TransportError {
    TransportError::Unavailable {
        url: url.to_string(),
        message: message.into(),
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn fetch(&self, method: &Method, url: &Url) -> Result<HttpResponse, TransportError> {
        let metrics = HttpRequestMetrics::start(url.path());

        let response = match self.client.request(method.clone(), url.clone()).send().await {
            Ok(resp) => resp,
            Err(e) => {
                metrics.record_network_error();
                warn!(url = %url, "Network error: {}", e);
                return Err(unavailable(url, e.to_string()));
            }
        };

        let status = response.status();
        metrics.record_complete(status.as_u16());

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(unavailable(url, format!("status {status}")));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(http_error(url, format!("status {status}: {error_text}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| unavailable(url, format!("failed to read body: {e}")))?;

        debug!(url = %url, bytes = body.len(), "Request succeeded");
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}
