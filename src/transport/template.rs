//! Declarative request templates the pipeline flattens into fetch units

use reqwest::{Method, Url};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::rate_limit::RateLimiter;
use super::timeseries::TimeseriesSpec;

/// Base endpoint plus the ordered list of requests to run against it
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL every endpoint is joined onto
    pub base_url: Url,
    /// Request templates, in execution order
    pub requests: Vec<RequestTemplate>,
}

impl TransportConfig {
    /// Create a configuration with no requests
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            requests: Vec::new(),
        }
    }

    /// Append a request template
    pub fn with_request(mut self, request: RequestTemplate) -> Self {
        self.requests.push(request);
        self
    }
}

/// One logical fetch against the base URL
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    /// Endpoint path joined onto the base URL
    pub endpoint: String,
    /// HTTP method
    pub method: Method,
    /// Static query parameters
    pub query: BTreeMap<String, String>,
    /// Destination table or collection
    pub table: String,
    /// Key under which opaque bodies are stored, if they should be kept
    pub clob_column: Option<String>,
    /// Time-window expansion, if any
    pub timeseries: Option<TimeseriesSpec>,
    /// Limiter shared by every fetch unit derived from this template
    pub rate_limiter: Arc<RateLimiter>,
}

impl RequestTemplate {
    /// GET request with no query parameters
    pub fn new(endpoint: impl Into<String>, table: impl Into<String>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: Method::GET,
            query: BTreeMap::new(),
            table: table.into(),
            clob_column: None,
            timeseries: None,
            rate_limiter,
        }
    }

    /// Set the HTTP method
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a static query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Keep opaque bodies under `column`
    pub fn with_clob_column(mut self, column: impl Into<String>) -> Self {
        self.clob_column = Some(column.into());
        self
    }

    /// Expand this template over time windows
    pub fn with_timeseries(mut self, timeseries: TimeseriesSpec) -> Self {
        self.timeseries = Some(timeseries);
        self
    }
}

/// Default table name for an endpoint: its last non-empty path segment
pub fn default_table_name(endpoint: &str) -> Option<&str> {
    endpoint.rsplit('/').find(|segment| !segment.is_empty())
}
