//! YAML run configuration
//!
//! ```yaml
//! url: https://api.exchange.coinbase.com
//! workers: 4
//! rate_limit: { burst: 5, period: 1 }
//! requests:
//!   - endpoint: /products/BTC-USD/candles
//!     table: candles
//!     query:
//!       granularity: 60
//!       start: 2022-05-10T00:00:00Z
//!       end: 2022-05-11T00:00:00Z
//!     timeseries: { start_name: start, end_name: end, period: 18000 }
//! ```
//!
//! Periods are whole seconds. Requests without their own `rate_limit` share
//! one limiter built from the top-level `rate_limit` (5 calls per second when
//! absent).

use reqwest::{Method, Url};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::transport::defaults::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_RATE_LIMIT_BURST, DEFAULT_RATE_LIMIT_PERIOD,
    DEFAULT_WEB_WORKERS,
};
use crate::transport::template::default_table_name;
use crate::transport::{RateLimiter, RequestTemplate, TimeseriesSpec, TransportConfig};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The YAML is malformed or has the wrong shape
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A value is out of range or inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level run configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Base URL every endpoint is joined onto
    pub url: String,
    /// Number of web workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the fetch-unit and write-job queues
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Limiter shared by requests without their own
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Requests, in execution order
    #[serde(default)]
    pub requests: Vec<RequestConfig>,
}

/// One request of the configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestConfig {
    /// Endpoint path joined onto the base URL
    pub endpoint: String,
    /// HTTP method, GET when absent
    #[serde(default)]
    pub method: Option<String>,
    /// Destination table, the last endpoint segment when absent
    #[serde(default)]
    pub table: Option<String>,
    /// Key under which non-JSON bodies are kept
    #[serde(default)]
    pub clob_column: Option<String>,
    /// Static query parameters; scalar values are stringified
    #[serde(default, deserialize_with = "deserialize_query")]
    pub query: BTreeMap<String, String>,
    /// Time-window expansion
    #[serde(default)]
    pub timeseries: Option<TimeseriesConfig>,
    /// Request-specific rate limit
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

/// Time-window expansion of a request
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeseriesConfig {
    /// Query parameter holding the range start
    pub start_name: String,
    /// Query parameter holding the range end
    pub end_name: String,
    /// Window length in seconds
    pub period: i64,
}

/// `burst` calls per `period` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Calls allowed per period
    pub burst: usize,
    /// Period in seconds
    pub period: u64,
}

impl RateLimitConfig {
    fn limiter(&self) -> Result<Arc<RateLimiter>, ConfigError> {
        if self.burst == 0 {
            return Err(ConfigError::Invalid("rate_limit.burst must be at least 1".to_string()));
        }
        if self.period == 0 {
            return Err(ConfigError::Invalid("rate_limit.period must be at least 1 second".to_string()));
        }
        Ok(RateLimiter::shared(self.burst, Duration::from_secs(self.period)))
    }
}

fn default_workers() -> usize {
    DEFAULT_WEB_WORKERS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn deserialize_query<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(D::Error::custom(format!(
                        "query parameter `{key}` must be a scalar, got {other:?}"
                    )))
                }
            };
            Ok((key, value))
        })
        .collect()
}

impl Config {
    /// Read and parse a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_yaml(&text)
    }

    /// Parse a YAML document
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Check every value without building anything long-lived
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.build().map(|_| ())
    }

    /// Build the transport configuration
    pub fn into_transport_config(self) -> Result<TransportConfig, ConfigError> {
        self.build()
    }

    fn build(&self) -> Result<TransportConfig, ConfigError> {
        let base_url = Url::parse(&self.url)
            .map_err(|e| ConfigError::Invalid(format!("url `{}`: {e}", self.url)))?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::Invalid(format!("url `{}` cannot carry a path", self.url)));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".to_string()));
        }
        if self.requests.is_empty() {
            return Err(ConfigError::Invalid("at least one request is required".to_string()));
        }

        let default_limiter = match &self.rate_limit {
            Some(rate_limit) => rate_limit.limiter()?,
            None => RateLimiter::shared(DEFAULT_RATE_LIMIT_BURST, DEFAULT_RATE_LIMIT_PERIOD),
        };

        let mut config = TransportConfig::new(base_url);
        for (index, request) in self.requests.iter().enumerate() {
            let template = request
                .to_template(&default_limiter)
                .map_err(|e| match e {
                    ConfigError::Invalid(msg) => {
                        ConfigError::Invalid(format!("requests[{index}]: {msg}"))
                    }
                    other => other,
                })?;
            config = config.with_request(template);
        }

        Ok(config)
    }
}

impl RequestConfig {
    fn to_template(&self, default_limiter: &Arc<RateLimiter>) -> Result<RequestTemplate, ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint must not be empty".to_string()));
        }

        let table = match &self.table {
            Some(table) if !table.trim().is_empty() => table.clone(),
            Some(_) => return Err(ConfigError::Invalid("table must not be empty".to_string())),
            None => default_table_name(&self.endpoint)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "cannot derive a table name from endpoint `{}`",
                        self.endpoint
                    ))
                })?
                .to_string(),
        };

        let limiter = match &self.rate_limit {
            Some(rate_limit) => rate_limit.limiter()?,
            None => Arc::clone(default_limiter),
        };

        let mut template = RequestTemplate::new(self.endpoint.clone(), table, limiter);

        if let Some(method) = &self.method {
            let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
                .map_err(|_| ConfigError::Invalid(format!("invalid HTTP method `{method}`")))?;
            template = template.with_method(method);
        }
        for (key, value) in &self.query {
            template = template.with_query(key.clone(), value.clone());
        }
        if let Some(column) = &self.clob_column {
            template = template.with_clob_column(column.clone());
        }
        if let Some(timeseries) = &self.timeseries {
            if timeseries.period <= 0 {
                return Err(ConfigError::Invalid(
                    "timeseries.period must be a positive number of seconds".to_string(),
                ));
            }
            template = template.with_timeseries(TimeseriesSpec::new(
                timeseries.start_name.clone(),
                timeseries.end_name.clone(),
                chrono::Duration::seconds(timeseries.period),
            ));
        }

        Ok(template)
    }
}
