//! Pipeline observability metrics
//!
//! Counters and histograms for fetch units, HTTP calls, rate limiter waits
//! and storage upserts.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Optional Prometheus exporter for a scraping endpoint (`--metrics-addr`)
//! - Without an installed recorder every macro is a no-op

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Metrics exporter errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The Prometheus exporter could not be installed
    #[error("failed to install Prometheus exporter: {0}")]
    Install(String),
}

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls are no-ops. Must run inside a tokio runtime.
///
/// # Arguments
/// * `addr` - Socket address to bind the scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    describe_counter!(
        "fetch_units_total",
        Unit::Count,
        "Fetch units processed, labelled by outcome"
    );
    describe_counter!(
        "fetch_units_skipped_total",
        Unit::Count,
        "Fetch units whose opaque body was dropped"
    );
    describe_counter!(
        "fetch_units_failed_total",
        Unit::Count,
        "Fetch units that failed, labelled by error kind"
    );
    describe_counter!(
        "write_jobs_total",
        Unit::Count,
        "Write jobs handed to the repository pool"
    );
    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "HTTP requests sent upstream, labelled by status"
    );
    describe_counter!("http_retries_total", Unit::Count, "HTTP retry attempts");
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_histogram!(
        "rate_limit_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for a rate limiter slot"
    );
    describe_counter!(
        "records_upserted_total",
        Unit::Count,
        "Records inserted by the repository"
    );
    describe_counter!(
        "records_matched_total",
        Unit::Count,
        "Records the repository already held"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Record an HTTP request with timing
pub struct HttpRequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
}

impl HttpRequestMetrics {
    /// Start recording a new HTTP request
    pub fn start(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            "Starting HTTP request"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
        }
    }

    /// Record completion of the HTTP request
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => status_code.to_string(),
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        if status_code == 429 {
            warn!(
                correlation_id = %self.correlation_id,
                endpoint = %self.endpoint,
                duration_ms = duration.as_millis(),
                "Upstream rate limit (429) hit"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }

    /// Record a network error (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => "network_error",
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }

    /// Get the correlation ID for this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!(
        "http_retries_total",
        "attempt" => attempt.to_string(),
    )
    .increment(1);

    histogram!(
        "retry_backoff_duration_seconds",
        "attempt" => attempt.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record time a worker spent waiting for a rate limiter slot
pub fn record_rate_limit_wait(table: &str, wait: Duration) {
    histogram!("rate_limit_wait_seconds", "table" => table.to_string())
        .record(wait.as_secs_f64());

    if wait > Duration::from_millis(100) {
        debug!(
            table = %table,
            wait_ms = wait.as_millis(),
            "Rate limit slot acquired after wait"
        );
    }
}

/// Per fetch unit outcome counters
pub struct FetchMetrics {
    table: String,
}

impl FetchMetrics {
    /// Start tracking one fetch unit
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    fn record_outcome(&self, outcome: &'static str) {
        counter!(
            "fetch_units_total",
            "table" => self.table.clone(),
            "outcome" => outcome,
        )
        .increment(1);
    }

    /// A write job was produced
    pub fn record_written(&self) {
        self.record_outcome("written");
        counter!("write_jobs_total", "table" => self.table.clone()).increment(1);
    }

    /// The body was opaque and dropped
    pub fn record_skipped(&self) {
        self.record_outcome("skipped");
        counter!("fetch_units_skipped_total", "table" => self.table.clone()).increment(1);
    }

    /// The unit failed with an error of `kind`
    pub fn record_failed(&self, kind: &'static str) {
        self.record_outcome("failed");
        counter!(
            "fetch_units_failed_total",
            "table" => self.table.clone(),
            "kind" => kind,
        )
        .increment(1);
    }
}

/// Record the storage counts of one upsert
pub fn record_upsert(table: &str, matched: u64, upserted: u64) {
    counter!("records_matched_total", "table" => table.to_string()).increment(matched);
    counter!("records_upserted_total", "table" => table.to_string()).increment(upserted);
}
