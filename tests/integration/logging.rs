//! Integration tests for logging and tracing

use async_trait::async_trait;
use bytes::Bytes;
use ingest_pipeline::shutdown::ShutdownCoordinator;
use ingest_pipeline::transport::web_worker::process_unit;
use ingest_pipeline::transport::{
    flatten, HttpClient, HttpResponse, RateLimiter, RequestTemplate, SharedHttpClient,
    TransportConfig, TransportError, WorkOutcome,
};
use ingest_pipeline::LogFields;
use reqwest::{Method, StatusCode, Url};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// In-memory log sink
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct StatusClient(StatusCode);

#[async_trait]
impl HttpClient for StatusClient {
    async fn fetch(&self, _: &Method, url: &Url) -> Result<HttpResponse, TransportError> {
        if self.0.is_success() {
            Ok(HttpResponse {
                status: self.0,
                content_type: Some("application/json".to_string()),
                body: Bytes::from_static(br#"[{"id":1}]"#),
            })
        } else {
            Err(TransportError::Http {
                url: url.to_string(),
                message: format!("HTTP {}", self.0),
            })
        }
    }
}

async fn process_one(status: StatusCode) -> WorkOutcome {
    let client: SharedHttpClient = Arc::new(StatusClient(status));
    let config = TransportConfig::new(Url::parse("https://api.example.com").unwrap()).with_request(
        RequestTemplate::new("/rows", "rows", RateLimiter::shared(10, Duration::from_secs(1))),
    );
    let units = flatten(&config, &client).unwrap();
    process_unit(7, &units[0], 0, &ShutdownCoordinator::new()).await
}

#[tokio::test]
async fn test_fetch_logs_compact_fields() {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_ansi(false)
        .with_writer({
            let capture = capture.clone();
            move || capture.clone()
        })
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let outcome = process_one(StatusCode::OK).await;
    assert!(matches!(outcome, WorkOutcome::Written(_)));

    let logs = capture.contents();
    assert!(logs.contains("{w:7"), "logs: {logs}");
    assert!(logs.contains("m:fetched 10 bytes}"), "logs: {logs}");
    assert!(logs.contains("table=rows"), "logs: {logs}");
    assert!(logs.contains("url=https://api.example.com/rows"), "logs: {logs}");
}

#[tokio::test]
async fn test_failed_fetch_logs_warning_with_error() {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_ansi(false)
        .with_writer({
            let capture = capture.clone();
            move || capture.clone()
        })
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let outcome = process_one(StatusCode::NOT_FOUND).await;
    assert!(matches!(outcome, WorkOutcome::Failed(TransportError::Http { .. })));

    let logs = capture.contents();
    assert!(logs.contains("WARN"), "logs: {logs}");
    assert!(logs.contains("HTTP 404 Not Found"), "logs: {logs}");
}

#[tokio::test]
async fn test_json_format_carries_message_and_fields() {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(Level::INFO)
        .with_writer({
            let capture = capture.clone();
            move || capture.clone()
        })
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    process_one(StatusCode::OK).await;

    let logs = capture.contents();
    let line = logs
        .lines()
        .find(|line| line.contains("fetched"))
        .expect("fetch log line");
    let event: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(event["level"], "INFO");
    assert_eq!(event["fields"]["table"], "rows");
    assert!(event["fields"]["message"].as_str().unwrap().starts_with("{w:7"));
}

#[test]
fn test_log_fields_render_as_message() {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer({
            let capture = capture.clone();
            move || capture.clone()
        })
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        tracing::info!(
            table = "candles",
            "{}",
            LogFields::worker(2).with_counts(3, 4).with_msg("stored")
        );
    });

    assert!(capture.contents().contains("{w:2, c:3, u:4, m:stored}"));
}

#[test]
fn test_env_filter_directives() {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn,ingest_pipeline=debug"))
        .with_ansi(false)
        .with_writer({
            let capture = capture.clone();
            move || capture.clone()
        })
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        tracing::info!(target: "ingest_pipeline::transport", "kept");
        tracing::info!(target: "hyper::client", "dropped");
        tracing::warn!(target: "hyper::client", "kept too");
    });

    let logs = capture.contents();
    assert!(logs.contains("kept"));
    assert!(logs.contains("kept too"));
    assert!(!logs.contains("dropped"));
}

#[tokio::test]
async fn test_run_span_wraps_worker_logs() {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_ansi(false)
        .with_writer({
            let capture = capture.clone();
            move || capture.clone()
        })
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let client: SharedHttpClient = Arc::new(StatusClient(StatusCode::OK));
    let config = TransportConfig::new(Url::parse("https://api.example.com").unwrap()).with_request(
        RequestTemplate::new("/rows", "rows", RateLimiter::shared(10, Duration::from_secs(1))),
    );
    let report = ingest_pipeline::transport::Transport::new(client)
        .run(
            &config,
            Arc::new(ingest_pipeline::storage::MemoryRepository::new()),
        )
        .await
        .unwrap();
    assert_eq!(report.upserted, 1);

    let logs = capture.contents();
    assert!(logs.contains("transport_run"), "logs: {logs}");
    assert!(logs.contains("Starting transport run"), "logs: {logs}");
}
