//! Integration tests for per-template rate limiting

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use ingest_pipeline::storage::MemoryRepository;
use ingest_pipeline::transport::{
    flatten, HttpClient, HttpResponse, RateLimiter, ReqwestClient, RequestTemplate,
    SharedHttpClient, TimeseriesSpec, Transport, TransportConfig, TransportError,
};
use reqwest::{Method, StatusCode, Url};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;

/// Answers instantly and records when each call started
#[derive(Default)]
struct RecordingClient {
    calls: Mutex<Vec<(String, Instant)>>,
}

#[async_trait]
impl HttpClient for RecordingClient {
    async fn fetch(&self, _: &Method, url: &Url) -> Result<HttpResponse, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.path().to_string(), Instant::now()));
        Ok(HttpResponse {
            status: StatusCode::OK,
            content_type: Some("application/json".to_string()),
            body: Bytes::from(format!(r#"{{"url":"{url}"}}"#)),
        })
    }
}

fn windowed(endpoint: &str, limiter: Arc<RateLimiter>, hours: i64) -> RequestTemplate {
    let start = DateTime::parse_from_rfc3339("2022-05-10T00:00:00Z").unwrap();
    let end = start + chrono::Duration::hours(hours);
    RequestTemplate::new(endpoint, endpoint.trim_start_matches('/'), limiter)
        .with_query("start", start.to_rfc3339())
        .with_query("end", end.to_rfc3339())
        .with_timeseries(TimeseriesSpec::new("start", "end", chrono::Duration::hours(1)))
}

fn base_url() -> Url {
    Url::parse("https://api.example.com").unwrap()
}

#[test]
fn test_windows_of_one_template_share_a_limiter() {
    let limiter = RateLimiter::shared(2, Duration::from_secs(1));
    let config = TransportConfig::new(base_url()).with_request(windowed("/candles", limiter.clone(), 4));

    let client: SharedHttpClient = Arc::new(RecordingClient::default());
    let units = flatten(&config, &client).unwrap();

    assert_eq!(units.len(), 4);
    assert!(units
        .iter()
        .all(|unit| Arc::ptr_eq(&unit.descriptor.rate_limiter, &limiter)));
}

#[tokio::test(start_paused = true)]
async fn test_shared_quota_spaces_window_requests() {
    let client = Arc::new(RecordingClient::default());
    let config = TransportConfig::new(base_url())
        .with_request(windowed("/candles", RateLimiter::shared(2, Duration::from_secs(1)), 5));

    let started = Instant::now();
    let report = Transport::new(client.clone())
        .with_workers(5)
        .run(&config, Arc::new(MemoryRepository::new()))
        .await
        .unwrap();

    assert_eq!(report.written, 5);
    assert!(started.elapsed() >= Duration::from_secs(2));

    // Two calls per one-second period, regardless of the five workers
    let calls = client.calls.lock().unwrap();
    let offsets: Vec<u64> = calls
        .iter()
        .map(|(_, at)| at.duration_since(started).as_secs())
        .collect();
    assert_eq!(offsets.iter().filter(|&&s| s == 0).count(), 2);
    assert_eq!(offsets.iter().filter(|&&s| s == 1).count(), 2);
    assert_eq!(offsets.iter().filter(|&&s| s == 2).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_separate_templates_do_not_share_quota() {
    let client = Arc::new(RecordingClient::default());
    let config = TransportConfig::new(base_url())
        .with_request(windowed("/candles", RateLimiter::shared(1, Duration::from_secs(10)), 1))
        .with_request(windowed("/trades", RateLimiter::shared(1, Duration::from_secs(10)), 1));

    let started = Instant::now();
    let report = Transport::new(client.clone())
        .with_workers(2)
        .run(&config, Arc::new(MemoryRepository::new()))
        .await
        .unwrap();

    assert_eq!(report.written, 2);
    assert!(started.elapsed() < Duration::from_secs(1));

    let calls = client.calls.lock().unwrap();
    let mut paths: Vec<&str> = calls.iter().map(|(path, _)| path.as_str()).collect();
    paths.sort();
    assert_eq!(paths, ["/candles", "/trades"]);
}

#[tokio::test(start_paused = true)]
async fn test_templates_bound_to_one_limiter_share_quota() {
    let client = Arc::new(RecordingClient::default());
    let limiter = RateLimiter::shared(1, Duration::from_secs(10));
    let config = TransportConfig::new(base_url())
        .with_request(windowed("/candles", limiter.clone(), 1))
        .with_request(windowed("/trades", limiter, 1));

    let started = Instant::now();
    Transport::new(client.clone())
        .with_workers(2)
        .run(&config, Arc::new(MemoryRepository::new()))
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_limiter_releases_slots_after_period() {
    let limiter = RateLimiter::new(3, Duration::from_secs(1));

    for _ in 0..3 {
        limiter.acquire().await.unwrap();
    }
    assert_eq!(limiter.available_permits(), 0);

    tokio::time::sleep(Duration::from_millis(1001)).await;
    assert_eq!(limiter.available_permits(), 3);
}

/// Fails the first `failures` calls with `error`, then answers instantly
struct FlakyClient {
    failures: usize,
    error: fn(&Url) -> TransportError,
    calls: Mutex<Vec<Instant>>,
}

impl FlakyClient {
    fn new(failures: usize, error: fn(&Url) -> TransportError) -> Self {
        Self {
            failures,
            error,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HttpClient for FlakyClient {
    async fn fetch(&self, _: &Method, url: &Url) -> Result<HttpResponse, TransportError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            calls.len()
        };
        if call <= self.failures {
            return Err((self.error)(url));
        }
        Ok(HttpResponse {
            status: StatusCode::OK,
            content_type: Some("application/json".to_string()),
            body: Bytes::from_static(br#"{"ok":true}"#),
        })
    }
}

fn unavailable(url: &Url) -> TransportError {
    TransportError::Unavailable {
        url: url.to_string(),
        message: "status 503 Service Unavailable".to_string(),
    }
}

fn not_found(url: &Url) -> TransportError {
    TransportError::Http {
        url: url.to_string(),
        message: "status 404 Not Found".to_string(),
    }
}

fn single(limiter: Arc<RateLimiter>) -> TransportConfig {
    TransportConfig::new(base_url()).with_request(RequestTemplate::new("/rows", "rows", limiter))
}

#[tokio::test(start_paused = true)]
async fn test_retries_wait_for_a_rate_limit_slot() {
    let client = Arc::new(FlakyClient::new(2, unavailable));
    let config = single(RateLimiter::shared(1, Duration::from_secs(60)));

    let started = Instant::now();
    let report = Transport::new(client.clone())
        .with_max_retries(3)
        .run(&config, Arc::new(MemoryRepository::new()))
        .await
        .unwrap();

    assert_eq!(report.written, 1);
    let calls = client.calls.lock().unwrap();
    let offsets: Vec<u64> = calls
        .iter()
        .map(|at| at.duration_since(started).as_secs())
        .collect();
    // One call per 60s slot, the backoff alone would be far shorter
    assert_eq!(offsets.len(), 3);
    assert_eq!(offsets[0], 0);
    assert!(offsets[1] >= 60, "offsets: {offsets:?}");
    assert!(offsets[2] >= 120, "offsets: {offsets:?}");
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_after_max_retries() {
    let client = Arc::new(FlakyClient::new(usize::MAX, unavailable));
    let config = single(RateLimiter::shared(10, Duration::from_secs(1)));

    let report = Transport::new(client.clone())
        .with_max_retries(2)
        .run(&config, Arc::new(MemoryRepository::new()))
        .await
        .unwrap();

    assert_eq!(client.calls.lock().unwrap().len(), 3);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0].error, TransportError::Unavailable { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_client_errors_are_not_retried() {
    let client = Arc::new(FlakyClient::new(usize::MAX, not_found));
    let config = single(RateLimiter::shared(10, Duration::from_secs(1)));

    let report = Transport::new(client.clone())
        .with_max_retries(3)
        .run(&config, Arc::new(MemoryRepository::new()))
        .await
        .unwrap();

    assert_eq!(client.calls.lock().unwrap().len(), 1);
    assert!(matches!(report.failures[0].error, TransportError::Http { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_retry_wait() {
    let client = Arc::new(FlakyClient::new(usize::MAX, unavailable));
    let config = single(RateLimiter::shared(1, Duration::from_secs(3600)));
    let transport = Transport::new(client.clone()).with_max_retries(3);

    let trigger = {
        let shutdown = transport.shutdown().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            shutdown.request_shutdown();
        })
    };
    let report = transport
        .run_report(transport.flatten(&config).unwrap(), Arc::new(MemoryRepository::new()))
        .await
        .unwrap();
    trigger.await.unwrap();

    assert!(report.cancelled);
    assert_eq!(client.calls.lock().unwrap().len(), 1);
}

/// Answers 503 to the first connection and 200 afterwards, counting calls
async fn serve_unavailable_once(calls: Arc<AtomicUsize>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = if call == 0 {
                "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            } else {
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n[]"
            };
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    addr
}

#[tokio::test]
async fn test_reqwest_retry_respects_quota() {
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = serve_unavailable_once(calls.clone()).await;
    let config = TransportConfig::new(Url::parse(&format!("http://{addr}")).unwrap()).with_request(
        RequestTemplate::new("/rows", "rows", RateLimiter::shared(1, Duration::from_secs(2))),
    );

    let started = std::time::Instant::now();
    let report = Transport::new(ReqwestClient::new().unwrap().shared())
        .with_max_retries(1)
        .run(&config, Arc::new(MemoryRepository::new()))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.written, 1);
    assert!(started.elapsed() >= Duration::from_secs(2));
}
