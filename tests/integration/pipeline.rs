//! End-to-end runs against a local HTTP server

use ingest_pipeline::config::Config;
use ingest_pipeline::shutdown::ShutdownCoordinator;
use ingest_pipeline::storage::{JsonlRepository, MemoryRepository};
use ingest_pipeline::transport::{ReqwestClient, Transport, TransportError};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const HTML: &str = "<html><body><h1>BTC 30000</h1></body></html>";

/// Serve until the test ends:
/// - `/candles` echoes its query string as a one-record JSON array
/// - `/page` answers with HTML
/// - anything else is a 404
async fn serve() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let target = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));

                let (status, content_type, body) = match path {
                    "/candles" => ("200 OK", "application/json", format!(r#"[{{"window":"{query}"}}]"#)),
                    "/page" => ("200 OK", "text/html; charset=UTF-8", HTML.to_string()),
                    _ => ("404 Not Found", "text/plain", "not found".to_string()),
                };
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

fn config(addr: SocketAddr) -> Config {
    Config::from_yaml(&format!(
        r#"
url: http://{addr}
workers: 3
rate_limit: {{ burst: 100, period: 1 }}
requests:
  - endpoint: /candles
    query:
      granularity: 60
      start: "2022-05-10T00:00:00Z"
      end: "2022-05-11T00:00:00Z"
    timeseries: {{ start_name: start, end_name: end, period: 18000 }}
  - endpoint: /page
    table: pages
    clob_column: html
"#
    ))
    .unwrap()
}

#[tokio::test]
async fn test_full_run_into_jsonl_is_idempotent() {
    let addr = serve().await;
    let dir = TempDir::new().unwrap();
    let transport_config = config(addr).into_transport_config().unwrap();
    let transport = Transport::new(ReqwestClient::new().unwrap().shared())
        .with_workers(3)
        .with_repo_workers(2);

    let first = transport
        .run(&transport_config, Arc::new(JsonlRepository::new(dir.path()).unwrap()))
        .await
        .unwrap();

    assert!(first.is_success(), "unexpected failures: {:?}", first.failures);
    assert_eq!(first.units, 6);
    assert_eq!(first.written, 6);
    assert_eq!(first.upserted, 6);
    assert_eq!(first.matched, 0);

    let candles = std::fs::read_to_string(dir.path().join("candles.jsonl")).unwrap();
    let windows: Vec<Value> = candles
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(windows.len(), 5);
    assert!(windows.iter().all(|w| w["window"].as_str().unwrap().contains("granularity=60")));

    let pages = std::fs::read_to_string(dir.path().join("pages.jsonl")).unwrap();
    let page: Value = serde_json::from_str(pages.trim()).unwrap();
    assert_eq!(page["html"], HTML);

    // Same windows again: everything matches, nothing is appended
    let second = transport
        .run(&transport_config, Arc::new(JsonlRepository::new(dir.path()).unwrap()))
        .await
        .unwrap();
    assert_eq!(second.upserted, 0);
    assert_eq!(second.matched, 6);
}

#[tokio::test]
async fn test_missing_endpoint_is_reported_per_unit() {
    let addr = serve().await;
    let transport_config = Config::from_yaml(&format!(
        "url: http://{addr}\nrequests:\n  - endpoint: /missing\n  - endpoint: /page\n    clob_column: html\n"
    ))
    .unwrap()
    .into_transport_config()
    .unwrap();

    let repository = Arc::new(MemoryRepository::new());
    let report = Transport::new(ReqwestClient::new().unwrap().shared())
        .run(&transport_config, repository.clone())
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].table, "missing");
    assert!(matches!(report.failures[0].error, TransportError::Http { .. }));
    assert_eq!(repository.records("page").await.len(), 1);
}

#[tokio::test]
async fn test_opaque_body_without_clob_column_writes_nothing() {
    let addr = serve().await;
    let transport_config = Config::from_yaml(&format!("url: http://{addr}\nrequests:\n  - endpoint: /page\n"))
        .unwrap()
        .into_transport_config()
        .unwrap();

    let repository = Arc::new(MemoryRepository::new());
    let report = Transport::new(ReqwestClient::new().unwrap().shared())
        .run(&transport_config, repository.clone())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.skipped, 1);
    assert_eq!(report.written, 0);
    assert!(repository.tables().await.is_empty());
}

#[tokio::test]
async fn test_run_after_shutdown_is_cancelled() {
    let addr = serve().await;
    let transport_config = config(addr).into_transport_config().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let result = Transport::new(ReqwestClient::new().unwrap().shared())
        .with_shutdown(shutdown)
        .run(&transport_config, Arc::new(MemoryRepository::new()))
        .await;

    assert!(matches!(result, Err(TransportError::Cancelled)));
}
