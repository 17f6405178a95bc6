//! # Ingest Pipeline Library
//!
//! Pulls records out of HTTP APIs and upserts them into a storage backend.
//! A run is described declaratively: a base URL plus a list of requests, each
//! optionally expanded over a time range cut into bounded windows.
//!
//! ## Features
//!
//! - **Time Windowing**: Long ranges are split into contiguous windows no
//!   longer than a configured period, one request per window
//! - **Rate Limiting**: One limiter per request template, shared by every
//!   window of that template
//! - **Bounded Concurrency**: A fixed pool of web workers and a bounded queue
//! - **Body Classification**: JSON bodies are stored as-is; HTML and text can
//!   be kept under a configured column or skipped
//! - **Idempotent Storage**: Replaying a run matches existing records
//! - **Graceful Shutdown**: Ctrl+C or a run timeout unblocks every worker
//!
//! ## Quick Start
//!
//! ```no_run
//! use ingest_pipeline::config::Config;
//! use ingest_pipeline::storage::JsonlRepository;
//! use ingest_pipeline::transport::{ReqwestClient, Transport};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("pipeline.yaml")?.into_transport_config()?;
//! let repository = Arc::new(JsonlRepository::new("data")?);
//!
//! let report = Transport::new(ReqwestClient::new()?.shared())
//!     .run(&config, repository)
//!     .await?;
//! println!("upserted {} records", report.upserted);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`] - YAML configuration and validation
//! - [`transport`] - Windowing, flattening, worker pools and orchestration
//! - [`storage`] - Repository implementations
//! - [`shutdown`] - Cancellation shared by every task of a run
//! - [`log_fields`] - Compact per-unit log rendering
//! - [`metrics`] - Prometheus metrics

#![warn(missing_docs)]
#![warn(clippy::all)]

/// CLI command implementations
pub mod cli;

/// YAML run configuration
pub mod config;

/// Compact per-unit log fields
pub mod log_fields;

/// Production observability metrics
pub mod metrics;

/// Graceful shutdown coordination
pub mod shutdown;

/// Storage backends
pub mod storage;

/// HTTP ingestion pipeline
pub mod transport;

pub use config::{Config, ConfigError};
pub use log_fields::LogFields;
pub use shutdown::{SharedShutdown, ShutdownCoordinator};
pub use transport::{
    flatten, window, FetchDescriptor, FetchUnit, RequestTemplate, RunReport, TimeseriesSpec,
    Transport, TransportConfig, TransportError, Window, WriteJob,
};
