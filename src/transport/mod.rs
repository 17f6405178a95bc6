//! Windowed, rate-limited HTTP ingestion pipeline
//!
//! This module turns a declarative [`TransportConfig`] into storage writes.
//!
//! # Overview
//!
//! 1. **Flattening**: [`flatten::flatten`] expands request templates into
//!    [`FetchUnit`]s, cutting timeseries ranges into windows via
//!    [`timeseries::window`]
//! 2. **Fetching**: [`WebWorkerPool`] runs a fixed number of workers that take
//!    units from a bounded queue, wait on the template's [`RateLimiter`],
//!    call the API and classify the body into a [`WriteJob`]
//! 3. **Writing**: [`RepoWorkerPool`] drains write jobs into a [`Repository`]
//! 4. **Orchestration**: [`Transport`] wires the stages together, closes each
//!    queue once its producers finish, and reports a [`RunReport`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ingest_pipeline::storage::MemoryRepository;
//! use ingest_pipeline::transport::{
//!     RateLimiter, ReqwestClient, RequestTemplate, Transport, TransportConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = RateLimiter::shared(5, Duration::from_secs(1));
//! let config = TransportConfig::new("https://pokeapi.co/api/v2/".parse()?)
//!     .with_request(RequestTemplate::new("pokemon/ditto", "pokemon", limiter));
//!
//! let repository = Arc::new(MemoryRepository::new());
//! let report = Transport::new(ReqwestClient::new()?.shared())
//!     .with_workers(4)
//!     .run(&config, repository.clone())
//!     .await?;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Configuration problems fail before any request is sent. HTTP and decode
//! failures are per-unit: they are logged, counted, and reported in
//! [`RunReport::failures`] without stopping other units.

pub mod body;
pub mod defaults;
pub mod fetch_config;
pub mod flatten;
pub mod http;
pub mod rate_limit;
pub mod repo_worker;
pub mod runner;
pub mod template;
pub mod timeseries;
pub mod web_worker;

use bytes::Bytes;

pub use body::ResponseBody;
pub use fetch_config::FetchDescriptor;
pub use flatten::{flatten, FetchUnit};
pub use http::{HttpClient, HttpResponse, ReqwestClient, SharedHttpClient};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use repo_worker::{
    RepoPoolReport, RepoWorkerPool, Repository, RepositoryError, SharedRepository, UpsertCounts,
    WriteFailure,
};
pub use runner::{PoolCompletion, RunReport, Transport, TransportHandle};
pub use template::{RequestTemplate, TransportConfig};
pub use timeseries::{window, TimeseriesSpec, TimestampStyle, Window};
pub use web_worker::{UnitFailure, WebPoolReport, WebWorkerPool};

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Invalid configuration, detected before any request is sent
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Non-success status that retrying will not fix
    #[error("HTTP error for {url}: {message}")]
    Http {
        /// Requested URL
        url: String,
        /// Failure description
        message: String,
    },

    /// Network failure, 429 or 5xx; the call may succeed when retried
    #[error("upstream unavailable for {url}: {message}")]
    Unavailable {
        /// Requested URL
        url: String,
        /// Failure description
        message: String,
    },

    /// Response body could not be turned into records
    #[error("decode error for {url}: {message}")]
    Decode {
        /// Requested URL
        url: String,
        /// Failure description
        message: String,
    },

    /// Shutdown was requested before the work finished
    #[error("cancelled")]
    Cancelled,

    /// Storage layer failure
    #[error("repository error: {0}")]
    Repository(String),

    /// A pipeline task panicked or was aborted
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl TransportError {
    /// Whether another attempt at the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<RateLimitError> for TransportError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Cancelled => Self::Cancelled,
            RateLimitError::AcquireError(msg) => Self::Configuration(msg),
        }
    }
}

impl From<RepositoryError> for TransportError {
    fn from(err: RepositoryError) -> Self {
        Self::Repository(err.to_string())
    }
}

/// Records for one table, produced from one fetch unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteJob {
    /// Destination table
    pub table: String,
    /// JSON object or array, or a single-key clob object
    pub payload: Bytes,
}

impl WriteJob {
    /// Create a write job
    pub fn new(table: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            table: table.into(),
            payload: payload.into(),
        }
    }
}

/// Result of processing one fetch unit
#[derive(Debug)]
pub enum WorkOutcome {
    /// A write job was produced
    Written(WriteJob),
    /// The body was opaque and no clob column is configured
    Skipped,
    /// The unit failed; other units are unaffected
    Failed(TransportError),
}
