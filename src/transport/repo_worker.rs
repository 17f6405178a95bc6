//! Storage seam and the pool that drains write jobs into it
//!
//! The pool does not observe shutdown: every write job already emitted by
//! the web workers still reaches the repository. It stops once the write
//! queue is closed and drained.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::WriteJob;
use crate::log_fields::LogFields;
use crate::metrics::record_upsert;

/// Records touched by one upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    /// Records already present
    pub matched: u64,
    /// Records inserted
    pub upserted: u64,
}

impl UpsertCounts {
    /// Create counts
    pub fn new(matched: u64, upserted: u64) -> Self {
        Self { matched, upserted }
    }
}

impl std::ops::AddAssign for UpsertCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.matched += rhs.matched;
        self.upserted += rhs.upserted;
    }
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload is not a JSON object or array
    #[error("invalid payload for table `{table}`: {message}")]
    InvalidPayload {
        /// Destination table
        table: String,
        /// Failure description
        message: String,
    },

    /// Table name cannot be used by this backend
    #[error("invalid table name: {0:?}")]
    InvalidTable(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage backend receiving write jobs
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert the job's records, matching those already stored.
    async fn upsert(&self, job: &WriteJob) -> Result<UpsertCounts, RepositoryError>;

    /// Flush and release resources once no more jobs will arrive
    async fn close(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

/// Repository handle shared by every repo worker
pub type SharedRepository = Arc<dyn Repository>;

/// Failed write job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    /// Destination table
    pub table: String,
    /// Cause
    pub message: String,
}

/// Totals reported by a repo worker pool once every worker exited
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoPoolReport {
    /// Write jobs taken from the queue
    pub jobs: usize,
    /// Summed storage counts
    pub counts: UpsertCounts,
    /// Jobs the repository rejected
    pub failures: Vec<WriteFailure>,
}

impl RepoPoolReport {
    /// Fold another worker's totals into this one
    pub fn merge(&mut self, other: RepoPoolReport) {
        self.jobs += other.jobs;
        self.counts += other.counts;
        self.failures.extend(other.failures);
    }
}

/// Pool of repository workers sharing one write queue
#[derive(Clone)]
pub struct RepoWorkerPool {
    workers: usize,
    repository: SharedRepository,
}

impl RepoWorkerPool {
    /// Create a pool of `workers` workers (at least one)
    pub fn new(workers: usize, repository: SharedRepository) -> Self {
        Self {
            workers: workers.max(1),
            repository,
        }
    }

    /// Start the workers; the handle resolves after the queue is drained and
    /// the repository closed.
    pub fn spawn(&self, input: mpsc::Receiver<WriteJob>) -> JoinHandle<RepoPoolReport> {
        let input = Arc::new(Mutex::new(input));
        let mut workers = JoinSet::new();

        for worker_id in 1..=self.workers {
            workers.spawn(run_worker(
                worker_id,
                Arc::clone(&input),
                Arc::clone(&self.repository),
            ));
        }

        let repository = Arc::clone(&self.repository);
        tokio::spawn(async move {
            let mut report = RepoPoolReport::default();
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(worker_report) => report.merge(worker_report),
                    Err(e) => error!(error = %e, "Repo worker task failed"),
                }
            }

            if let Err(e) = repository.close().await {
                error!(error = %e, "Failed to close repository");
                report.failures.push(WriteFailure {
                    table: String::new(),
                    message: e.to_string(),
                });
            }

            debug!(
                jobs = report.jobs,
                matched = report.counts.matched,
                upserted = report.counts.upserted,
                failed = report.failures.len(),
                "Repo worker pool finished"
            );
            report
        })
    }
}

async fn run_worker(
    worker_id: usize,
    input: Arc<Mutex<mpsc::Receiver<WriteJob>>>,
    repository: SharedRepository,
) -> RepoPoolReport {
    let mut report = RepoPoolReport::default();

    loop {
        let next = input.lock().await.recv().await;
        let Some(job) = next else {
            break;
        };
        report.jobs += 1;

        let started = Instant::now();
        match repository.upsert(&job).await {
            Ok(counts) => {
                record_upsert(&job.table, counts.matched, counts.upserted);
                info!(
                    table = %job.table,
                    "{}",
                    LogFields::worker(worker_id)
                        .with_duration(started.elapsed())
                        .with_counts(counts.matched, counts.upserted)
                );
                report.counts += counts;
            }
            Err(e) => {
                warn!(
                    table = %job.table,
                    "{}",
                    LogFields::worker(worker_id)
                        .with_duration(started.elapsed())
                        .with_msg(e.to_string())
                );
                report.failures.push(WriteFailure {
                    table: job.table.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    report
}
