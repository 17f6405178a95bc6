//! End-to-end orchestration of one ingestion run

use indicatif::ProgressBar;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, info_span, warn, Instrument};

use super::defaults::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_REPO_WORKERS, DEFAULT_WEB_WORKERS, MAX_RETRIES,
};
use super::flatten::{flatten, FetchUnit};
use super::http::SharedHttpClient;
use super::repo_worker::{RepoWorkerPool, SharedRepository, WriteFailure};
use super::template::TransportConfig;
use super::web_worker::{UnitFailure, WebPoolReport, WebWorkerPool};
use super::{TransportError, WriteJob};
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};

/// Outcome of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Fetch units produced by flattening
    pub units: usize,
    /// Write jobs produced
    pub written: usize,
    /// Opaque bodies dropped
    pub skipped: usize,
    /// Fetch units that failed
    pub failures: Vec<UnitFailure>,
    /// Write jobs the repository rejected
    pub write_failures: Vec<WriteFailure>,
    /// Records the repository already held
    pub matched: u64,
    /// Records inserted
    pub upserted: u64,
    /// Shutdown stopped the run before every unit was processed
    pub cancelled: bool,
}

impl RunReport {
    /// Whether every unit was processed and every write job succeeded
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failures.is_empty() && self.write_failures.is_empty()
    }
}

/// Resolves to the web pool report, or [`TransportError::Worker`] when the
/// producer or the pool supervisor panicked
pub type PoolCompletion = JoinHandle<Result<WebPoolReport, TransportError>>;

/// Write-job stream of a spawned pipeline
pub struct TransportHandle {
    /// Write jobs; closed once every web worker exited
    pub jobs: mpsc::Receiver<WriteJob>,
    completion: PoolCompletion,
}

impl TransportHandle {
    /// Split into the job stream and the pool's completion handle
    pub fn into_parts(self) -> (mpsc::Receiver<WriteJob>, PoolCompletion) {
        (self.jobs, self.completion)
    }

    /// Drain every job, then wait for the pool report
    pub async fn collect(mut self) -> Result<(Vec<WriteJob>, WebPoolReport), TransportError> {
        let mut jobs = Vec::new();
        while let Some(job) = self.jobs.recv().await {
            jobs.push(job);
        }
        let report = self.completion.await.map_err(join_error)??;
        Ok((jobs, report))
    }
}

/// Pipeline builder: flatten, fetch, write
#[derive(Clone)]
pub struct Transport {
    client: SharedHttpClient,
    workers: usize,
    repo_workers: usize,
    queue_capacity: usize,
    max_retries: u32,
    timeout: Option<Duration>,
    shutdown: SharedShutdown,
    progress: Option<ProgressBar>,
}

impl Transport {
    /// Pipeline with default sizing using `client` for every request
    pub fn new(client: SharedHttpClient) -> Self {
        Self {
            client,
            workers: DEFAULT_WEB_WORKERS,
            repo_workers: DEFAULT_REPO_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_retries: MAX_RETRIES,
            timeout: None,
            shutdown: ShutdownCoordinator::shared(),
            progress: None,
        }
    }

    /// Set the number of web workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the number of repository workers
    pub fn with_repo_workers(mut self, workers: usize) -> Self {
        self.repo_workers = workers.max(1);
        self
    }

    /// Set the capacity of both queues
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set how often a retryable upstream failure is retried per unit
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Request shutdown if a run takes longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use an externally owned shutdown coordinator
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Report processed units on `progress`
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Shutdown coordinator of this pipeline
    pub fn shutdown(&self) -> &SharedShutdown {
        &self.shutdown
    }

    /// Flatten `config` using this pipeline's client
    pub fn flatten(&self, config: &TransportConfig) -> Result<Vec<FetchUnit>, TransportError> {
        flatten(config, &self.client)
    }

    /// Start the web workers and enqueue `units` in order.
    ///
    /// The producer blocks while the input queue is full and stops enqueuing
    /// on shutdown.
    pub fn spawn(&self, units: Vec<FetchUnit>) -> TransportHandle {
        let total = units.len();
        let (input_tx, input_rx) = mpsc::channel(self.queue_capacity);
        let (output_tx, output_rx) = mpsc::channel(self.queue_capacity);

        let mut pool = WebWorkerPool::new(self.workers, Arc::clone(&self.shutdown))
            .with_max_retries(self.max_retries);
        if let Some(progress) = &self.progress {
            pool = pool.with_progress(progress.clone());
        }
        let pool_handle = pool.spawn(input_rx, output_tx);

        let shutdown = Arc::clone(&self.shutdown);
        let producer = tokio::spawn(async move {
            let mut enqueued = 0usize;
            for unit in units {
                tokio::select! {
                    biased;
                    _ = shutdown.wait_for_shutdown() => break,
                    sent = input_tx.send(unit) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
                enqueued += 1;
            }
            enqueued
        });

        let completion = tokio::spawn(async move {
            let enqueued = producer.await.map_err(join_error);
            let report = pool_handle.await.map_err(join_error);
            let (enqueued, mut report) = (enqueued?, report?);
            if enqueued < total {
                debug!(enqueued, total, "Stopped enqueuing fetch units");
                report.cancelled = true;
            }
            Ok(report)
        });

        TransportHandle {
            jobs: output_rx,
            completion,
        }
    }

    /// Flatten `config` and run every unit into `repository`.
    ///
    /// Per-unit failures are reported in [`RunReport::failures`]. Returns
    /// [`TransportError::Configuration`] before any request on an invalid
    /// configuration and [`TransportError::Cancelled`] when shutdown stopped
    /// the run early.
    pub async fn run(
        &self,
        config: &TransportConfig,
        repository: SharedRepository,
    ) -> Result<RunReport, TransportError> {
        let units = self.flatten(config)?;
        self.run_units(units, repository).await
    }

    /// Run already flattened `units` into `repository`.
    ///
    /// Like [`Transport::run`], a cancelled run returns
    /// [`TransportError::Cancelled`]; use [`Transport::run_report`] to keep
    /// the partial report.
    pub async fn run_units(
        &self,
        units: Vec<FetchUnit>,
        repository: SharedRepository,
    ) -> Result<RunReport, TransportError> {
        let report = self.run_report(units, repository).await?;
        if report.cancelled {
            return Err(TransportError::Cancelled);
        }
        Ok(report)
    }

    /// Run `units` into `repository` and return the report even when shutdown
    /// stopped the run early ([`RunReport::cancelled`]).
    ///
    /// Fails only if a pipeline task panicked.
    pub async fn run_report(
        &self,
        units: Vec<FetchUnit>,
        repository: SharedRepository,
    ) -> Result<RunReport, TransportError> {
        let total = units.len();
        let span = info_span!("transport_run", units = total, workers = self.workers);

        async move {
            let started = Instant::now();
            info!("Starting transport run");

            let deadline = self.timeout.map(|t| self.shutdown.spawn_deadline(t));

            let (jobs, completion) = self.spawn(units).into_parts();
            let repo_handle = RepoWorkerPool::new(self.repo_workers, repository).spawn(jobs);

            let web = completion.await.map_err(join_error).and_then(|web| web);
            let repo = repo_handle.await.map_err(join_error);
            if let Some(deadline) = deadline {
                deadline.abort();
            }
            let (web, repo) = (web?, repo?);

            let report = RunReport {
                units: total,
                written: web.written,
                skipped: web.skipped,
                failures: web.failures,
                write_failures: repo.failures,
                matched: repo.counts.matched,
                upserted: repo.counts.upserted,
                cancelled: web.cancelled,
            };

            if report.cancelled {
                warn!(
                    processed = web.processed,
                    written = report.written,
                    failed = report.failures.len(),
                    upserted = report.upserted,
                    "Transport run cancelled"
                );
                return Ok(report);
            }

            info!(
                written = report.written,
                skipped = report.skipped,
                failed = report.failures.len(),
                matched = report.matched,
                upserted = report.upserted,
                duration_ms = started.elapsed().as_millis() as u64,
                "Transport run finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }
}

fn join_error(err: JoinError) -> TransportError {
    warn!(error = %err, "Pipeline task failed");
    TransportError::Worker(err.to_string())
}
