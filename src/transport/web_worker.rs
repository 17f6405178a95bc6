//! Fixed-size pool of workers turning fetch units into write jobs
//!
//! Every worker loops over the shared input queue:
//! 1. receive the next [`FetchUnit`]
//! 2. wait on the unit's rate limiter
//! 3. perform the HTTP call and classify the body
//!
//! Retryable failures (network errors, 429, 5xx) go back to step 2 after a
//! backoff, so every upstream attempt holds its own rate limiter slot.
//! Each of these suspension points races the shutdown signal. A supervisor
//! task joins every worker before dropping the output sender, so the output
//! queue closes only once no worker can produce another job.

use indicatif::ProgressBar;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::body::ResponseBody;
use super::defaults::{calculate_backoff, MAX_RETRIES};
use super::flatten::FetchUnit;
use super::http::HttpResponse;
use super::{TransportError, WorkOutcome, WriteJob};
use crate::log_fields::LogFields;
use crate::metrics::{record_rate_limit_wait, record_retry_backoff, FetchMetrics};
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};

/// Failed fetch unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    /// Destination table of the unit
    pub table: String,
    /// Requested URL
    pub url: String,
    /// Cause
    pub error: TransportError,
}

/// Totals reported by a web worker pool once every worker exited
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebPoolReport {
    /// Units taken from the input queue
    pub processed: usize,
    /// Write jobs sent to the output queue
    pub written: usize,
    /// Opaque bodies dropped for lack of a clob column
    pub skipped: usize,
    /// Units that failed
    pub failures: Vec<UnitFailure>,
    /// Whether any worker stopped because shutdown was requested
    pub cancelled: bool,
}

impl WebPoolReport {
    /// Fold another worker's totals into this one
    pub fn merge(&mut self, other: WebPoolReport) {
        self.processed += other.processed;
        self.written += other.written;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
        self.cancelled |= other.cancelled;
    }
}

/// Pool of web workers sharing one input queue
#[derive(Debug, Clone)]
pub struct WebWorkerPool {
    workers: usize,
    max_retries: u32,
    shutdown: SharedShutdown,
    progress: Option<ProgressBar>,
}

impl WebWorkerPool {
    /// Create a pool of `workers` workers (at least one)
    pub fn new(workers: usize, shutdown: SharedShutdown) -> Self {
        Self {
            workers: workers.max(1),
            max_retries: MAX_RETRIES,
            shutdown,
            progress: None,
        }
    }

    /// Set how often a retryable failure is retried per unit
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Advance `progress` by one for every unit taken off the queue
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Start the workers.
    ///
    /// Workers exit once `input` is closed and drained, or on shutdown. The
    /// returned handle resolves after every worker exited and `output` was
    /// dropped.
    pub fn spawn(
        &self,
        input: mpsc::Receiver<FetchUnit>,
        output: mpsc::Sender<WriteJob>,
    ) -> JoinHandle<WebPoolReport> {
        let input = Arc::new(Mutex::new(input));
        let mut workers = JoinSet::new();

        for worker_id in 1..=self.workers {
            workers.spawn(run_worker(
                worker_id,
                self.max_retries,
                Arc::clone(&input),
                output.clone(),
                Arc::clone(&self.shutdown),
                self.progress.clone(),
            ));
        }

        let pool_size = self.workers;
        tokio::spawn(async move {
            let mut report = WebPoolReport::default();
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(worker_report) => report.merge(worker_report),
                    Err(e) => error!(error = %e, "Web worker task failed"),
                }
            }
            // Last sender: the output queue closes here
            drop(output);

            debug!(
                workers = pool_size,
                processed = report.processed,
                written = report.written,
                skipped = report.skipped,
                failed = report.failures.len(),
                "Web worker pool finished"
            );
            report
        })
    }
}

async fn run_worker(
    worker_id: usize,
    max_retries: u32,
    input: Arc<Mutex<mpsc::Receiver<FetchUnit>>>,
    output: mpsc::Sender<WriteJob>,
    shutdown: SharedShutdown,
    progress: Option<ProgressBar>,
) -> WebPoolReport {
    let mut report = WebPoolReport::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.wait_for_shutdown() => {
                report.cancelled = true;
                break;
            }
            next = async { input.lock().await.recv().await } => next,
        };
        let Some(unit) = next else {
            break;
        };
        report.processed += 1;

        let outcome = process_unit(worker_id, &unit, max_retries, &shutdown).await;
        if let Some(progress) = &progress {
            progress.inc(1);
        }

        match outcome {
            WorkOutcome::Written(job) => {
                if output.send(job).await.is_err() {
                    warn!(worker = worker_id, "Write queue closed - stopping worker");
                    report.failures.push(UnitFailure {
                        table: unit.table.clone(),
                        url: unit.descriptor.url.to_string(),
                        error: TransportError::Repository("write queue closed".to_string()),
                    });
                    break;
                }
                report.written += 1;
            }
            WorkOutcome::Skipped => report.skipped += 1,
            WorkOutcome::Failed(TransportError::Cancelled) => {
                report.cancelled = true;
                break;
            }
            WorkOutcome::Failed(error) => report.failures.push(UnitFailure {
                table: unit.table.clone(),
                url: unit.descriptor.url.to_string(),
                error,
            }),
        }
    }

    debug!(worker = worker_id, processed = report.processed, "Web worker exiting");
    report
}

/// Fetch one unit and classify its response.
///
/// A retryable failure is retried up to `max_retries` times with exponential
/// backoff; every attempt first takes a slot from the unit's rate limiter.
/// Returns `Failed(Cancelled)` as soon as shutdown is requested while
/// waiting for the rate limiter, a backoff or the response; an in-flight
/// request is dropped.
pub async fn process_unit(
    worker_id: usize,
    unit: &FetchUnit,
    max_retries: u32,
    shutdown: &ShutdownCoordinator,
) -> WorkOutcome {
    let url = unit.descriptor.url.as_str();
    let started = Instant::now();

    let outcome = match fetch_with_retries(worker_id, unit, max_retries, shutdown).await {
        Ok(response) => ResponseBody::classify(response.content_type.as_deref(), response.body)
            .into_outcome(&unit.table, unit.clob_column.as_deref(), url),
        Err(e) => WorkOutcome::Failed(e),
    };

    let fields = LogFields::worker(worker_id).with_duration(started.elapsed());
    let metrics = FetchMetrics::new(&unit.table);
    match &outcome {
        WorkOutcome::Written(job) => {
            metrics.record_written();
            info!(
                table = %unit.table,
                url = %url,
                "{}",
                fields.with_msg(format!("fetched {} bytes", job.payload.len()))
            );
        }
        WorkOutcome::Skipped => {
            metrics.record_skipped();
            debug!(
                table = %unit.table,
                url = %url,
                "{}",
                fields.with_msg("skipped opaque body without clob column")
            );
        }
        WorkOutcome::Failed(TransportError::Cancelled) => {}
        WorkOutcome::Failed(error) => {
            metrics.record_failed(error_kind(error));
            warn!(
                table = %unit.table,
                url = %url,
                "{}",
                fields.with_msg(error.to_string())
            );
        }
    }

    outcome
}

async fn fetch_with_retries(
    worker_id: usize,
    unit: &FetchUnit,
    max_retries: u32,
    shutdown: &ShutdownCoordinator,
) -> Result<HttpResponse, TransportError> {
    let descriptor = &unit.descriptor;
    let mut attempt = 0;

    loop {
        let waiting = Instant::now();
        descriptor.rate_limiter.acquire_or_shutdown(shutdown).await?;
        record_rate_limit_wait(&unit.table, waiting.elapsed());

        let response = tokio::select! {
            biased;
            _ = shutdown.wait_for_shutdown() => return Err(TransportError::Cancelled),
            response = descriptor.client.fetch(&descriptor.method, &descriptor.url) => response,
        };

        match response {
            Err(error) if error.is_retryable() && attempt < max_retries => {
                let backoff = calculate_backoff(attempt);
                attempt += 1;
                record_retry_backoff(backoff, attempt);
                warn!(
                    table = %unit.table,
                    url = %descriptor.url,
                    "{}",
                    LogFields::worker(worker_id).with_msg(format!(
                        "attempt {}/{} failed, retrying in {:?}: {}",
                        attempt,
                        max_retries + 1,
                        backoff,
                        error
                    ))
                );
                tokio::select! {
                    biased;
                    _ = shutdown.wait_for_shutdown() => return Err(TransportError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
            response => return response,
        }
    }
}

fn error_kind(error: &TransportError) -> &'static str {
    match error {
        TransportError::Configuration(_) => "configuration",
        TransportError::Http { .. } => "http",
        TransportError::Unavailable { .. } => "unavailable",
        TransportError::Decode { .. } => "decode",
        TransportError::Cancelled => "cancelled",
        TransportError::Repository(_) => "repository",
        TransportError::Worker(_) => "worker",
    }
}
