//! Run command implementation

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::{Cli, CliError, OutputFormat};
use crate::config::Config;
use crate::metrics::init_metrics;
use crate::shutdown::SharedShutdown;
use crate::storage::JsonlRepository;
use crate::transport::{ReqwestClient, RunReport, Transport, TransportError};

/// Maximum allowed web workers to prevent self-inflicted rate limiting
const MAX_WORKERS: usize = 64;

/// Parse and validate a worker count
fn parse_workers(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("workers must be at least 1".to_string());
    }
    if value > MAX_WORKERS {
        return Err(format!("workers {value} exceeds maximum of {MAX_WORKERS}"));
    }
    Ok(value)
}

/// Arguments of the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// YAML configuration file
    #[arg(long)]
    pub config: PathBuf,

    /// Directory receiving one `<table>.jsonl` file per table
    #[arg(long, default_value = "data")]
    pub output_dir: PathBuf,

    /// Number of web workers (overrides the configuration file, max 64)
    #[arg(long, value_parser = parse_workers)]
    pub workers: Option<usize>,

    /// Stop the run after this long (e.g. 30s, 5m)
    #[arg(long)]
    pub timeout: Option<humantime::Duration>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        if let Some(addr) = self.metrics_addr {
            init_metrics(addr).await?;
        }

        let config = Config::load(&self.config)?;
        let workers = self.workers.unwrap_or(config.workers);
        let queue_capacity = config.queue_capacity;
        let transport_config = config.into_transport_config()?;

        let mut transport = Transport::new(ReqwestClient::new()?.shared())
            .with_workers(workers)
            .with_queue_capacity(queue_capacity)
            .with_shutdown(shutdown);
        if let Some(timeout) = self.timeout {
            transport = transport.with_timeout(timeout.into());
        }

        let units = transport.flatten(&transport_config)?;
        let repository = Arc::new(JsonlRepository::new(&self.output_dir)?);

        info!(
            config = %self.config.display(),
            units = units.len(),
            workers,
            "Starting run"
        );

        let progress = create_progress_bar(units.len() as u64);
        let total = units.len();
        let result = transport
            .with_progress(progress.clone())
            .run_report(units, repository)
            .await;
        progress.finish_and_clear();

        match cli.output_format {
            OutputFormat::Json => output_json(self, &result),
            OutputFormat::Human => output_human(self, &result),
        }

        let report = result?;
        if report.cancelled {
            return Err(TransportError::Cancelled.into());
        }
        let failed = report.failures.len() + report.write_failures.len();
        if failed > 0 {
            return Err(CliError::PartialFailure {
                failed,
                units: total,
            });
        }
        Ok(())
    }
}

fn output_json(args: &RunArgs, result: &Result<RunReport, TransportError>) {
    let output = match result {
        Ok(report) => serde_json::json!({
            "success": report.is_success(),
            "cancelled": report.cancelled,
            "output_dir": args.output_dir.display().to_string(),
            "units": report.units,
            "written": report.written,
            "skipped": report.skipped,
            "failed": report.failures.len() + report.write_failures.len(),
            "matched": report.matched,
            "upserted": report.upserted,
            "failures": report
                .failures
                .iter()
                .map(|f| serde_json::json!({ "table": f.table, "url": f.url, "error": f.error.to_string() }))
                .collect::<Vec<_>>(),
        }),
        Err(e) => serde_json::json!({
            "success": false,
            "output_dir": args.output_dir.display().to_string(),
            "error": e.to_string(),
        }),
    };
    println!("{output}");
}

fn output_human(args: &RunArgs, result: &Result<RunReport, TransportError>) {
    match result {
        Ok(report) => {
            if report.cancelled {
                println!("\nRun cancelled before every unit was processed");
            } else if report.is_success() {
                println!("\nRun completed successfully!");
            } else {
                println!("\nRun completed with failures");
            }
            println!("Output: {}", args.output_dir.display());
            println!("Fetch units: {}", report.units);
            println!("Write jobs: {}", report.written);
            if report.skipped > 0 {
                println!("Skipped (non-JSON): {}", report.skipped);
            }
            println!("Records upserted: {}", report.upserted);
            println!("Records matched: {}", report.matched);
            for failure in &report.failures {
                eprintln!("Failed {} [{}]: {}", failure.url, failure.table, failure.error);
            }
            for failure in &report.write_failures {
                eprintln!("Failed write [{}]: {}", failure.table, failure.message);
            }
        }
        Err(e) => {
            eprintln!("\nRun failed!");
            eprintln!("Error: {e}");
            error!("Run failed: {}", e);
        }
    }
}

/// Create progress bar with style
fn create_progress_bar(total_units: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_units);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .expect("hardcoded template is valid")
            .progress_chars("#>-"),
    );
    pb.set_message("Fetching");
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
