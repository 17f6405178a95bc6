//! Main entry point for the ingest-pipeline CLI

use clap::Parser;
use ingest_pipeline::cli::{Cli, Commands};
use ingest_pipeline::shutdown::ShutdownCoordinator;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ingest_pipeline=info"));

    // Logs go to stderr so command output on stdout stays parseable
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - stopping after in-flight writes...");
                shutdown.request_shutdown();
            }
        }
    });

    let result: anyhow::Result<()> = match &cli.command {
        Commands::Run(args) => args
            .execute(&cli, shutdown.clone())
            .await
            .map_err(anyhow::Error::from),
        Commands::Validate(args) => args.execute(&cli).await.map_err(anyhow::Error::from),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}
