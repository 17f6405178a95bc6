//! CLI command implementations

use clap::{Parser, Subcommand};
use std::str::FromStr;

pub mod error;
pub mod run;
pub mod validate;

pub use error::CliError;
pub use run::RunArgs;
pub use validate::ValidateArgs;

/// Ingest pipeline CLI
#[derive(Parser, Debug)]
#[command(name = "ingest-pipeline")]
#[command(about = "Fetch HTTP APIs in rate-limited time windows and store the results", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every request of a configuration file
    Run(RunArgs),

    /// Check a configuration file and list its fetch units without sending requests
    Validate(ValidateArgs),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
