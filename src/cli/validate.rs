//! Validation subcommand

use clap::Parser;
use std::path::PathBuf;

use super::{Cli, CliError, OutputFormat};
use crate::config::Config;
use crate::transport::{flatten, ReqwestClient};

/// Arguments of the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// YAML configuration file
    #[arg(long)]
    pub config: PathBuf,
}

impl ValidateArgs {
    /// Load the configuration, flatten it and list every fetch unit
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let config = Config::load(&self.config).map_err(|e| {
            eprintln!("Invalid configuration: {e}");
            e
        })?;
        let transport_config = config.into_transport_config().map_err(|e| {
            eprintln!("Invalid configuration: {e}");
            e
        })?;

        let client = ReqwestClient::new()?.shared();
        let units = flatten(&transport_config, &client).map_err(|e| {
            eprintln!("Invalid configuration: {e}");
            e
        })?;

        match cli.output_format {
            OutputFormat::Json => {
                let listed: Vec<_> = units
                    .iter()
                    .map(|unit| {
                        serde_json::json!({
                            "method": unit.descriptor.method.as_str(),
                            "url": unit.descriptor.url.as_str(),
                            "table": unit.table,
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::json!({ "valid": true, "units": units.len(), "requests": listed })
                );
            }
            OutputFormat::Human => {
                println!("Valid configuration: {}", self.config.display());
                println!("  Requests: {}", transport_config.requests.len());
                println!("  Fetch units: {}", units.len());
                for unit in &units {
                    println!(
                        "  {} {} -> {}",
                        unit.descriptor.method, unit.descriptor.url, unit.table
                    );
                }
            }
        }

        Ok(())
    }
}
