//! CLI error types and conversions

use crate::config::ConfigError;
use crate::metrics::MetricsError;
use crate::transport::{RepositoryError, TransportError};

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration file error
    #[error("config error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Transport error
    #[error("transport error: {0}")]
    TransportError(#[from] TransportError),

    /// Repository error
    #[error("repository error: {0}")]
    RepositoryError(#[from] RepositoryError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    MetricsError(#[from] MetricsError),

    /// The run finished but some units or writes failed
    #[error("{failed} of {units} fetch units or writes failed")]
    PartialFailure {
        /// Failed units and writes
        failed: usize,
        /// Units in the run
        units: usize,
    },
}
