//! Flattening of request templates into schedulable fetch units
//!
//! Pure and deterministic: template order is preserved, and a timeseries
//! template contributes one unit per window in window order.

use tracing::debug;

use super::fetch_config::FetchDescriptor;
use super::http::SharedHttpClient;
use super::template::{RequestTemplate, TransportConfig};
use super::timeseries::Window;
use super::TransportError;

/// One concrete fetch, consumed exactly once by a web worker
#[derive(Debug, Clone)]
pub struct FetchUnit {
    /// Resolved HTTP call
    pub descriptor: FetchDescriptor,
    /// Destination table
    pub table: String,
    /// Key for opaque bodies, if they should be kept
    pub clob_column: Option<String>,
    /// Window this unit covers, for timeseries templates
    pub window: Option<Window>,
}

impl FetchUnit {
    fn new(descriptor: FetchDescriptor, template: &RequestTemplate, window: Option<Window>) -> Self {
        Self {
            descriptor,
            table: template.table.clone(),
            clob_column: template.clob_column.clone(),
            window,
        }
    }
}

/// Expand every request template of `config` into fetch units.
///
/// # Errors
/// [`TransportError::Configuration`] when the configuration has no requests,
/// when a timeseries start/end parameter is missing or unparsable, or when
/// the range cannot be windowed.
pub fn flatten(
    config: &TransportConfig,
    client: &SharedHttpClient,
) -> Result<Vec<FetchUnit>, TransportError> {
    if config.requests.is_empty() {
        return Err(TransportError::Configuration(
            "no requests configured".to_string(),
        ));
    }

    let mut units = Vec::with_capacity(config.requests.len());

    for template in &config.requests {
        match &template.timeseries {
            None => {
                let descriptor = FetchDescriptor::build(&config.base_url, template, None, client)?;
                units.push(FetchUnit::new(descriptor, template, None));
            }
            Some(timeseries) => {
                let windows = timeseries.windows_for(&template.query).map_err(|e| match e {
                    TransportError::Configuration(msg) => TransportError::Configuration(format!(
                        "endpoint `{}`: {msg}",
                        template.endpoint
                    )),
                    other => other,
                })?;

                units.reserve(windows.len());
                for window in windows.iter() {
                    let descriptor =
                        FetchDescriptor::build(&config.base_url, template, Some(window), client)?;
                    units.push(FetchUnit::new(descriptor, template, Some(*window)));
                }

                debug!(
                    endpoint = %template.endpoint,
                    windows = windows.len(),
                    "Expanded timeseries request"
                );
            }
        }
    }

    debug!(
        requests = config.requests.len(),
        units = units.len(),
        "Flattened request templates"
    );

    Ok(units)
}
