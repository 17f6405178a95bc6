//! Storage backends for write jobs
//!
//! Both backends upsert idempotently: a record is identified by its
//! canonical JSON text, so replaying a run matches instead of duplicating.
//! A payload holding a JSON array contributes one record per element; any
//! other payload is a single record.

use serde_json::Value;

use crate::transport::{RepositoryError, WriteJob};

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlRepository;
pub use memory::MemoryRepository;

/// Split a write job's payload into records
pub fn records(job: &WriteJob) -> Result<Vec<Value>, RepositoryError> {
    let value: Value =
        serde_json::from_slice(&job.payload).map_err(|e| RepositoryError::InvalidPayload {
            table: job.table.clone(),
            message: e.to_string(),
        })?;

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![value]),
        other => Err(RepositoryError::InvalidPayload {
            table: job.table.clone(),
            message: format!("expected a JSON object or array, got `{other}`"),
        }),
    }
}

/// Identity of a record: its compact JSON text with sorted object keys
pub fn record_key(record: &Value) -> String {
    record.to_string()
}
