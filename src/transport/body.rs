//! Response body classification
//!
//! Upstream APIs answer with JSON, markup, plain text or worse. Each body is
//! classified once into a [`ResponseBody`] and turned into a [`WorkOutcome`]
//! by pattern match.

use bytes::Bytes;
use serde_json::{Map, Value};

use super::{TransportError, WorkOutcome, WriteJob};

/// Classified response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// A JSON object or array
    Structured(Bytes),
    /// A non-JSON payload such as HTML or plain text
    Opaque(Bytes),
    /// Declared as JSON but not a JSON object or array
    Unparseable(Bytes),
}

impl ResponseBody {
    /// Classify a body by its declared content type, sniffing when absent.
    pub fn classify(content_type: Option<&str>, body: Bytes) -> Self {
        let declared = content_type.map(str::trim).filter(|ct| !ct.is_empty());

        match declared {
            Some(ct) if is_json_content_type(ct) => {
                if is_json_records(&body) {
                    Self::Structured(body)
                } else {
                    Self::Unparseable(body)
                }
            }
            Some(_) => Self::Opaque(body),
            None if is_json_records(&body) => Self::Structured(body),
            None => Self::Opaque(body),
        }
    }

    /// Turn the body into the worker's outcome for one fetch unit.
    ///
    /// Structured bodies are written unmodified. Opaque bodies are wrapped
    /// as `{clob_column: body}` when a clob column is configured and skipped
    /// otherwise. Unparseable bodies are wrapped the same way, or reported as
    /// [`TransportError::Decode`] without a clob column.
    pub fn into_outcome(self, table: &str, clob_column: Option<&str>, url: &str) -> WorkOutcome {
        match (self, clob_column) {
            (Self::Structured(body), _) => WorkOutcome::Written(WriteJob::new(table, body)),
            (Self::Opaque(body) | Self::Unparseable(body), Some(column)) => {
                match wrap_clob(column, &body) {
                    Ok(payload) => WorkOutcome::Written(WriteJob::new(table, payload)),
                    Err(e) => WorkOutcome::Failed(TransportError::Decode {
                        url: url.to_string(),
                        message: e.to_string(),
                    }),
                }
            }
            (Self::Opaque(_), None) => WorkOutcome::Skipped,
            (Self::Unparseable(body), None) => WorkOutcome::Failed(TransportError::Decode {
                url: url.to_string(),
                message: format!(
                    "response declared JSON but is not an object or array ({} bytes)",
                    body.len()
                ),
            }),
        }
    }
}

fn is_json_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime == "text/json" || mime.ends_with("+json")
}

fn is_json_records(body: &[u8]) -> bool {
    matches!(
        serde_json::from_slice::<Value>(body),
        Ok(Value::Object(_) | Value::Array(_))
    )
}

/// Single-key JSON object holding the raw body as a string
fn wrap_clob(column: &str, body: &[u8]) -> Result<Bytes, serde_json::Error> {
    let mut record = Map::new();
    record.insert(
        column.to_string(),
        Value::String(String::from_utf8_lossy(body).into_owned()),
    );
    serde_json::to_vec(&Value::Object(record)).map(Bytes::from)
}
