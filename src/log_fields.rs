//! Compact rendering of per-unit diagnostic fields.
//!
//! Workers attach a [`LogFields`] value to every completed fetch or write so
//! log lines stay short and greppable: `{w:1, d:1s, c:2, u:1, m:hello}`.
//! Unset fields (zero or empty) are omitted.

use std::fmt;
use std::time::Duration;

/// Diagnostic fields reported for one completed unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFields {
    /// Worker identifier (1-based, 0 means unset)
    pub worker_id: usize,
    /// Time spent on the unit
    pub duration: Duration,
    /// Free-text message
    pub msg: String,
    /// Records inserted or updated by the storage layer
    pub upserted: u64,
    /// Records the storage layer already held
    pub matched: u64,
}

impl LogFields {
    /// Fields for the given worker.
    pub fn worker(worker_id: usize) -> Self {
        Self {
            worker_id,
            ..Self::default()
        }
    }

    /// Set the elapsed duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the message.
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    /// Set the storage counts.
    pub fn with_counts(mut self, matched: u64, upserted: u64) -> Self {
        self.matched = matched;
        self.upserted = upserted;
        self
    }
}

/// Millisecond precision is plenty for log lines.
fn display_duration(duration: Duration) -> humantime::FormattedDuration {
    if duration >= Duration::from_millis(1) {
        humantime::format_duration(Duration::from_millis(duration.as_millis() as u64))
    } else {
        humantime::format_duration(duration)
    }
}

impl fmt::Display for LogFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(5);

        if self.worker_id != 0 {
            parts.push(format!("w:{}", self.worker_id));
        }
        if !self.duration.is_zero() {
            parts.push(format!("d:{}", display_duration(self.duration)));
        }
        if self.matched != 0 {
            parts.push(format!("c:{}", self.matched));
        }
        if self.upserted != 0 {
            parts.push(format!("u:{}", self.upserted));
        }
        if !self.msg.is_empty() {
            parts.push(format!("m:{}", self.msg));
        }

        write!(f, "{{{}}}", parts.join(", "))
    }
}
