//! Partitioning of a time range into contiguous, bounded windows
//!
//! A request template may carry a [`TimeseriesSpec`] naming the query
//! parameters that hold the start and end of a time range. The range is cut
//! into windows no longer than the configured period; each window becomes one
//! fetch unit with the start/end parameters rewritten.

use chrono::{DateTime, Duration, FixedOffset, SecondsFormat};
use once_cell::sync::OnceCell;
use std::borrow::Cow;
use std::collections::BTreeMap;

use super::TransportError;

/// One slice of a timeseries range.
///
/// Timestamps keep the offset they were written with; see
/// [`TimestampStyle`] for the rest of the input's formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    /// Inclusive start of the window
    pub start: DateTime<FixedOffset>,
    /// End of the window (equal to the next window's start)
    pub end: DateTime<FixedOffset>,
}

impl Window {
    /// Create a window
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        Self { start, end }
    }

    /// Length of the window
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}..{}",
            format_timestamp(&self.start),
            format_timestamp(&self.end)
        )
    }
}

/// Timeseries parameters of a request template
#[derive(Debug, Clone)]
pub struct TimeseriesSpec {
    /// Query parameter holding the range start
    pub start_name: String,
    /// Query parameter holding the range end
    pub end_name: String,
    /// Maximum length of one window
    pub period: Duration,
    windows: OnceCell<CachedWindows>,
}

/// Windows of the first range seen, keyed by its raw start/end values
#[derive(Debug, Clone)]
struct CachedWindows {
    start: String,
    end: String,
    windows: Vec<Window>,
}

impl TimeseriesSpec {
    /// Create a spec; windows are computed on first use.
    pub fn new(start_name: impl Into<String>, end_name: impl Into<String>, period: Duration) -> Self {
        Self {
            start_name: start_name.into(),
            end_name: end_name.into(),
            period,
            windows: OnceCell::new(),
        }
    }

    /// Windows cached by the first successful [`TimeseriesSpec::windows_for`]
    pub fn windows(&self) -> Option<&[Window]> {
        self.windows.get().map(|cached| cached.windows.as_slice())
    }

    /// Windows covering the range named by `query`.
    ///
    /// The first successful call caches its windows. Later calls with the
    /// same start/end values borrow the cache; a query naming another range
    /// gets freshly computed windows. Fails with
    /// [`TransportError::Configuration`] if either parameter is missing or not
    /// an RFC 3339 timestamp, or if [`window`] rejects the range.
    pub fn windows_for(
        &self,
        query: &BTreeMap<String, String>,
    ) -> Result<Cow<'_, [Window]>, TransportError> {
        let start = query_value(query, &self.start_name)?;
        let end = query_value(query, &self.end_name)?;

        let cached = self.windows.get_or_try_init(|| {
            Ok::<_, TransportError>(CachedWindows {
                start: start.to_string(),
                end: end.to_string(),
                windows: self.compute(start, end)?,
            })
        })?;
        if cached.start == start && cached.end == end {
            return Ok(Cow::Borrowed(&cached.windows));
        }
        self.compute(start, end).map(Cow::Owned)
    }

    fn compute(&self, start: &str, end: &str) -> Result<Vec<Window>, TransportError> {
        let start = parse_timestamp(&self.start_name, start)?;
        let end = parse_timestamp(&self.end_name, end)?;
        window(start, end, self.period)
    }
}

fn query_value<'q>(query: &'q BTreeMap<String, String>, name: &str) -> Result<&'q str, TransportError> {
    query.get(name).map(String::as_str).ok_or_else(|| {
        TransportError::Configuration(format!(
            "timeseries parameter `{name}` is missing from the request query"
        ))
    })
}

/// Parse an RFC 3339 timestamp from the query parameter `name`
pub fn parse_timestamp(name: &str, value: &str) -> Result<DateTime<FixedOffset>, TransportError> {
    DateTime::parse_from_rfc3339(value.trim()).map_err(|e| {
        TransportError::Configuration(format!(
            "timeseries parameter `{name}` is not an RFC 3339 timestamp ({value:?}): {e}"
        ))
    })
}

/// Format a timestamp as RFC 3339, using `Z` for UTC
pub fn format_timestamp(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// How an input timestamp was written: UTC designator and fraction digits.
///
/// Rewritten window bounds are formatted in the style of the query value
/// they replace, so `2022-05-10T00:00:00.000+00:00` stays in that shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampStyle {
    utc_z: bool,
    fraction_digits: Option<usize>,
}

impl Default for TimestampStyle {
    /// `Z` for UTC and the shortest exact fraction, as [`format_timestamp`]
    fn default() -> Self {
        Self {
            utc_z: true,
            fraction_digits: None,
        }
    }
}

impl TimestampStyle {
    /// Style of the RFC 3339 `value`
    pub fn of(value: &str) -> Self {
        let value = value.trim();
        let utc_z = value.ends_with(['Z', 'z']);
        let digits = value.find('.').map_or(0, |dot| {
            value[dot + 1..]
                .bytes()
                .take_while(u8::is_ascii_digit)
                .count()
                .min(9)
        });
        Self {
            utc_z,
            fraction_digits: Some(digits),
        }
    }

    /// Format `timestamp` in this style
    pub fn format(&self, timestamp: &DateTime<FixedOffset>) -> String {
        let Some(digits) = self.fraction_digits else {
            return timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, self.utc_z);
        };
        let full = timestamp.to_rfc3339_opts(SecondsFormat::Nanos, self.utc_z);
        // Nanos always renders `.` followed by nine digits
        match full.rfind('.') {
            Some(dot) if full.len() >= dot + 10 => {
                let (seconds, rest) = full.split_at(dot);
                let (fraction, offset) = rest.split_at(10);
                if digits == 0 {
                    format!("{seconds}{offset}")
                } else {
                    format!("{seconds}{}{offset}", &fraction[..=digits])
                }
            }
            _ => full,
        }
    }
}

/// Split `[start, end]` into ordered, contiguous windows of at most `period`.
///
/// Every window is exactly `period` long except the last, which ends at
/// `end` and may be shorter. `start == end` yields a single zero-length
/// window. Fails if `end < start` or `period` is not positive.
pub fn window(
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    period: Duration,
) -> Result<Vec<Window>, TransportError> {
    if period <= Duration::zero() {
        return Err(TransportError::Configuration(format!(
            "timeseries period must be positive, got {}s",
            period.num_seconds()
        )));
    }
    if end < start {
        return Err(TransportError::Configuration(format!(
            "timeseries end {} is before start {}",
            format_timestamp(&end),
            format_timestamp(&start)
        )));
    }

    let mut windows = Vec::new();
    let mut cursor = start;
    loop {
        match cursor.checked_add_signed(period) {
            Some(candidate) if candidate < end => {
                windows.push(Window::new(cursor, candidate));
                cursor = candidate;
            }
            // `>=` closes here so no trailing zero-length window is emitted
            _ => {
                windows.push(Window::new(cursor, end));
                break;
            }
        }
    }

    Ok(windows)
}
