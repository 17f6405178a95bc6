//! Transport configuration constants

use std::time::Duration;

/// Default number of concurrent web workers.
pub const DEFAULT_WEB_WORKERS: usize = 4;

/// Default number of concurrent repository workers.
pub const DEFAULT_REPO_WORKERS: usize = 2;

/// Default capacity of the fetch-unit and write-job queues.
/// Producers block once this many items are pending.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default rate limit when a request does not configure one: 5 calls per second.
pub const DEFAULT_RATE_LIMIT_BURST: usize = 5;

/// Window of the default rate limit.
pub const DEFAULT_RATE_LIMIT_PERIOD: Duration = Duration::from_secs(1);

/// HTTP connect timeout (seconds) - time to establish TCP connection
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP request timeout (seconds) - overall time for the entire request
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for a failed HTTP call.
/// Only network errors, 429 and 5xx responses are retried.
pub const MAX_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 500;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Calculate exponential backoff delay
pub fn calculate_backoff(retry_count: u32) -> Duration {
    let delay_ms = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(retry_count));
    Duration::from_millis(delay_ms.min(MAX_BACKOFF_MS))
}
