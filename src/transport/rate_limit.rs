//! Request-based rate limiting shared across fetch units
//!
//! A [`RateLimiter`] grants at most `burst` acquisitions per `period`. Every
//! fetch unit expanded from the same request template holds the same
//! `Arc<RateLimiter>`, so window-expanded calls collectively respect one
//! quota. Waiters are served in FIFO order (tokio's semaphore is fair).

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::shutdown::ShutdownCoordinator;

/// Rate limiter granting `burst` calls per `period`
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    burst: usize,
    period: Duration,
}

impl RateLimiter {
    /// Create a rate limiter
    ///
    /// # Arguments
    /// * `burst` - Maximum calls per period (a zero burst is raised to 1)
    /// * `period` - Time window for the quota
    pub fn new(burst: usize, period: Duration) -> Self {
        let burst = burst.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(burst)),
            burst,
            period,
        }
    }

    /// Shared handle, ready to bind into request templates
    pub fn shared(burst: usize, period: Duration) -> Arc<Self> {
        Arc::new(Self::new(burst, period))
    }

    /// Maximum calls per period
    pub fn burst(&self) -> usize {
        self.burst
    }

    /// Quota window
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Calls that may start right now without waiting
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquire one call slot, waiting while the quota is exhausted
    ///
    /// The slot is held for the full period and then released, so no more
    /// than `burst` calls start within any window of `period`.
    pub async fn acquire(&self) -> Result<(), RateLimitError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| RateLimitError::AcquireError(e.to_string()))?;

        let period = self.period;
        tokio::spawn(async move {
            sleep(period).await;
            drop(permit);
        });

        Ok(())
    }

    /// Acquire one call slot unless shutdown is requested first
    ///
    /// A waiter that loses the race leaves the queue without consuming a slot.
    pub async fn acquire_or_shutdown(
        &self,
        shutdown: &ShutdownCoordinator,
    ) -> Result<(), RateLimitError> {
        tokio::select! {
            biased;
            _ = shutdown.wait_for_shutdown() => Err(RateLimitError::Cancelled),
            acquired = self.acquire() => acquired,
        }
    }
}

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Failed to acquire permits
    #[error("failed to acquire rate limit permits: {0}")]
    AcquireError(String),

    /// Shutdown was requested while waiting
    #[error("rate limit wait cancelled")]
    Cancelled,
}
