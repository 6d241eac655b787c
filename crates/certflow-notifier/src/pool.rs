//! Semaphore-based pool bounding the number of forwards in flight.
//!
//! The consumer acquires a [`ForwardPermit`] before spawning each forward and
//! the spawned task holds it until the forward finishes. When every permit is
//! taken the read loop waits, which stops it from pulling further messages.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

/// Default maximum number of concurrent forwards.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// The right to run one forward. Returned to the pool on drop.
pub struct ForwardPermit {
    _permit: OwnedSemaphorePermit,
}

/// Concurrency limit for downstream forwards.
#[derive(Clone)]
pub struct ForwardPool {
    semaphore: Arc<Semaphore>,
    max_in_flight: usize,
}

impl ForwardPool {
    /// Create a pool; zero falls back to [`DEFAULT_MAX_IN_FLIGHT`].
    pub fn new(max_in_flight: usize) -> Self {
        let limit = if max_in_flight == 0 {
            DEFAULT_MAX_IN_FLIGHT
        } else {
            max_in_flight
        };

        info!(max_in_flight = limit, "Forward pool created");

        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            max_in_flight: limit,
        }
    }

    /// Take a permit without waiting, or `None` when the pool is full.
    pub fn try_acquire(&self) -> Option<ForwardPermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(ForwardPermit { _permit: permit })
    }

    /// Wait for a permit.
    pub async fn acquire(&self) -> Result<ForwardPermit, PoolError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok(ForwardPermit { _permit: permit })
    }

    /// Refuse further permits. Outstanding permits stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub const fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Forwards currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.available_permits()
    }
}

impl Default for ForwardPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Forward pool has been closed")]
    Closed,
}
