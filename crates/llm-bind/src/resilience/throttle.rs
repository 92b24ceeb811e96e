//! Counting semaphore bounding in-flight calls.

use super::Cancelled;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ConcurrencyThrottle {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

/// A held slot; dropping it releases the slot.
#[derive(Debug)]
pub struct ThrottlePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyThrottle {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// `None` when `max` is zero (unlimited).
    pub fn for_limit(max: u32) -> Option<Self> {
        (max > 0).then(|| Self::new(max as usize))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<ThrottlePermit, Cancelled> {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled),
            permit = semaphore.acquire_owned() => permit
                .map(|permit| ThrottlePermit { _permit: permit })
                // The semaphore is never closed.
                .map_err(|_| Cancelled),
        }
    }
}
