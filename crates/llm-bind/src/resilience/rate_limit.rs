//! Token-bucket rate limiter bounding call starts per time window.
//!
//! Tokens refill continuously at `capacity / window` and are capped at
//! `capacity`. Waiters queue on a FIFO-fair async mutex and the head of the
//! queue sleeps, queue held, until the next token lands. The bucket itself
//! sits behind a separate short-held lock so inspection never waits on the
//! queue.

use super::Cancelled;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

// Absorbs float drift so that a refill of exactly one token counts.
const EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, capacity: f64, per_second: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * per_second).min(capacity);
        self.last_refill = now;
    }

    /// Consume a token, or report how long until the next one lands.
    fn take_or_wait(&mut self, per_second: f64) -> Result<(), Duration> {
        if self.take() {
            return Ok(());
        }
        let missing = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(missing / per_second).max(Duration::from_millis(1)))
    }

    fn take(&mut self) -> bool {
        if self.tokens + EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    per_second: f64,
    queue: tokio::sync::Mutex<()>,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// A full bucket of `capacity` tokens that refills over `window`.
    ///
    /// `capacity` is clamped to at least one token and `window` to at least
    /// one millisecond.
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1);
        let window = window.max(Duration::from_millis(1));
        Self {
            capacity,
            per_second: f64::from(capacity) / window.as_secs_f64(),
            queue: tokio::sync::Mutex::new(()),
            bucket: Mutex::new(Bucket {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    /// `max` call starts per minute; `None` when `max` is zero (unlimited).
    pub fn per_minute(max: u32) -> Option<Self> {
        (max > 0).then(|| Self::new(max, Duration::from_secs(60)))
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Wait for a token and consume it.
    ///
    /// Cancellation while waiting consumes nothing.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let _turn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            guard = self.queue.lock() => guard,
        };
        loop {
            let wait = match self.refilled().take_or_wait(self.per_second) {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            trace!("Rate limiter empty, waiting {}ms for a token", wait.as_millis());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Take a token only if one is in the bucket right now. Never waits.
    pub fn try_acquire(&self) -> bool {
        self.refilled().take()
    }

    /// Tokens currently in the bucket (fractional while refilling).
    pub fn available(&self) -> f64 {
        self.refilled().tokens
    }

    fn refilled(&self) -> MutexGuard<'_, Bucket> {
        // Bucket updates cannot panic midway, so a poisoned lock is still consistent.
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        bucket.refill(Instant::now(), f64::from(self.capacity), self.per_second);
        bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn zero_means_unlimited() {
        assert!(RateLimiter::per_minute(0).is_none());
        assert_eq!(RateLimiter::per_minute(30).unwrap().capacity(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn third_acquire_waits_for_refill() {
        let limiter = Arc::new(RateLimiter::new(2, Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        let third = tokio::spawn({
            let limiter = Arc::clone(&limiter);
            async move {
                limiter.acquire(&CancellationToken::new()).await.unwrap();
                Instant::now()
            }
        });
        tokio::task::yield_now().await;
        assert!(!third.is_finished());

        let granted_at = third.await.unwrap();
        // One token per 30s at capacity 2 per minute.
        let waited = granted_at - start;
        assert!(waited >= Duration::from_secs(30), "waited {waited:?}");
        assert!(waited < Duration::from_secs(31), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let limiter = RateLimiter::new(3, Duration::from_secs(3));
        let cancel = CancellationToken::new();
        for _ in 0..3 {
            limiter.acquire(&cancel).await.unwrap();
        }
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((limiter.available() - 3.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_consumes_nothing() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(10)));
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let waiter_cancel = CancellationToken::new();
        let waiter = tokio::spawn({
            let limiter = Arc::clone(&limiter);
            let token = waiter_cancel.clone();
            async move { limiter.acquire(&token).await }
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        waiter_cancel.cancel();
        assert_eq!(waiter.await.unwrap(), Err(Cancelled));

        // Half a token has refilled; the cancelled waiter took none of it.
        let available = limiter.available();
        assert!((available - 0.5).abs() < 1e-6, "available {available}");
    }

    #[tokio::test(start_paused = true)]
    async fn try_acquire_does_not_wait() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_served_in_order() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(1)));
        limiter.acquire(&CancellationToken::new()).await.unwrap();

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let limiter = Arc::clone(&limiter);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                limiter.acquire(&CancellationToken::new()).await.unwrap();
                order.lock().unwrap().push(i);
            }));
            // Let each task queue on the lock before spawning the next.
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn inspection_does_not_wait_behind_a_queued_waiter() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(60)));
        limiter.acquire(&CancellationToken::new()).await.unwrap();

        let waiter = tokio::spawn({
            let limiter = Arc::clone(&limiter);
            async move { limiter.acquire(&CancellationToken::new()).await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let start = Instant::now();
        assert!(limiter.available() < 1e-6);
        assert!(!limiter.try_acquire());
        tokio::time::advance(Duration::from_secs(15)).await;
        let available = limiter.available();
        assert!((available - 0.25).abs() < 1e-6, "available {available}");
        assert_eq!(start.elapsed(), Duration::from_secs(15));

        assert_eq!(waiter.await.unwrap(), Ok(()));
        assert!(limiter.available() < 1e-6);
    }
}
