//! Retries, timeouts, fallback, validation and admission control.
//!
//! - [`ResiliencePolicy`] holds the knobs; [`ResilienceSettings`] is its
//!   serializable numeric part.
//! - [`ResilienceExecutor`] runs one call: admission, the retry loop around
//!   the tool round-trip loop, then the fallback.
//! - [`RateLimiter`] and [`ConcurrencyThrottle`] are the two admission gates,
//!   combined per instance in [`Admission`].

pub mod executor;
pub mod policy;
pub mod rate_limit;
pub mod rounds;
pub mod throttle;

pub use executor::{Completed, Decoder, ResilienceExecutor};
pub use policy::{ResiliencePolicy, ResilienceSettings, ResultValidator, Validation};
pub use rate_limit::RateLimiter;
pub use throttle::{ConcurrencyThrottle, ThrottlePermit};

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// The caller cancelled while waiting at a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cancelled")]
pub struct Cancelled;

/// Per-instance admission control: a rate-limit token, then a concurrency
/// slot.
#[derive(Debug, Default)]
pub struct Admission {
    limiter: Option<RateLimiter>,
    throttle: Option<ConcurrencyThrottle>,
}

/// Proof of admission. Holds the concurrency slot, if any, until dropped.
#[derive(Debug)]
pub struct AdmissionPermit {
    _slot: Option<ThrottlePermit>,
}

impl Admission {
    pub fn new(limiter: Option<RateLimiter>, throttle: Option<ConcurrencyThrottle>) -> Self {
        Self { limiter, throttle }
    }

    pub fn from_policy(policy: &ResiliencePolicy) -> Self {
        Self::new(
            RateLimiter::per_minute(policy.max_requests_per_minute),
            ConcurrencyThrottle::for_limit(policy.max_concurrent_requests),
        )
    }

    pub fn limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    pub fn throttle(&self) -> Option<&ConcurrencyThrottle> {
        self.throttle.as_ref()
    }

    pub async fn admit(&self, cancel: &CancellationToken) -> Result<AdmissionPermit, Cancelled> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire(cancel).await?;
            trace!("Rate-limit token acquired");
        }
        let slot = match &self.throttle {
            Some(throttle) => Some(throttle.acquire(cancel).await?),
            None => None,
        };
        Ok(AdmissionPermit { _slot: slot })
    }
}
