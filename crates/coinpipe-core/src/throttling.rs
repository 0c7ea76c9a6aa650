use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Client-side request budget for one upstream.
///
/// A quota of zero disables throttling.
#[derive(Clone)]
pub struct RequestThrottle {
    limiter: Option<Arc<DirectRateLimiter>>,
    per_minute: u32,
}

impl RequestThrottle {
    pub fn per_minute(requests: u32) -> Self {
        let limiter = NonZeroU32::new(requests)
            .map(|burst| Arc::new(RateLimiter::direct(Quota::per_minute(burst))));
        Self {
            limiter,
            per_minute: requests,
        }
    }

    pub fn unlimited() -> Self {
        Self::per_minute(0)
    }

    pub const fn quota_per_minute(&self) -> u32 {
        self.per_minute
    }

    /// Returns immediately when budget is available, otherwise waits for it.
    pub async fn ready(&self) {
        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                tracing::debug!(quota_per_minute = self.per_minute, "waiting for request budget");
                limiter.until_ready().await;
            }
        }
    }
}

impl std::fmt::Debug for RequestThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestThrottle")
            .field("per_minute", &self.per_minute)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_within_quota_does_not_wait() {
        let throttle = RequestThrottle::per_minute(3);
        let started = std::time::Instant::now();
        for _ in 0..3 {
            throttle.ready().await;
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[tokio::test]
    async fn zero_quota_is_unlimited() {
        let throttle = RequestThrottle::unlimited();
        for _ in 0..100 {
            throttle.ready().await;
        }
        assert_eq!(throttle.quota_per_minute(), 0);
    }
}
