//! In-process pacing for portal requests.

use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// **Portal Rate Limiter**
///
/// Enforces a minimum spacing between requests against the disclosure
/// portal (default 500 ms). The artifact downloader talks to a different
/// host policy and is deliberately not routed through this limiter.
pub struct PortalRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl PortalRateLimiter {
    /// Limiter admitting one request per `min_interval`.
    pub fn new(min_interval: Duration) -> Self {
        let interval = min_interval.max(Duration::from_millis(1));
        let quota = Quota::with_period(interval).expect("interval is non-zero");
        Self {
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Wait until the next request is allowed to go out.
    pub async fn wait_for_permit(&self) {
        self.limiter.until_ready().await;
    }
}

impl std::fmt::Debug for PortalRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalRateLimiter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn permits_are_spaced_by_the_interval() {
        let limiter = PortalRateLimiter::new(Duration::from_millis(40));

        let start = Instant::now();
        limiter.wait_for_permit().await;
        limiter.wait_for_permit().await;
        limiter.wait_for_permit().await;

        // First permit is immediate, the next two wait one interval each.
        assert!(start.elapsed() >= Duration::from_millis(70));
    }
}
