//! Factory binding rate windows to a store and a clock.

use std::sync::Arc;
use std::time::Duration;

use super::clock::{Clock, SystemClock};
use super::policy::RatePolicy;
use super::window::RateWindow;
use crate::http::AdmissionLayer;
use crate::store::AttemptStore;

/// Entry point for building rate windows.
///
/// A limiter cannot limit anything by itself; call [`Limiter::rate`] for a
/// window with a concrete policy, or [`Limiter::limit_layer`] to guard an
/// HTTP route. Cloning is cheap and shares the store and clock.
#[derive(Debug, Clone)]
pub struct Limiter {
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
}

impl Limiter {
    /// Create a limiter on `store` using the system clock.
    pub fn new(store: Arc<dyn AttemptStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock::new()))
    }

    /// Create a limiter on `store` reading time from `clock`.
    pub fn with_clock(store: Arc<dyn AttemptStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Build a window admitting `max_calls` attempts per trailing `window`.
    pub fn rate(&self, max_calls: u64, window: Duration) -> RateWindow {
        RateWindow::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            RatePolicy::new(max_calls, window),
        )
    }

    /// Build an HTTP admission layer with its own window.
    ///
    /// Every request passing through the returned layer (and its clones)
    /// shares that one policy, keyed per client address and path.
    pub fn limit_layer(&self, max_calls: u64, window: Duration) -> AdmissionLayer {
        AdmissionLayer::new(self.rate(max_calls, window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_windows_share_store_and_clock() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        let limiter = Limiter::with_clock(store.clone(), Arc::new(clock.clone()));

        let strict = limiter.rate(1, Duration::from_secs(1));
        let loose = limiter.rate(10, Duration::from_secs(1));

        assert!(strict.allowed("shared").await.unwrap().allowed);
        // Same identifier, same store: the loose window sees the strict one's attempt.
        assert_eq!(loose.allowed("shared").await.unwrap().remaining, 8);
        assert_eq!(store.members("shared").len(), 2);

        clock.advance(Duration::from_millis(5));
        assert!(!strict.allowed("shared").await.unwrap().allowed);
    }

    #[test]
    fn test_rate_carries_policy() {
        let limiter = Limiter::new(Arc::new(MemoryStore::new()));
        let window = limiter.rate(7, Duration::from_secs(30));

        assert_eq!(window.policy().max_calls(), 7);
        assert_eq!(window.policy().window(), Duration::from_secs(30));
    }
}
