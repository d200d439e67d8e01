//! Several limiters sharing one attempt store.
//!
//! The Redis cases need a running server at `SLIDEGATE_TEST_REDIS_URL`
//! (default `redis://127.0.0.1:6379/`) and return early when none answers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use slidegate::{
    AttemptStore, Clock, Limiter, ManualClock, MemoryStore, RedisStore, RedisStoreConfig,
};

/// Advances one nanosecond per reading so concurrent attempts never share a score.
#[derive(Debug, Default)]
struct TickingClock(AtomicI64);

impl Clock for TickingClock {
    fn now_nanos(&self) -> i64 {
        1_000_000_000 + self.0.fetch_add(1, Ordering::SeqCst)
    }
}

async fn redis_store(test: &str) -> Option<RedisStore> {
    let url = std::env::var("SLIDEGATE_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string());
    let config = RedisStoreConfig {
        key_prefix: format!("slidegate-test:{}:{}:", test, std::process::id()),
    };

    let connect = RedisStore::connect_with_config(&url, config);
    match tokio::time::timeout(Duration::from_secs(2), connect).await {
        Ok(Ok(store)) if store.ping().await.is_ok() => Some(store),
        _ => {
            eprintln!("skipping {}: no Redis at {}", test, url);
            None
        }
    }
}

async fn admitted_concurrently(store: Arc<dyn AttemptStore>, attempts: usize) -> usize {
    let clock: Arc<dyn Clock> = Arc::new(TickingClock::default());
    let processes: Vec<_> = (0..4)
        .map(|_| Limiter::with_clock(store.clone(), clock.clone()).rate(5, Duration::from_secs(60)))
        .collect();

    let checks = (0..attempts).map(|i| {
        let window = processes[i % processes.len()].clone();
        async move { window.allowed("10.0.0.1").await }
    });

    join_all(checks)
        .await
        .into_iter()
        .map(|result| result.expect("store failure"))
        .filter(|admission| admission.allowed)
        .count()
}

#[tokio::test]
async fn memory_store_admits_exactly_max_calls_across_processes() {
    let store: Arc<dyn AttemptStore> = Arc::new(MemoryStore::new());
    assert_eq!(admitted_concurrently(store, 20).await, 5);
}

#[tokio::test]
async fn redis_store_admits_exactly_max_calls_across_processes() {
    let Some(store) = redis_store("concurrent").await else {
        return;
    };
    assert_eq!(admitted_concurrently(Arc::new(store), 20).await, 5);
}

#[tokio::test]
async fn redis_store_slides_window() {
    let Some(store) = redis_store("sliding").await else {
        return;
    };
    let clock = Arc::new(ManualClock::new(1_700_000_000_000_000_000));
    let rate = Limiter::with_clock(Arc::new(store), clock.clone()).rate(2, Duration::from_secs(1));

    let mut seen = Vec::new();
    for _ in 0..3 {
        let admission = rate.allowed("8.8.8.8").await.unwrap();
        seen.push((admission.allowed, admission.remaining));
        clock.advance(Duration::from_millis(10));
    }
    assert_eq!(seen, vec![(true, 1), (true, 0), (false, 0)]);

    clock.advance(Duration::from_millis(1100));
    let admission = rate.allowed("8.8.8.8").await.unwrap();
    assert_eq!((admission.allowed, admission.remaining), (true, 1));
}

#[tokio::test]
async fn redis_store_keeps_identifiers_apart() {
    let Some(store) = redis_store("identifiers").await else {
        return;
    };
    let clock = Arc::new(ManualClock::new(1_700_000_000_000_000_000));
    let rate = Limiter::with_clock(Arc::new(store), clock.clone()).rate(1, Duration::from_secs(5));

    assert!(rate.allowed("a").await.unwrap().allowed);
    clock.advance(Duration::from_millis(1));
    assert!(!rate.allowed("a").await.unwrap().allowed);
    assert!(rate.allowed("b").await.unwrap().allowed);
}
