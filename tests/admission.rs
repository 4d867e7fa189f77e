//! End-to-end admission tests against the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use skp_throttle::key::SubjectKey;
use skp_throttle::prelude::*;
use tokio::time::Instant;

fn limiter_with_store(quota: Quota) -> (skp_throttle::RateLimiterBuilder<RequestInfo>, Arc<MemoryStore>) {
    let registry = StoreRegistry::new();
    let store = MemoryStore::new_in(Duration::from_secs(300), &registry).unwrap();
    let builder = RateLimiter::builder(quota).registry(registry).store(store.clone());
    (builder, store)
}

#[tokio::test(start_paused = true)]
async fn test_burst_absorbed_then_denied() {
    let (builder, _store) = limiter_with_store(Quota::new(1, 2));
    let limiter = builder.build().unwrap();
    let request = RequestInfo::new("192.0.2.10", "/");

    assert!(limiter.check(&request).await.is_allowed());
    assert!(limiter.check(&request).await.is_allowed());

    let denied = limiter.check(&request).await;
    assert!(denied.is_denied());
    assert!(denied.headers().get_retry_after().unwrap() >= 1);
    assert_eq!(
        denied.rejection().unwrap().to_json(),
        r#"{"error":"rate limit exceeded","retry_after":1}"#
    );
}

#[tokio::test(start_paused = true)]
async fn test_unlimited_never_emits_headers() {
    let (builder, _store) = limiter_with_store(Quota::new(0, 0));
    let limiter = builder.build().unwrap();
    let request = RequestInfo::new("192.0.2.10", "/");

    for _ in 0..1000 {
        let decision = limiter.check(&request).await;
        assert!(decision.is_allowed());
        assert!(decision.headers().to_vec().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_wait_mode_admits_within_deadline() {
    let (builder, _store) = limiter_with_store(Quota::new(1, 1));
    let limiter = builder.wait(Duration::from_secs(2)).build().unwrap();
    let request = RequestInfo::new("192.0.2.10", "/");

    let started = Instant::now();
    assert!(limiter.check(&request).await.is_allowed());
    assert_eq!(started.elapsed(), Duration::ZERO);

    let decision = limiter.check(&request).await;
    assert!(decision.is_allowed());
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(900));
    assert!(waited < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_dynamic_limits_per_subject() {
    let (builder, _store) = limiter_with_store(Quota::new(10, 20));
    let limiter = builder
        .key(SubjectKey::new())
        .dynamic_limits(|key| match key {
            "user:premium" => Quota::new(100, 200),
            _ => Quota::new(10, 20),
        })
        .build()
        .unwrap();

    let premium = RequestInfo::new("192.0.2.10", "/").with_subject("premium");
    for addr in ["192.0.2.11", "192.0.2.12"] {
        let decision = limiter.check(&premium).await;
        assert_eq!(decision.headers().get_limit(), Some(100));

        let anonymous = RequestInfo::new(addr, "/");
        assert_eq!(limiter.check(&anonymous).await.headers().get_limit(), Some(10));
    }
}

#[tokio::test(start_paused = true)]
async fn test_zero_burst_always_denied() {
    let (builder, store) = limiter_with_store(Quota::new(10, 0));
    let limiter = builder.build().unwrap();
    let request = RequestInfo::new("192.0.2.10", "/");

    for _ in 0..5 {
        let decision = limiter.check(&request).await;
        assert!(decision.is_denied());

        let headers = decision.headers().to_vec();
        assert!(headers.contains(&("X-RateLimit-Limit", "0".to_string())));
        assert!(headers.contains(&("X-RateLimit-Remaining", "0".to_string())));
        assert!(headers.contains(&("Retry-After", "1".to_string())));
        assert_eq!(headers.len(), 3);
    }
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_hint_ignores_wait_timeout() {
    // A 4 second refill, checked with a 1 second and a 3 second wait budget
    for wait in [Duration::from_secs(1), Duration::from_secs(3)] {
        let (builder, _store) = limiter_with_store(Quota::new(0.25, 1));
        let limiter = builder.wait(wait).build().unwrap();
        let request = RequestInfo::new("192.0.2.10", "/");

        limiter.check(&request).await;
        let denied = limiter.check(&request).await;

        let rejection = denied.rejection().unwrap();
        assert_eq!(rejection.retry_after, Some(4));
        assert_eq!(rejection.timeout, Some(wait.as_secs_f64()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_headers_track_refill() {
    let (builder, _store) = limiter_with_store(Quota::new(2, 4));
    let limiter = builder.build().unwrap();
    let request = RequestInfo::new("192.0.2.10", "/");

    for _ in 0..4 {
        limiter.check(&request).await;
    }

    tokio::time::advance(Duration::from_millis(1500)).await;
    let decision = limiter.check(&request).await;
    assert!(decision.is_allowed());
    // 3 tokens refilled, 1 consumed
    assert_eq!(decision.headers().get_remaining(), Some(2));
    assert_eq!(decision.headers().get_limit(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_idle_key_starts_fresh() {
    let registry = StoreRegistry::new();
    let store = MemoryStore::new_in(Duration::from_secs(10), &registry).unwrap();
    let limiter = RateLimiter::builder(Quota::new(0.01, 1))
        .registry(registry)
        .store(store.clone())
        .build()
        .unwrap();
    let request = RequestInfo::new("192.0.2.10", "/");

    assert!(limiter.check(&request).await.is_allowed());
    assert!(limiter.check(&request).await.is_denied());

    tokio::time::sleep(Duration::from_secs(16)).await;
    assert!(!store.contains("192.0.2.10"));

    // A recreated bucket is full again
    assert!(limiter.check(&request).await.is_allowed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_checks_share_one_bucket() {
    let (builder, store) = limiter_with_store(Quota::new(1, 10));
    let limiter = Arc::new(builder.build().unwrap());
    let allowed = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..64 {
        let limiter = limiter.clone();
        let allowed = allowed.clone();
        tasks.push(tokio::spawn(async move {
            let request = RequestInfo::new("192.0.2.10", "/");
            if limiter.check(&request).await.is_allowed() {
                allowed.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(store.len(), 1);
    let allowed = allowed.load(Ordering::SeqCst);
    assert!((10..=11).contains(&allowed), "allowed {}", allowed);
}
