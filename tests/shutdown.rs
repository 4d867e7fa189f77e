//! Coordinated shutdown through the process-wide registry.
//!
//! Kept to a single test because it owns the global registry.

use std::time::Duration;

use skp_throttle::prelude::*;

#[tokio::test(start_paused = true)]
async fn test_cleanup_all_lifecycle() {
    // Safe with nothing registered
    cleanup_all();
    cleanup_all();

    let global = StoreRegistry::global();
    let custom = MemoryStore::new(Duration::from_secs(60)).unwrap();
    let limiter = RateLimiter::builder(Quota::new(1, 1)).build().unwrap();
    let with_custom = RateLimiter::builder(Quota::new(1, 1))
        .store(custom.clone())
        .build()
        .unwrap();

    let request = RequestInfo::new("192.0.2.10", "/");
    assert!(limiter.check(&request).await.is_allowed());
    assert!(limiter.check(&request).await.is_denied());
    assert!(with_custom.check(&request).await.is_allowed());

    assert!(global.has_default());
    assert!(global.contains(&custom));
    assert_eq!(global.len(), 2);

    cleanup_all();

    assert!(custom.is_closed());
    assert!(custom.is_empty());
    assert!(global.is_empty());
    assert!(!global.has_default());

    // The next check builds a fresh default store with a full bucket
    assert!(limiter.check(&request).await.is_allowed());
    assert!(global.has_default());
    assert_eq!(global.len(), 1);

    cleanup_all();
    cleanup_all();
    assert!(global.is_empty());
}
