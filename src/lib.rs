//! Per-key token bucket admission control.
//!
//! `skp_throttle` decides, for every inbound request, whether it may proceed:
//!
//! - **Per-Key Buckets**: one token bucket per client address, user, route or any custom key
//! - **Dynamic Limits**: resolve the quota per key on every request, adjusting buckets in place
//! - **Two Modes**: reject immediately, or wait a bounded time for a token
//! - **Quota Headers**: `X-RateLimit-*` and `Retry-After` synthesized from live bucket state
//! - **Managed Stores**: idle buckets are reclaimed and every store closes with one call
//! - **Framework Integration**: Axum middleware
//!
//! # Quick Start
//!
//! ```ignore
//! use skp_throttle::{Quota, RateLimiter, key::RequestInfo};
//!
//! #[tokio::main]
//! async fn main() -> skp_throttle::Result<()> {
//!     // 10 requests per second per client address, bursts of 20
//!     let limiter = RateLimiter::builder(Quota::new(10, 20)).build()?;
//!
//!     let decision = limiter.check(&RequestInfo::new("10.0.0.1", "/api")).await;
//!     if decision.is_allowed() {
//!         println!("Allowed, headers: {:?}", decision.headers().to_vec());
//!     } else {
//!         println!("Rejected: {}", decision.rejection().map(|r| r.to_json()).unwrap_or_default());
//!     }
//!
//!     // At shutdown
//!     skp_throttle::cleanup_all();
//!     Ok(())
//! }
//! ```
//!
//! # Limit Normalization
//!
//! | Rate | Burst | Behavior |
//! |------|-------|----------|
//! | <= 0 | 0 | Unlimited, no quota headers |
//! | > 0 | 0 | Every request denied, `Retry-After: 1` |
//! | <= 0 | > 0 | Rate raised to 1 per second |
//! | > 0 | > 0 | Regular token bucket |
//!
//! # Feature Flags
//!
//! - `memory` (default): In-memory store with idle reclamation, used as the default store
//! - `axum`: Axum middleware integration

pub mod bucket;
pub mod config;
pub mod decision;
pub mod error;
pub mod headers;
pub mod key;
pub mod limiter;
pub mod quota;
pub mod storage;

#[cfg(feature = "axum")]
pub mod middleware;

// Re-export main types
pub use bucket::{Bucket, BucketSnapshot};
pub use config::LimiterConfig;
pub use decision::{Decision, Rejection};
pub use error::{ConfigError, Result, StoreError, ThrottleError};
pub use headers::RateLimitHeaders;
pub use key::{CompositeKey, FnKey, GlobalKey, IpKey, Key, PathKey, RequestInfo, StaticKey, SubjectKey};
pub use limiter::{RateLimiter, RateLimiterBuilder};
pub use quota::{EffectiveLimit, Quota};
pub use storage::{LimiterStore, StoreRegistry, cleanup_all};

#[cfg(feature = "memory")]
pub use storage::MemoryStore;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::decision::{Decision, Rejection};
    pub use crate::error::{Result, ThrottleError};
    pub use crate::key::{IpKey, Key, PathKey, RequestInfo, SubjectKey};
    pub use crate::limiter::RateLimiter;
    pub use crate::quota::Quota;
    pub use crate::storage::{LimiterStore, StoreRegistry, cleanup_all};

    #[cfg(feature = "memory")]
    pub use crate::storage::MemoryStore;

    #[cfg(feature = "axum")]
    pub use crate::middleware::{RateLimitLayer, Subject};
}
