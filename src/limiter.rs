//! The admission engine.
//!
//! A `RateLimiter` is built once per mounted limiter and then shared by every
//! request. Each call to [`RateLimiter::check`] resolves to a [`Decision`]:
//! nothing on the per-request path returns an error.
//!
//! # Example
//!
//! ```ignore
//! use skp_throttle::{Quota, RateLimiter, key::{RequestInfo, SubjectKey}};
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::builder(Quota::new(10, 20))
//!     .key(SubjectKey::new())
//!     .dynamic_limits(|key| {
//!         if key == "user:premium" { Quota::new(100, 200) } else { Quota::new(10, 20) }
//!     })
//!     .wait(Duration::from_millis(500))
//!     .build()?;
//!
//! let decision = limiter.check(&RequestInfo::new("10.0.0.1", "/api")).await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::bucket::{Bucket, UNLIMITED_CAPACITY};
use crate::decision::{Decision, Rejection};
use crate::error::{ConfigError, Result, ThrottleError};
use crate::headers::{RateLimitHeaders, retry_after_secs};
use crate::key::{HasClientAddr, IpKey, Key, UNKNOWN_ADDR};
use crate::quota::{EffectiveLimit, Quota};
use crate::storage::{LimiterStore, StoreRegistry};

/// Wait deadline used when the configured timeout overflows the clock.
const FAR_DEADLINE: Duration = Duration::from_secs(30 * 365 * 86_400);

/// Predicate deciding whether a request bypasses the limiter.
pub type SkipFn<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// Resolver returning the quota for a key.
pub type LimitResolver = Arc<dyn Fn(&str) -> Quota + Send + Sync>;

/// Per-key token bucket admission control.
pub struct RateLimiter<R> {
    quota: Quota,
    key: Arc<dyn Key<R>>,
    skip: Option<SkipFn<R>>,
    dynamic_limits: Option<LimitResolver>,
    wait_timeout: Option<Duration>,
    headers: bool,
    retry_after_header: bool,
    store: Option<Arc<dyn LimiterStore>>,
    registry: Arc<StoreRegistry>,
}

impl<R> Clone for RateLimiter<R> {
    fn clone(&self) -> Self {
        Self {
            quota: self.quota,
            key: self.key.clone(),
            skip: self.skip.clone(),
            dynamic_limits: self.dynamic_limits.clone(),
            wait_timeout: self.wait_timeout,
            headers: self.headers,
            retry_after_header: self.retry_after_header,
            store: self.store.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<R: 'static> std::fmt::Debug for RateLimiter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("quota", &self.quota)
            .field("key", &self.key.name())
            .field("dynamic", &self.dynamic_limits.is_some())
            .field("wait_timeout", &self.wait_timeout)
            .field("headers", &self.headers)
            .field("retry_after_header", &self.retry_after_header)
            .finish()
    }
}

impl<R: HasClientAddr + 'static> RateLimiter<R> {
    /// Start building a limiter keyed by client address.
    pub fn builder(quota: Quota) -> RateLimiterBuilder<R> {
        RateLimiterBuilder::new(quota).key(IpKey::new())
    }
}

impl<R: 'static> RateLimiter<R> {
    /// Decide whether a request may proceed.
    ///
    /// In wait mode this may suspend up to the configured timeout. Dropping
    /// the returned future abandons the wait without consuming a token.
    pub async fn check(&self, request: &R) -> Decision {
        if let Some(skip) = &self.skip {
            if skip(request) {
                trace!("Request skipped by predicate");
                return Decision::allowed(RateLimitHeaders::new());
            }
        }

        let mut key = self.key.extract(request);
        if key.is_empty() {
            key = UNKNOWN_ADDR.to_string();
        }
        let (rate, capacity) = match self.resolve(&key).normalize() {
            EffectiveLimit::Blocked => return self.blocked(&key),
            EffectiveLimit::Unlimited => (f64::INFINITY, UNLIMITED_CAPACITY),
            EffectiveLimit::Limited { rate, capacity } => (rate, capacity),
        };

        let store = match self.store() {
            Ok(store) => store,
            Err(e) => {
                warn!(key = %key, error = %e, "No store available, admitting request");
                return Decision::allowed(RateLimitHeaders::new());
            }
        };

        let bucket = self.bucket_for(store.as_ref(), &key, rate, capacity);
        if bucket.is_unlimited() {
            trace!(key = %key, "Unlimited key admitted");
            return Decision::allowed(RateLimitHeaders::new());
        }

        match self.wait_timeout {
            None => self.admit_now(&key, &bucket),
            Some(timeout) => self.admit_waiting(&key, &bucket, timeout).await,
        }
    }

    /// Drop the bucket for a key. The next request for it starts with a full bucket.
    pub fn reset(&self, key: &str) -> Result<()> {
        self.store()?.delete(key);
        Ok(())
    }

    /// Get the static quota.
    pub fn quota(&self) -> Quota {
        self.quota
    }

    /// Get the wait timeout, or `None` in immediate mode.
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout
    }

    /// Get the key strategy name.
    pub fn key_name(&self) -> &'static str {
        self.key.name()
    }

    fn store(&self) -> Result<Arc<dyn LimiterStore>> {
        match &self.store {
            Some(store) => Ok(store.clone()),
            None => self.registry.default_store(),
        }
    }

    fn resolve(&self, key: &str) -> Quota {
        match &self.dynamic_limits {
            Some(resolver) => resolver(key),
            None => self.quota,
        }
    }

    /// Fetch or create the bucket, applying dynamic limits to an existing one.
    fn bucket_for(
        &self,
        store: &dyn LimiterStore,
        key: &str,
        rate: f64,
        capacity: u32,
    ) -> Arc<Bucket> {
        let (bucket, created) = store.get_or_insert_with(key, &|| Bucket::new(rate, capacity));

        if created {
            trace!(key = %key, rate, capacity, "Bucket created");
        } else if self.dynamic_limits.is_some() && bucket.update_limits(rate, capacity) {
            trace!(key = %key, rate, capacity, "Bucket limits updated");
        }

        bucket
    }

    fn blocked(&self, key: &str) -> Decision {
        let mut headers = RateLimitHeaders::new();
        if self.headers {
            headers = headers.limit(0).remaining(0);
        }
        if self.retry_after_header {
            headers = headers.retry_after(1);
        }

        debug!(key = %key, "Key has zero burst, request denied");
        Decision::denied(headers, Rejection::new(1))
    }

    fn admit_now(&self, key: &str, bucket: &Bucket) -> Decision {
        if bucket.try_acquire() {
            trace!(key = %key, "Request admitted");
            return Decision::allowed(self.quota_headers(bucket));
        }

        match bucket.preview_delay() {
            Some(delay) => {
                let retry_after = retry_after_secs(delay);
                debug!(key = %key, retry_after, "Request denied");
                Decision::denied(self.denial_headers(bucket, retry_after), Rejection::new(retry_after))
            }
            None => self.unobtainable(key),
        }
    }

    async fn admit_waiting(&self, key: &str, bucket: &Bucket, timeout: Duration) -> Decision {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .or_else(|| now.checked_add(FAR_DEADLINE))
            .unwrap_or(now);

        match bucket.acquire_blocking(deadline).await {
            Ok(()) => {
                trace!(key = %key, "Request admitted after wait");
                Decision::allowed(self.quota_headers(bucket))
            }
            Err(ThrottleError::Unobtainable) => self.unobtainable(key),
            Err(_) => match bucket.preview_delay() {
                Some(delay) => {
                    let retry_after = retry_after_secs(delay);
                    debug!(key = %key, retry_after, timeout = ?timeout, "Wait expired, request denied");
                    Decision::denied(
                        self.denial_headers(bucket, retry_after),
                        Rejection::new(retry_after).with_timeout(timeout),
                    )
                }
                None => self.unobtainable(key),
            },
        }
    }

    fn unobtainable(&self, key: &str) -> Decision {
        warn!(key = %key, "Bucket cannot yield a token, request denied");
        Decision::denied(RateLimitHeaders::new(), Rejection::fallback())
    }

    fn quota_headers(&self, bucket: &Bucket) -> RateLimitHeaders {
        if self.headers {
            RateLimitHeaders::from_snapshot(&bucket.snapshot())
        } else {
            RateLimitHeaders::new()
        }
    }

    fn denial_headers(&self, bucket: &Bucket, retry_after: u64) -> RateLimitHeaders {
        let headers = self.quota_headers(bucket);
        if self.retry_after_header {
            headers.retry_after(retry_after)
        } else {
            headers
        }
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder<R> {
    quota: Quota,
    key: Option<Arc<dyn Key<R>>>,
    skip: Option<SkipFn<R>>,
    dynamic_limits: Option<LimitResolver>,
    wait_timeout: Duration,
    headers: bool,
    retry_after_header: bool,
    store: Option<Arc<dyn LimiterStore>>,
    registry: Option<Arc<StoreRegistry>>,
}

impl<R: 'static> std::fmt::Debug for RateLimiterBuilder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterBuilder")
            .field("quota", &self.quota)
            .field("key", &self.key.as_ref().map(|k| k.name()))
            .field("dynamic", &self.dynamic_limits.is_some())
            .field("wait_timeout", &self.wait_timeout)
            .field("headers", &self.headers)
            .field("retry_after_header", &self.retry_after_header)
            .finish()
    }
}

impl<R: 'static> RateLimiterBuilder<R> {
    /// Create a builder with no key strategy.
    ///
    /// Use this for request types without a client address; a strategy must
    /// then be supplied with [`RateLimiterBuilder::key`].
    pub fn new(quota: Quota) -> Self {
        Self {
            quota,
            key: None,
            skip: None,
            dynamic_limits: None,
            wait_timeout: Duration::ZERO,
            headers: true,
            retry_after_header: true,
            store: None,
            registry: None,
        }
    }

    /// Set the key strategy.
    pub fn key<K: Key<R>>(mut self, key: K) -> Self {
        self.key = Some(Arc::new(key));
        self
    }

    /// Bypass the limiter for requests matching the predicate.
    pub fn skip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(predicate));
        self
    }

    /// Resolve the quota per key on every request instead of using the static one.
    ///
    /// Existing buckets are adjusted in place when the resolved limits change.
    pub fn dynamic_limits<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str) -> Quota + Send + Sync + 'static,
    {
        self.dynamic_limits = Some(Arc::new(resolver));
        self
    }

    /// Wait up to `timeout` for a token instead of rejecting immediately.
    ///
    /// Zero selects immediate mode. `Duration::MAX` waits for as long as the
    /// clock can represent.
    pub fn wait(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Do not emit `X-RateLimit-*` headers.
    pub fn without_rate_limit_headers(mut self) -> Self {
        self.headers = false;
        self
    }

    /// Do not emit the `Retry-After` header.
    pub fn without_retry_after_header(mut self) -> Self {
        self.retry_after_header = false;
        self
    }

    /// Enable or disable both header families at once.
    pub fn headers(mut self, quota_headers: bool, retry_after: bool) -> Self {
        self.headers = quota_headers;
        self.retry_after_header = retry_after;
        self
    }

    /// Use a specific store instead of the registry's default store.
    ///
    /// The store is registered so that coordinated cleanup closes it.
    pub fn store<S: LimiterStore>(mut self, store: Arc<S>) -> Self {
        let store: Arc<dyn LimiterStore> = store;
        self.store = Some(store);
        self
    }

    /// Use a specific registry instead of the process-wide one.
    pub fn registry(mut self, registry: Arc<StoreRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the limiter.
    ///
    /// Fails if the static quota is invalid, no key strategy was set, or no
    /// store can be bound.
    pub fn build(self) -> Result<RateLimiter<R>> {
        if !self.quota.rate().is_finite() {
            return Err(ConfigError::InvalidQuota(format!(
                "rate must be finite, got {}",
                self.quota.rate()
            ))
            .into());
        }

        let key = self
            .key
            .ok_or_else(|| ConfigError::MissingRequired("key strategy".to_string()))?;

        let registry = self
            .registry
            .unwrap_or_else(|| StoreRegistry::global().clone());

        match &self.store {
            Some(store) => registry.register(store.clone()),
            None => {
                registry.default_store()?;
            }
        }

        let wait_timeout = (!self.wait_timeout.is_zero()).then_some(self.wait_timeout);

        debug!(
            rate = self.quota.rate(),
            burst = self.quota.burst(),
            key = key.name(),
            wait_timeout = ?wait_timeout,
            dynamic = self.dynamic_limits.is_some(),
            "Rate limiter built"
        );

        Ok(RateLimiter {
            quota: self.quota,
            key,
            skip: self.skip,
            dynamic_limits: self.dynamic_limits,
            wait_timeout,
            headers: self.headers,
            retry_after_header: self.retry_after_header,
            store: self.store,
            registry,
        })
    }
}
