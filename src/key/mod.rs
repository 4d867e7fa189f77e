//! Bucket naming.
//!
//! A [`Key`] turns a request into the name of the bucket it draws from. Two
//! requests share a bucket exactly when their keys are equal, so the choice
//! of strategy decides who is throttled together:
//!
//! - [`IpKey`] groups by origin address
//! - [`SubjectKey`] groups by authenticated subject as `user:<id>`, and
//!   anonymous callers by address
//! - [`PathKey`] gives each client one bucket per route
//! - [`CompositeKey`], [`FnKey`], [`StaticKey`] and [`GlobalKey`] cover the rest
//!
//! # Example
//!
//! ```ignore
//! use skp_throttle::key::{Key, IpKey, SubjectKey, RequestInfo};
//!
//! let request = RequestInfo::new("10.0.0.1", "/api/items").with_subject("alice");
//!
//! assert_eq!(IpKey::new().extract(&request), "10.0.0.1");
//! assert_eq!(SubjectKey::new().extract(&request), "user:alice");
//! ```

mod composite;
mod extractors;

pub use composite::CompositeKey;
pub use extractors::*;

/// Names the bucket a request is charged against.
///
/// Every request gets a key: `extract` returns a plain `String` and has no
/// error path. It runs on the admission path for every request, so it must
/// be cheap and must not block. A strategy whose request data may be missing
/// falls back to data every request carries. If `extract` still returns an
/// empty string, the limiter charges the request to the [`UNKNOWN_ADDR`]
/// bucket.
pub trait Key<R>: Send + Sync + 'static {
    /// Bucket name for this request.
    fn extract(&self, request: &R) -> String;

    /// Short label used in logs.
    fn name(&self) -> &'static str;
}

impl<R, K: Key<R> + ?Sized> Key<R> for Box<K> {
    fn extract(&self, request: &R) -> String {
        (**self).extract(request)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<R, K: Key<R> + ?Sized> Key<R> for std::sync::Arc<K> {
    fn extract(&self, request: &R) -> String {
        (**self).extract(request)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Charges every request to the single bucket `"global"`.
#[derive(Debug, Clone, Default)]
pub struct GlobalKey;

impl GlobalKey {
    pub fn new() -> Self {
        Self
    }
}

impl<R> Key<R> for GlobalKey {
    fn extract(&self, _request: &R) -> String {
        "global".to_string()
    }

    fn name(&self) -> &'static str {
        "global"
    }
}

/// Bucket name computed by a closure over the request.
///
/// The closure is the whole strategy, so it owns the fallback: when the data
/// it reads is absent it should return some other stable name rather than an
/// empty string. Empty results all land in the shared `unknown` bucket.
///
/// ```ignore
/// let tenant = FnKey::new("tenant", |r: &RequestInfo| {
///     r.path.split('/').nth(1).filter(|s| !s.is_empty()).unwrap_or("root").to_string()
/// });
/// ```
#[derive(Clone)]
pub struct FnKey<F> {
    extractor: F,
    name: &'static str,
}

impl<F> std::fmt::Debug for FnKey<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnKey").field("name", &self.name).finish()
    }
}

impl<F> FnKey<F> {
    /// Wrap `extractor`, logging it as `name`.
    pub fn new(name: &'static str, extractor: F) -> Self {
        Self { extractor, name }
    }
}

impl<R, F> Key<R> for FnKey<F>
where
    F: Fn(&R) -> String + Send + Sync + 'static,
{
    fn extract(&self, request: &R) -> String {
        (self.extractor)(request)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Charges every request to one caller-chosen bucket.
///
/// Mostly useful as a fixed segment of a [`CompositeKey`], for example a
/// tenant or limiter label in front of a per-request key.
#[derive(Debug, Clone)]
pub struct StaticKey {
    bucket: String,
}

impl StaticKey {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self { bucket: bucket.into() }
    }
}

impl<R> Key<R> for StaticKey {
    fn extract(&self, _request: &R) -> String {
        self.bucket.clone()
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_key() {
        let key = GlobalKey::new();
        assert_eq!(Key::<()>::extract(&key, &()), "global");
        assert_eq!(Key::<()>::name(&key), "global");
    }

    #[test]
    fn test_static_key() {
        let key = StaticKey::new("my-key");
        assert_eq!(key.extract(&()), "my-key");
        assert_eq!(Key::<()>::name(&key), "static");
    }

    #[test]
    fn test_fn_key() {
        let key: FnKey<fn(&i32) -> String> = FnKey::new("custom", |n: &i32| format!("n:{}", n));
        assert_eq!(key.extract(&42), "n:42");
        assert_eq!(Key::<i32>::name(&key), "custom");
    }

    #[test]
    fn test_shared_keys_forward() {
        let boxed: Box<dyn Key<()>> = Box::new(StaticKey::new("boxed"));
        assert_eq!(boxed.extract(&()), "boxed");
        assert_eq!(boxed.name(), "static");

        let shared: std::sync::Arc<dyn Key<()>> = std::sync::Arc::new(GlobalKey::new());
        assert_eq!(shared.extract(&()), "global");
    }
}
