//! Bucket stores and their shared lifecycle registry.
//!
//! This module defines the `LimiterStore` trait that owns every bucket a
//! limiter uses, the in-memory implementation with idle reclamation, and the
//! `StoreRegistry` that tracks live stores for coordinated shutdown.

#[cfg(feature = "memory")]
mod memory;
mod registry;

#[cfg(feature = "memory")]
pub use memory::{DEFAULT_IDLE_TIMEOUT, MemoryStore};
pub use registry::{StoreRegistry, cleanup_all};

use std::sync::Arc;

use crate::bucket::Bucket;
use crate::error::Result;

/// Store trait for per-key buckets.
///
/// A store exclusively owns its buckets. Callers receive a shared handle for
/// the duration of one admission check and must not keep it across calls, so
/// that eviction and in-place limit updates stay safe.
///
/// Implementations must be thread-safe and tolerate unbounded concurrent
/// callers. None of these operations is expected to fail during normal use.
///
/// # Required Operations
///
/// - `get`: Retrieve a bucket and refresh its recency
/// - `set`: Store a bucket under a key, replacing any previous one
/// - `delete`: Remove a key
/// - `clear`: Remove every key at once
/// - `close`: Stop background activity; idempotent
pub trait LimiterStore: Send + Sync + 'static {
    /// Get the bucket for a key, refreshing its last-access time on a hit.
    fn get(&self, key: &str) -> Option<Arc<Bucket>>;

    /// Store a bucket for a key and record the access time.
    fn set(&self, key: &str, bucket: Bucket);

    /// Remove a key. Succeeds even if the key didn't exist.
    fn delete(&self, key: &str);

    /// Remove all keys. No reader observes a partially cleared store.
    fn clear(&self);

    /// Stop background activity and release resources.
    ///
    /// Calling this more than once is a no-op.
    fn close(&self) -> Result<()>;

    /// Get the bucket for a key, creating it with `make` if absent.
    ///
    /// Returns the bucket and whether it was created by this call. The
    /// default implementation is a plain `get` followed by `set`; stores
    /// shared across threads should override it so that concurrent callers
    /// for one key always agree on a single bucket.
    fn get_or_insert_with(&self, key: &str, make: &dyn Fn() -> Bucket) -> (Arc<Bucket>, bool) {
        if let Some(bucket) = self.get(key) {
            return (bucket, false);
        }
        self.set(key, make());
        match self.get(key) {
            Some(bucket) => (bucket, true),
            None => (Arc::new(make()), true),
        }
    }
}

/// Identity of a store instance, used as its registry key.
pub(crate) fn store_id<S: ?Sized>(store: &Arc<S>) -> usize {
    Arc::as_ptr(store) as *const () as usize
}
