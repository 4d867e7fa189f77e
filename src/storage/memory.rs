//! In-memory bucket store with idle reclamation.
//!
//! Buckets live in a `DashMap` so that different keys never contend on one
//! lock. A background task wakes every half idle threshold and drops keys
//! that have not been touched for longer than the threshold.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::bucket::Bucket;
use crate::error::{Result, StoreError};
use crate::storage::{LimiterStore, StoreRegistry};

/// Idle threshold used when a non-positive one is requested.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Shortest interval between reclamation passes.
const MIN_RECLAIM_PERIOD: Duration = Duration::from_millis(1);

/// One stored key.
#[derive(Debug)]
struct Entry {
    bucket: Arc<Bucket>,
    /// Nanoseconds since the store's epoch.
    last_access: AtomicU64,
}

impl Entry {
    fn new(bucket: Arc<Bucket>, now: u64) -> Self {
        Self {
            bucket,
            last_access: AtomicU64::new(now),
        }
    }

    fn touch(&self, now: u64) -> Arc<Bucket> {
        self.last_access.store(now, Ordering::Relaxed);
        self.bucket.clone()
    }
}

/// State shared between the store and its reclamation task.
#[derive(Debug)]
struct Shared {
    // The outer lock is only taken for writing by `clear`, which makes a
    // clear atomic with respect to every other operation.
    entries: RwLock<DashMap<String, Entry>>,
    epoch: Instant,
}

impl Shared {
    fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Remove every entry idle for longer than `idle`. Returns how many were removed.
    fn purge_idle(&self, idle: Duration) -> usize {
        let now = self.now();
        let idle = idle.as_nanos() as u64;
        let mut removed = 0;

        self.entries.read().retain(|_, entry| {
            let keep = now.saturating_sub(entry.last_access.load(Ordering::Relaxed)) <= idle;
            if !keep {
                removed += 1;
            }
            keep
        });

        removed
    }
}

/// In-memory store with idle reclamation.
///
/// Construction registers the store with a [`StoreRegistry`] and starts its
/// reclamation task on the current Tokio runtime. [`LimiterStore::close`]
/// stops the task, drops every bucket and unregisters the store.
///
/// # Example
///
/// ```ignore
/// use skp_throttle::storage::MemoryStore;
/// use std::time::Duration;
///
/// // Keys idle for 10 minutes are dropped, checked every 5 minutes
/// let store = MemoryStore::new(Duration::from_secs(600))?;
/// ```
pub struct MemoryStore {
    shared: Arc<Shared>,
    idle_timeout: Duration,
    closed: AtomicBool,
    shutdown: Arc<Notify>,
    registry: Weak<StoreRegistry>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.len())
            .field("idle_timeout", &self.idle_timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MemoryStore {
    /// Create a store registered with the process-wide registry.
    ///
    /// A zero `idle_timeout` is replaced by [`DEFAULT_IDLE_TIMEOUT`]. Fails if
    /// called outside a Tokio runtime.
    pub fn new(idle_timeout: Duration) -> Result<Arc<Self>> {
        Self::new_in(idle_timeout, StoreRegistry::global())
    }

    /// Create a store registered with the given registry.
    pub fn new_in(idle_timeout: Duration, registry: &Arc<StoreRegistry>) -> Result<Arc<Self>> {
        let idle_timeout = if idle_timeout.is_zero() {
            DEFAULT_IDLE_TIMEOUT
        } else {
            idle_timeout
        };

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StoreError::NoRuntime)?;

        let store = Arc::new(Self {
            shared: Arc::new(Shared {
                entries: RwLock::new(DashMap::new()),
                epoch: Instant::now(),
            }),
            idle_timeout,
            closed: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            registry: Arc::downgrade(registry),
        });

        runtime.spawn(reclaim(
            store.shared.clone(),
            idle_timeout,
            store.shutdown.clone(),
        ));

        let as_dyn: Arc<dyn LimiterStore> = store.clone();
        registry.register(as_dyn);

        debug!(idle_timeout = ?idle_timeout, "Memory store started");
        Ok(store)
    }

    /// Get the idle threshold.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Run one reclamation pass now. Returns how many keys were dropped.
    pub fn purge_idle(&self) -> usize {
        self.shared.purge_idle(self.idle_timeout)
    }

    /// Get the number of keys currently stored.
    pub fn len(&self) -> usize {
        self.shared.entries.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether a key is present without refreshing it.
    pub fn contains(&self, key: &str) -> bool {
        self.shared.entries.read().contains_key(key)
    }

    /// Check whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn id(&self) -> usize {
        self as *const Self as *const () as usize
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

/// Reclamation loop: one pass every half idle threshold until shut down.
async fn reclaim(shared: Arc<Shared>, idle_timeout: Duration, shutdown: Arc<Notify>) {
    let period = (idle_timeout / 2).max(MIN_RECLAIM_PERIOD);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = shared.purge_idle(idle_timeout);
                if removed > 0 {
                    debug!(removed, "Reclaimed idle buckets");
                }
            }
            _ = shutdown.notified() => {
                break;
            }
        }
    }
}

impl LimiterStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Arc<Bucket>> {
        let now = self.shared.now();
        self.shared
            .entries
            .read()
            .get(key)
            .map(|entry| entry.touch(now))
    }

    fn set(&self, key: &str, bucket: Bucket) {
        let now = self.shared.now();
        self.shared
            .entries
            .read()
            .insert(key.to_string(), Entry::new(Arc::new(bucket), now));
    }

    fn delete(&self, key: &str) {
        self.shared.entries.read().remove(key);
    }

    fn clear(&self) {
        self.shared.entries.write().clear();
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.unregister_id(self.id());
        }
        self.shutdown.notify_one();
        self.clear();

        info!("Memory store closed");
        Ok(())
    }

    fn get_or_insert_with(&self, key: &str, make: &dyn Fn() -> Bucket) -> (Arc<Bucket>, bool) {
        if let Some(bucket) = self.get(key) {
            return (bucket, false);
        }

        let now = self.shared.now();
        let entries = self.shared.entries.read();
        let result = match entries.entry(key.to_string()) {
            MapEntry::Occupied(entry) => (entry.get().touch(now), false),
            MapEntry::Vacant(slot) => {
                let bucket = Arc::new(make());
                slot.insert(Entry::new(bucket.clone(), now));
                (bucket, true)
            }
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<StoreRegistry> {
        StoreRegistry::new()
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new_in(Duration::from_secs(60), &registry()).unwrap();

        assert!(store.get("key1").is_none());
        store.set("key1", Bucket::new(10.0, 20));

        let bucket = store.get("key1").unwrap();
        assert_eq!(bucket.capacity(), 20);
        assert_eq!(store.len(), 1);

        store.delete("key1");
        assert!(store.get("key1").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_idle_uses_default() {
        let store = MemoryStore::new_in(Duration::ZERO, &registry()).unwrap();
        assert_eq!(store.idle_timeout(), DEFAULT_IDLE_TIMEOUT);
    }

    #[test]
    fn test_requires_runtime() {
        let err = MemoryStore::new_in(Duration::from_secs(1), &registry()).unwrap_err();
        assert!(err.to_string().contains("runtime"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_insert_creates_once() {
        let store = MemoryStore::new_in(Duration::from_secs(60), &registry()).unwrap();

        let (first, created) = store.get_or_insert_with("k", &|| Bucket::new(1.0, 2));
        assert!(created);
        let (second, created) = store.get_or_insert_with("k", &|| Bucket::new(99.0, 99));
        assert!(!created);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.capacity(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_eviction() {
        let store = MemoryStore::new_in(Duration::from_secs(10), &registry()).unwrap();
        store.set("stale", Bucket::new(1.0, 1));
        store.set("fresh", Bucket::new(1.0, 1));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(store.get("fresh").is_some());

        // Passes run at 5s, 10s and 15s; "stale" has been idle 15s by the last one.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!store.contains("stale"));
        assert!(store.contains("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_purge() {
        let store = MemoryStore::new_in(Duration::from_secs(10), &registry()).unwrap();
        store.set("a", Bucket::new(1.0, 1));

        tokio::time::advance(Duration::from_secs(11)).await;
        store.set("b", Bucket::new(1.0, 1));

        // The background pass may already have dropped "a"; either way it is gone.
        store.purge_idle();
        assert!(!store.contains("a"));
        assert!(store.contains("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        let store = MemoryStore::new_in(Duration::from_secs(60), &registry()).unwrap();
        for i in 0..100 {
            store.set(&format!("key{}", i), Bucket::new(1.0, 1));
        }
        store.clear();
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let registry = registry();
        let store = MemoryStore::new_in(Duration::from_secs(60), &registry).unwrap();
        store.set("key", Bucket::new(1.0, 1));
        assert_eq!(registry.len(), 1);

        store.close().unwrap();
        assert!(store.is_closed());
        assert!(store.is_empty());
        assert!(registry.is_empty());

        store.close().unwrap();
        assert!(store.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_during_concurrent_access() {
        let store = MemoryStore::new_in(Duration::from_millis(20), &registry()).unwrap();

        let mut tasks = Vec::new();
        for t in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..500 {
                    let key = format!("t{}:{}", t, i % 10);
                    let (bucket, _) = store.get_or_insert_with(&key, &|| Bucket::new(100.0, 10));
                    bucket.try_acquire();
                    store.get(&key);
                }
            }));
        }

        store.close().unwrap();
        store.close().unwrap();

        for task in tasks {
            task.await.unwrap();
        }
        assert!(store.is_closed());
    }
}
