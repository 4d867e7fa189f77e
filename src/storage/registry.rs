//! Registry of live stores for coordinated shutdown.
//!
//! Every store registers itself on construction and unregisters on close.
//! The registry also owns the lazily built default store that limiters fall
//! back to when no store is injected.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::Result;
#[cfg(not(feature = "memory"))]
use crate::error::StoreError;
use crate::storage::{LimiterStore, store_id};

static GLOBAL: LazyLock<Arc<StoreRegistry>> = LazyLock::new(StoreRegistry::new);

/// Tracks every live store and the shared default store.
///
/// Lock order is always `default_store` before `stores`.
pub struct StoreRegistry {
    stores: Mutex<HashMap<usize, Arc<dyn LimiterStore>>>,
    default_store: RwLock<Option<Arc<dyn LimiterStore>>>,
    default_idle: Mutex<Duration>,
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.len())
            .field("has_default", &self.default_store.read().is_some())
            .finish()
    }
}

impl StoreRegistry {
    /// Create an empty registry.
    ///
    /// Most callers want [`StoreRegistry::global`]; private registries are
    /// useful to isolate groups of limiters, for example in tests.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stores: Mutex::new(HashMap::new()),
            default_store: RwLock::new(None),
            default_idle: Mutex::new(Duration::ZERO),
        })
    }

    /// The process-wide registry.
    pub fn global() -> &'static Arc<StoreRegistry> {
        &GLOBAL
    }

    /// Track a store so that [`StoreRegistry::cleanup_all`] closes it.
    ///
    /// Registering the same store twice is a no-op.
    pub fn register(&self, store: Arc<dyn LimiterStore>) {
        let id = store_id(&store);
        self.stores.lock().entry(id).or_insert(store);
    }

    /// Stop tracking a store. Returns `true` if it was tracked.
    pub fn unregister<S: LimiterStore + ?Sized>(&self, store: &Arc<S>) -> bool {
        self.unregister_id(store_id(store))
    }

    pub(crate) fn unregister_id(&self, id: usize) -> bool {
        self.stores.lock().remove(&id).is_some()
    }

    /// Check whether a store is tracked.
    pub fn contains<S: LimiterStore + ?Sized>(&self, store: &Arc<S>) -> bool {
        self.stores.lock().contains_key(&store_id(store))
    }

    /// Number of tracked stores.
    pub fn len(&self) -> usize {
        self.stores.lock().len()
    }

    /// Check if no store is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the idle threshold used the next time the default store is built.
    ///
    /// Zero selects the store's own default.
    pub fn set_default_idle(&self, idle: Duration) {
        *self.default_idle.lock() = idle;
    }

    /// Idle threshold for the default store.
    pub fn default_idle(&self) -> Duration {
        *self.default_idle.lock()
    }

    /// Check whether the default store has been built.
    pub fn has_default(&self) -> bool {
        self.default_store.read().is_some()
    }

    /// Get the default store, building it on first use.
    ///
    /// Concurrent first callers all receive the same instance. After
    /// [`StoreRegistry::cleanup_all`] the next call builds a fresh one.
    pub fn default_store(self: &Arc<Self>) -> Result<Arc<dyn LimiterStore>> {
        if let Some(store) = self.default_store.read().as_ref() {
            return Ok(store.clone());
        }

        let mut slot = self.default_store.write();
        if let Some(store) = slot.as_ref() {
            return Ok(store.clone());
        }

        let store = self.build_default()?;
        debug!("Default store created");
        *slot = Some(store.clone());
        Ok(store)
    }

    #[cfg(feature = "memory")]
    fn build_default(self: &Arc<Self>) -> Result<Arc<dyn LimiterStore>> {
        let store: Arc<dyn LimiterStore> =
            crate::storage::MemoryStore::new_in(self.default_idle(), self)?;
        Ok(store)
    }

    #[cfg(not(feature = "memory"))]
    fn build_default(self: &Arc<Self>) -> Result<Arc<dyn LimiterStore>> {
        Err(StoreError::NoDefault.into())
    }

    /// Close every tracked store and forget the default store.
    ///
    /// Stores are snapshotted under the locks and closed after releasing
    /// them, so a store's own unregistration never deadlocks. Failures are
    /// logged and skipped. Safe to call any number of times.
    pub fn cleanup_all(&self) {
        let snapshot: Vec<Arc<dyn LimiterStore>> = {
            let mut default = self.default_store.write();
            *default = None;
            self.stores.lock().drain().map(|(_, store)| store).collect()
        };

        if snapshot.is_empty() {
            return;
        }

        let total = snapshot.len();
        let mut failed = 0;
        for store in snapshot {
            if let Err(e) = store.close() {
                failed += 1;
                warn!(error = %e, "Failed to close store during cleanup");
            }
        }

        info!(closed = total - failed, failed, "Store cleanup complete");
    }
}

/// Close every store registered with the process-wide registry.
///
/// Intended for graceful shutdown. Limiters built afterwards without an
/// injected store get a fresh default store.
pub fn cleanup_all() {
    StoreRegistry::global().cleanup_all();
}
