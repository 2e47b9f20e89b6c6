//! Concurrent key-value store shared by a loader and its readers.
//!
//! Values are type-erased so a single cache can hold whatever shape the
//! process step produces. Typed reads downcast and treat a shape mismatch
//! as a miss.
//!
//! # Consistency
//!
//! Every `store` is an independent upsert. There is no cross-key atomicity:
//! while a refresh cycle is in flight a reader may observe some keys of the
//! batch updated and others not yet.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

/// A cached value of any shape.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Sharded concurrent map from string key to [`CachedValue`].
///
/// Stores to different keys do not contend with each other beyond their
/// shard, and reads never wait for a refresh cycle to finish.
#[derive(Default)]
pub struct ConcurrentCache {
    entries: DashMap<String, CachedValue>,
}

impl ConcurrentCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a value under `key`.
    pub fn store<V>(&self, key: impl Into<String>, value: V)
    where
        V: Any + Send + Sync,
    {
        self.entries.insert(key.into(), Arc::new(value));
    }

    /// Upsert an already shared value under `key`.
    pub fn store_shared(&self, key: impl Into<String>, value: CachedValue) {
        self.entries.insert(key.into(), value);
    }

    /// Load the value stored under `key`.
    pub fn load(&self, key: &str) -> Option<CachedValue> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Load the value stored under `key` as a `T`.
    ///
    /// Returns `None` both when the key is absent and when the stored value
    /// has a different type.
    pub fn load_as<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.load(key)?.downcast::<T>().ok()
    }

    /// Remove the value stored under `key`, returning it.
    ///
    /// Loaders never call this; it exists for process hooks that apply
    /// source-side deletions.
    pub fn remove(&self, key: &str) -> Option<CachedValue> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the keys currently stored, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl fmt::Debug for ConcurrentCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}
