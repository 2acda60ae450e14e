//! A small concurrency-safe key/value store.
//!
//! Used as the per-request scratch store and as the realtime client store.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};

/// A concurrency-safe map guarded by a reader/writer lock.
#[derive(Debug)]
pub struct Store<K, V> {
    data: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for Store<K, V> {
    fn default() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with `data`.
    pub fn from_map(data: HashMap<K, V>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Clone of the value stored under `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Whether `key` is present.
    pub fn has(&self, key: &K) -> bool {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Insert or overwrite `key`, returning the value it replaced.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value)
    }

    /// Insert `key` only while the store holds fewer than `max` entries.
    ///
    /// Overwriting an existing key is always allowed. Returns whether the
    /// value was stored.
    pub fn set_if_less_than_limit(&self, key: K, value: V, max: usize) -> bool {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if data.len() >= max && !data.contains_key(&key) {
            return false;
        }
        data.insert(key, value);
        true
    }

    /// Remove `key`, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Shallow copy of the whole store.
    pub fn get_all(&self) -> HashMap<K, V> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Shallow copy of the stored values.
    pub fn values(&self) -> Vec<V> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Replace the whole store content.
    pub fn reset(&self, data: HashMap<K, V>) {
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = data;
    }

    /// Number of entries.
    pub fn length(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
