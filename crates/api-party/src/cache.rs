//! Shared payload cache for reactive bindings.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

/// Projected payloads keyed by cache key.
///
/// Bindings hydrate from this cache on creation and write successful results back.
/// Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct PayloadCache {
    entries: Arc<DashMap<String, Value>>,
}

impl PayloadCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The payload stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Stores a payload, returning the previous one.
    pub fn insert(&self, key: impl Into<String>, payload: Value) -> Option<Value> {
        self.entries.insert(key.into(), payload)
    }

    /// Removes a payload.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(|(_, payload)| payload)
    }

    /// Returns `true` if a payload is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of stored payloads.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every payload.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
