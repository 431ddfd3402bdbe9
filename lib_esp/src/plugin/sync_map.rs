//! A mutex-protected map shared between request handlers and stream tasks.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

/// Lookup failure.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("value not found for key: {0}")]
pub struct SyncMapError(pub String);

/// Thread-safe map handing out clones of its values.
#[derive(Debug)]
pub struct SyncMap<K, V> {
    inner: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for SyncMap<K, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SyncMap<K, V>
where
    K: Eq + Hash + Debug,
    V: Clone,
{
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, V>> {
        // Every operation is a single map call, so a poisoned map is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces a value.
    pub fn set(&self, key: K, value: V) {
        self.lock().insert(key, value);
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &K) -> Result<V, SyncMapError> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| SyncMapError(format!("{:?}", key)))
    }

    /// Removes `key` if present.
    pub fn delete(&self, key: &K) {
        self.lock().remove(key);
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let map = SyncMap::new();
        map.set("foo".to_string(), "bar".to_string());
        assert_eq!(map.get(&"foo".to_string()).unwrap(), "bar");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn get_after_delete_fails() {
        let map = SyncMap::new();
        map.set("foo".to_string(), "bar".to_string());
        map.delete(&"foo".to_string());
        let err = map.get(&"foo".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "value not found for key: \"foo\"");
        assert!(map.is_empty());
    }

    #[test]
    fn shared_across_threads() {
        let map = std::sync::Arc::new(SyncMap::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let map = map.clone();
                std::thread::spawn(move || map.set(i, i * 10))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(map.len(), 4);
        assert_eq!(map.get(&3).unwrap(), 30);
    }
}
