//! In-memory key-value store for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::KeyValueStore;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, Vec<u8>>,
    failing_keys: BTreeSet<String>,
    closed: bool,
}

/// An in-memory key-value store.
///
/// Clones share the same underlying map, which makes this store suitable for:
/// - Unit tests
/// - Integration tests
/// - Simulating a process restart (drop the engine, keep a clone, reload)
///
/// Writes to individual keys can be made to fail with
/// [`InMemoryStore::fail_writes_to`] to exercise partial persistence.
///
/// # Example
///
/// ```rust
/// use heartsync_storage::{KeyValueStore, InMemoryStore};
///
/// let store = InMemoryStore::new();
/// let restarted = store.clone();
/// store.set("token", &[1, 2, 3]).unwrap();
/// assert_eq!(restarted.get("token").unwrap(), Some(vec![1, 2, 3]));
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing entries.
    ///
    /// Useful for testing recovery from corrupt blobs.
    #[must_use]
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<u8>)>,
        K: Into<String>,
    {
        let store = Self::new();
        {
            let mut inner = store.inner.write();
            for (key, value) in entries {
                inner.entries.insert(key.into(), value);
            }
        }
        store
    }

    /// Makes every subsequent `set` on `key` fail with an I/O error.
    pub fn fail_writes_to(&self, key: impl Into<String>) {
        self.inner.write().failing_keys.insert(key.into());
    }

    /// Clears all injected write failures.
    pub fn clear_failures(&self) {
        self.inner.write().failing_keys.clear();
    }

    /// Closes the store; every later operation returns [`StorageError::Closed`].
    pub fn close(&self) {
        self.inner.write().closed = true;
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.inner.write().entries.clear();
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        Ok(inner.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        if inner.failing_keys.contains(key) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected write failure for {key}"),
            )));
        }
        inner.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        inner.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        Ok(inner.entries.keys().cloned().collect())
    }
}
