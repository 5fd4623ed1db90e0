//! In-memory key-value store for testing.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use embaixada_common::{Error, Result};
use crate::store::KeyValueStore;

/// In-memory key-value store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same underlying map, which lets a
/// test hand one clone to the component under test and inspect the other.
#[derive(Clone, Default)]
pub struct MemoryStore {
    storage: Arc<RwLock<BTreeMap<String, String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `Error::Storage`.
    ///
    /// Reads keep working, which is how a full disk usually behaves.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, String>>> {
        self.storage
            .read()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, String>>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("Simulated write failure".to_string()));
        }
        self.storage
            .write()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.write()?.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.write()?.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        let mut storage = self.write()?;
        for key in keys {
            storage.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get() {
        let store = MemoryStore::new();
        store.set("a", "1".to_string()).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let store = MemoryStore::new();
        store.set("a", "1".to_string()).await.unwrap();
        store.set("a", "2".to_string()).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some("2".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_absent_is_ok() {
        let store = MemoryStore::new();
        store.remove("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_prefix_listing_and_remove_many() {
        let store = MemoryStore::new();
        store.set("@cache:a", "1".to_string()).await.unwrap();
        store.set("@cache:b", "2".to_string()).await.unwrap();
        store.set("@sync_queue", "[]".to_string()).await.unwrap();

        let cache_keys = store.keys_with_prefix("@cache:").await.unwrap();
        assert_eq!(cache_keys.len(), 2);

        store.remove_many(&cache_keys).await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["@sync_queue".to_string()]);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("k", "v".to_string()).await.unwrap();

        assert_eq!(other.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_simulated_write_failure() {
        let store = MemoryStore::new();
        store.set("k", "v".to_string()).await.unwrap();
        store.set_fail_writes(true);

        assert!(matches!(
            store.set("k", "w".to_string()).await,
            Err(Error::Storage(_))
        ));
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }
}
