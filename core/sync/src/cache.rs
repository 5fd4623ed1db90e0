//! Durable read cache with per-entry TTL.
//!
//! Entries live in the shared key-value store under the `@cache:` prefix.
//! A metadata record under `@cache:__meta__` tracks which keys were written
//! so expired entries can be swept without listing the whole store.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connectivity::{ConnectivityMonitor, Subscription};
use embaixada_common::{Clock, EpochMillis, Error, Result};
use embaixada_storage::KeyValueStore;

/// Namespace prefix for cache entries.
pub const CACHE_PREFIX: &str = "@cache:";

/// Reserved key of the index record.
pub const CACHE_META_KEY: &str = "@cache:__meta__";

/// TTL used when the caller does not pass one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Stored form of a cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time in epoch milliseconds.
    pub timestamp: EpochMillis,
    /// Lifetime in milliseconds.
    pub ttl: i64,
}

impl<T> CacheEntry<T> {
    /// Whether the entry is past its lifetime at `now`.
    ///
    /// An entry is still fresh at exactly `timestamp + ttl`.
    pub fn is_expired_at(&self, now: EpochMillis) -> bool {
        now.saturating_sub(self.timestamp) > self.ttl
    }
}

/// Index of tracked keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMeta {
    /// Logical keys in first-write order.
    pub keys: Vec<String>,
    /// Approximate byte size of tracked entries.
    pub total_size: u64,
}

/// A cached value together with its freshness.
#[derive(Debug, Clone, PartialEq)]
pub struct Stale<T> {
    pub data: T,
    pub is_stale: bool,
}

/// Summary of the cache index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub tracked_keys: usize,
    pub total_size: u64,
}

/// Key-value cache that keeps serving expired data on request.
pub struct OfflineCache {
    store: Arc<dyn KeyValueStore>,
    monitor: ConnectivityMonitor,
    clock: Arc<dyn Clock>,
    index_lock: Mutex<()>,
}

impl OfflineCache {
    /// Create a cache over `store`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        monitor: ConnectivityMonitor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            monitor,
            clock,
            index_lock: Mutex::new(()),
        }
    }

    /// Store `data` under `key` with `ttl` (or [`DEFAULT_TTL`]).
    ///
    /// # Errors
    /// - `key` names the reserved index record
    /// - Serialization or store failure
    pub async fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Option<Duration>) -> Result<()> {
        let storage_key = storage_key(key)?;
        let ttl = ttl.unwrap_or(DEFAULT_TTL);
        let entry = CacheEntry {
            data,
            timestamp: self.clock.now_millis(),
            ttl: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
        };
        let raw = serde_json::to_string(&entry).map_err(ser_err)?;
        let size = raw.len() as u64;

        let _guard = self.index_lock.lock().await;
        let previous = self.stored_len(&storage_key).await?;
        self.store.set(&storage_key, raw).await?;

        let mut meta = self.read_meta().await?;
        if !meta.keys.iter().any(|k| k == key) {
            meta.keys.push(key.to_string());
        }
        meta.total_size = meta.total_size.saturating_sub(previous).saturating_add(size);
        self.write_meta(&meta).await?;

        debug!("Cached {} ({} bytes, ttl {:?})", key, size, ttl);
        Ok(())
    }

    /// Read a fresh value.
    ///
    /// An expired entry is deleted and reported as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(entry) = self.read_entry(key).await? else {
            return Ok(None);
        };

        if entry.is_expired_at(self.clock.now_millis()) {
            debug!("Cache entry {} expired", key);
            self.remove_if_expired(key).await?;
            return Ok(None);
        }

        serde_json::from_value(entry.data).map(Some).map_err(ser_err)
    }

    /// Read a value whether or not it has expired.
    pub async fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Stale<T>>> {
        let Some(entry) = self.read_entry(key).await? else {
            return Ok(None);
        };

        let is_stale = entry.is_expired_at(self.clock.now_millis());
        let data = serde_json::from_value(entry.data).map_err(ser_err)?;
        Ok(Some(Stale { data, is_stale }))
    }

    /// Delete one entry and drop it from the index.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let storage_key = storage_key(key)?;
        let _guard = self.index_lock.lock().await;
        self.remove_locked(key, &storage_key).await
    }

    /// Delete `key` only if it is still expired once the index is held.
    async fn remove_if_expired(&self, key: &str) -> Result<()> {
        let storage_key = storage_key(key)?;
        let _guard = self.index_lock.lock().await;

        let expired = match self.store.get(&storage_key).await? {
            Some(raw) => serde_json::from_str::<CacheEntry<Value>>(&raw)
                .map(|entry| entry.is_expired_at(self.clock.now_millis()))
                .unwrap_or(true),
            None => false,
        };
        if expired {
            self.remove_locked(key, &storage_key).await?;
        }
        Ok(())
    }

    /// Caller holds `index_lock`.
    async fn remove_locked(&self, key: &str, storage_key: &str) -> Result<()> {
        let previous = self.stored_len(storage_key).await?;
        self.store.remove(storage_key).await?;

        let mut meta = self.read_meta().await?;
        let before = meta.keys.len();
        meta.keys.retain(|k| k != key);
        if meta.keys.len() != before || previous > 0 {
            meta.total_size = meta.total_size.saturating_sub(previous);
            self.write_meta(&meta).await?;
        }
        Ok(())
    }

    async fn stored_len(&self, storage_key: &str) -> Result<u64> {
        Ok(self
            .store
            .get(storage_key)
            .await?
            .map_or(0, |raw| raw.len() as u64))
    }

    /// Delete every cache entry and the index.
    ///
    /// Keys outside the cache prefix are left alone.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let keys = self.store.keys_with_prefix(CACHE_PREFIX).await?;
        let count = keys.len();
        self.store.remove_many(&keys).await?;
        debug!("Cleared {} cache records", count);
        Ok(())
    }

    /// Whether the network is usable right now.
    pub async fn is_online(&self) -> bool {
        self.monitor.is_online().await
    }

    /// Subscribe to online/offline flips.
    pub fn on_connectivity_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.monitor.on_change(callback)
    }

    /// Sweep expired entries.
    ///
    /// Returns how many tracked keys were dropped: entries that had already
    /// disappeared, expired entries, and entries that no longer parse. The
    /// index is rewritten to the survivors with a recomputed size.
    pub async fn evict_expired(&self) -> Result<usize> {
        let _guard = self.index_lock.lock().await;
        let meta = self.read_meta().await?;
        let now = self.clock.now_millis();

        let mut survivors = CacheMeta::default();
        let mut evicted = 0;

        for key in meta.keys {
            let storage_key = storage_key(&key)?;
            let Some(raw) = self.store.get(&storage_key).await? else {
                evicted += 1;
                continue;
            };

            match serde_json::from_str::<CacheEntry<Value>>(&raw) {
                Ok(entry) if !entry.is_expired_at(now) => {
                    survivors.total_size += raw.len() as u64;
                    survivors.keys.push(key);
                }
                Ok(_) => {
                    self.store.remove(&storage_key).await?;
                    evicted += 1;
                }
                Err(e) => {
                    warn!("Dropping unreadable cache entry {}: {}", key, e);
                    self.store.remove(&storage_key).await?;
                    evicted += 1;
                }
            }
        }

        self.write_meta(&survivors).await?;
        if evicted > 0 {
            debug!("Evicted {} cache entries", evicted);
        }
        Ok(evicted)
    }

    /// Tracked key count and approximate size.
    pub async fn stats(&self) -> Result<CacheStats> {
        let meta = self.read_meta().await?;
        Ok(CacheStats {
            tracked_keys: meta.keys.len(),
            total_size: meta.total_size,
        })
    }

    async fn read_entry(&self, key: &str) -> Result<Option<CacheEntry<Value>>> {
        let storage_key = storage_key(key)?;
        match self.store.get(&storage_key).await? {
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(ser_err),
            None => Ok(None),
        }
    }

    async fn read_meta(&self) -> Result<CacheMeta> {
        match self.store.get(CACHE_META_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Cache index unreadable, rebuilding: {}", e);
                CacheMeta::default()
            })),
            None => Ok(CacheMeta::default()),
        }
    }

    async fn write_meta(&self, meta: &CacheMeta) -> Result<()> {
        let raw = serde_json::to_string(meta).map_err(ser_err)?;
        self.store.set(CACHE_META_KEY, raw).await
    }
}

fn storage_key(key: &str) -> Result<String> {
    let storage_key = format!("{}{}", CACHE_PREFIX, key);
    if storage_key == CACHE_META_KEY {
        return Err(Error::InvalidInput(format!(
            "'{}' is reserved for the cache index",
            key
        )));
    }
    Ok(storage_key)
}

fn ser_err(e: serde_json::Error) -> Error {
    Error::Serialization(e.to_string())
}
