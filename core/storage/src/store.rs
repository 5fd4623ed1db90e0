//! Key-value store trait definition.

use async_trait::async_trait;

use embaixada_common::Result;

/// Persistent string-key/string-value store.
///
/// All operations are async. Implementations must be safe to share across
/// tasks; no operation is transactional with respect to another, so callers
/// that read-modify-write a value are responsible for their own serialization.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "local", "sqlite").
    fn name(&self) -> &str;

    /// Read the value stored under `key`.
    ///
    /// # Returns
    /// `None` if the key was never written or has been removed.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any previous value.
    ///
    /// # Postconditions
    /// - A subsequent `get(key)` returns `Some(value)`, including after restart
    ///   for durable backends
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// List every stored key, in no particular order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Remove several keys at once. Absent keys are ignored.
    async fn remove_many(&self, keys: &[String]) -> Result<()>;

    /// List stored keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let keys = self.keys().await?;
        Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }
}
