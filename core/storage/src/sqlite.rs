//! SQLite-backed key-value store.
//!
//! Persists every key in a single table so the cache and the sync queue
//! survive restarts on platforms where a database file is preferred over a
//! directory of small files.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::store::KeyValueStore;
use embaixada_common::{Error, Result};

/// Key-value store using SQLite.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(|e| {
            Error::Storage(format!(
                "Failed to open store database at {}: {}",
                db_path.as_ref().display(),
                e
            ))
        })?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .map_err(sql_err)?;

        info!("SQLite store opened successfully");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| Error::Storage("SQLite connection lock poisoned".to_string()))?;
            f(&conn).map_err(sql_err)
        })
        .await
        .map_err(|e| Error::Storage(format!("SQLite task failed: {}", e)))?
    }
}

fn sql_err(e: rusqlite::Error) -> Error {
    Error::Storage(format!("SQLite error: {}", e))
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                [&key],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        debug!("Upserting key: {}", key);
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv_entries (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map(|_| ())
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM kv_entries WHERE key = ?1", [&key])
                .map(|_| ())
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM kv_entries")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })
        .await
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        let keys = keys.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            for key in &keys {
                tx.execute("DELETE FROM kv_entries WHERE key = ?1", [key])?;
            }
            tx.commit()
        })
        .await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT key FROM kv_entries WHERE substr(key, 1, length(?1)) = ?1")?;
            let keys = stmt
                .query_map([&prefix], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sqlite_set_get_remove() {
        let store = SqliteStore::in_memory().unwrap();

        store.set("a", "1".to_string()).await.unwrap();
        store.set("a", "2".to_string()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("2".to_string()));

        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_prefix_and_remove_many() {
        let store = SqliteStore::in_memory().unwrap();
        store.set("@cache:a", "1".to_string()).await.unwrap();
        store.set("@cache:b", "2".to_string()).await.unwrap();
        store.set("@sync_queue", "[]".to_string()).await.unwrap();

        let mut cache_keys = store.keys_with_prefix("@cache:").await.unwrap();
        cache_keys.sort();
        assert_eq!(cache_keys, vec!["@cache:a", "@cache:b"]);

        store.remove_many(&cache_keys).await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["@sync_queue"]);
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("@sync_queue", "[1]".to_string()).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("@sync_queue").await.unwrap(),
            Some("[1]".to_string())
        );
    }
}
