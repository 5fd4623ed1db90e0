//! Directory-backed key-value store.

use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::store::KeyValueStore;
use embaixada_common::{Error, Result};

/// Suffix of committed value files.
const VALUE_EXT: &str = ".val";
/// Suffix of in-flight temporary files.
const TMP_EXT: &str = ".tmp";

/// Local filesystem key-value store.
///
/// Each key is stored as one file under the root directory, with the key
/// percent-encoded into the file name. Writes go to a temporary file first
/// and are renamed into place, so a crash never leaves a half-written value.
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Create a new directory store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn to_fs_path(&self, key: &str) -> PathBuf {
        let encoded = utf8_percent_encode(key, NON_ALPHANUMERIC).to_string();
        self.root.join(format!("{}{}", encoded, VALUE_EXT))
    }

    fn from_file_name(name: &str) -> Option<String> {
        let encoded = name.strip_suffix(VALUE_EXT)?;
        percent_decode_str(encoded)
            .decode_utf8()
            .ok()
            .map(|k| k.into_owned())
    }
}

#[async_trait]
impl KeyValueStore for DirectoryStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let fs_path = self.to_fs_path(key);

        match fs::read_to_string(&fs_path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let fs_path = self.to_fs_path(key);
        let tmp_path = self
            .root
            .join(format!("{}{}", Uuid::new_v4().simple(), TMP_EXT));

        fs::write(&tmp_path, value.as_bytes()).await?;
        if let Err(e) = fs::rename(&tmp_path, &fs_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::Io(e));
        }

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let fs_path = self.to_fs_path(key);

        match fs::remove_file(&fs_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut results = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.ends_with(TMP_EXT) {
                continue;
            }
            match Self::from_file_name(name) {
                Some(key) => results.push(key),
                None => warn!("Ignoring foreign file in store directory: {}", name),
            }
        }

        Ok(results)
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }
}
