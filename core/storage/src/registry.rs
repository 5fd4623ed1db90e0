//! Store registry for resolving a backend from configuration.

use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::store::KeyValueStore;
use embaixada_common::{Error, Result};

/// Factory function type for creating stores.
pub type StoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn KeyValueStore>> + Send + Sync>;

/// Registry for key-value store factories.
///
/// Allows the application configuration to name a backend ("memory",
/// "local", "sqlite") and pass backend-specific options as JSON.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a store factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Store backend '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a store by backend name and options.
    ///
    /// # Errors
    /// - Backend not registered
    /// - Options invalid for the backend
    pub fn resolve(&self, name: &str, options: Value) -> Result<Arc<dyn KeyValueStore>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::NotFound(format!("Store backend '{}' is not registered", name))
        })?;
        factory(options)
    }

    /// Get list of registered backend names.
    pub fn backends(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Check if a backend is registered.
    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn path_option(options: &Value, field: &str, backend: &str) -> Result<PathBuf> {
    options
        .get(field)
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .ok_or_else(|| {
            Error::InvalidInput(format!("{} store requires '{}' option", backend, field))
        })
}

/// Create a registry with the built-in backends.
pub fn create_default_registry() -> StoreRegistry {
    let mut factories: HashMap<String, StoreFactory> = HashMap::new();

    // In-process only; contents are lost on exit
    factories.insert(
        "memory".to_string(),
        Box::new(|_options| Ok(Arc::new(crate::memory::MemoryStore::new()))),
    );

    factories.insert(
        "local".to_string(),
        Box::new(|options| {
            let root = path_option(&options, "root", "local")?;
            Ok(Arc::new(crate::local::DirectoryStore::new(root)?))
        }),
    );

    factories.insert(
        "sqlite".to_string(),
        Box::new(|options| {
            let path = path_option(&options, "path", "sqlite")?;
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Ok(Arc::new(crate::sqlite::SqliteStore::open(path)?))
        }),
    );

    StoreRegistry { factories }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = StoreRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))))
            .unwrap();

        let store = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = StoreRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))))
            .unwrap();

        let result = registry.register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = create_default_registry();
        assert!(matches!(
            registry.resolve("s3", Value::Null),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_default_backends() {
        let registry = create_default_registry();
        for name in ["memory", "local", "sqlite"] {
            assert!(registry.has_backend(name));
        }
    }

    #[test]
    fn test_local_requires_root() {
        let registry = create_default_registry();
        assert!(matches!(
            registry.resolve("local", json!({})),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_resolve_on_disk_backends() {
        let temp = TempDir::new().unwrap();
        let registry = create_default_registry();

        let local = registry
            .resolve("local", json!({ "root": temp.path().join("kv") }))
            .unwrap();
        assert_eq!(local.name(), "local");

        let sqlite = registry
            .resolve("sqlite", json!({ "path": temp.path().join("db/store.db") }))
            .unwrap();
        assert_eq!(sqlite.name(), "sqlite");
    }
}
