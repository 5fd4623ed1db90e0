//! Application configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use embaixada_common::{Error, Result};

/// Overrides `sgc_api_url`.
pub const ENV_API_URL: &str = "EMBAIXADA_SGC_API_URL";
/// Overrides `health_url`.
pub const ENV_HEALTH_URL: &str = "EMBAIXADA_HEALTH_URL";
/// Overrides `store.backend`.
pub const ENV_STORE_BACKEND: &str = "EMBAIXADA_STORE_BACKEND";
/// Sets the path option of the selected store backend.
pub const ENV_STORE_PATH: &str = "EMBAIXADA_STORE_PATH";

/// Key-value store selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Registered backend name ("memory", "local", "sqlite").
    pub backend: String,
    /// Backend-specific options.
    pub options: Value,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            options: Value::Object(Map::new()),
        }
    }
}

impl StoreConfig {
    /// Option name holding the on-disk location for `backend`.
    fn path_option(&self) -> Option<&'static str> {
        match self.backend.as_str() {
            "local" => Some("root"),
            "sqlite" => Some("path"),
            _ => None,
        }
    }

    /// Point the backend at `path`.
    ///
    /// # Errors
    /// - The backend has no on-disk location
    pub fn set_path(&mut self, path: &str) -> Result<()> {
        let field = self.path_option().ok_or_else(|| {
            Error::Config(format!("Store backend '{}' takes no path", self.backend))
        })?;
        if !self.options.is_object() {
            self.options = Value::Object(Map::new());
        }
        if let Value::Object(options) = &mut self.options {
            options.insert(field.to_string(), Value::String(path.to_string()));
        }
        Ok(())
    }

    /// Configured on-disk location, if any.
    pub fn path(&self) -> Option<&str> {
        self.path_option()
            .and_then(|field| self.options.get(field))
            .and_then(Value::as_str)
    }
}

/// Settings for the composition root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the consular API.
    pub sgc_api_url: String,
    /// URL polled for reachability; the API base URL when unset.
    pub health_url: Option<String>,
    pub request_timeout_ms: u64,
    /// TTL applied to cached query results.
    pub default_cache_ttl_ms: u64,
    /// Failed attempts before a queued operation is dropped.
    pub max_sync_attempts: u32,
    pub probe_interval_secs: u64,
    pub store: StoreConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sgc_api_url: "http://10.0.2.2:8081/api/v1".to_string(),
            health_url: None,
            request_timeout_ms: 30_000,
            default_cache_ttl_ms: 30 * 60 * 1000,
            max_sync_attempts: 4,
            probe_interval_secs: 15,
            store: StoreConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parse configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Load from an optional file, then apply environment overrides.
    ///
    /// # Errors
    /// - The file cannot be read or parsed
    /// - An override is inconsistent with the selected backend
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Cannot read {}: {}", path.display(), e))
                })?;
                debug!("Loaded configuration from {}", path.display());
                Self::from_json(&json)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up by variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(ENV_API_URL) {
            self.sgc_api_url = url;
        }
        if let Some(url) = lookup(ENV_HEALTH_URL) {
            self.health_url = Some(url);
        }
        if let Some(backend) = lookup(ENV_STORE_BACKEND) {
            if backend != self.store.backend {
                self.store = StoreConfig {
                    backend,
                    options: Value::Object(Map::new()),
                };
            }
        }
        if let Some(path) = lookup(ENV_STORE_PATH) {
            self.store.set_path(&path)?;
        }
        Ok(())
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.sgc_api_url.trim().is_empty() {
            return Err(Error::Config("sgc_api_url must not be empty".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be positive".to_string()));
        }
        if self.probe_interval_secs == 0 {
            return Err(Error::Config("probe_interval_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn default_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.default_cache_ttl_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// URL the reachability probe polls.
    pub fn health_url(&self) -> &str {
        self.health_url.as_deref().unwrap_or(&self.sgc_api_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.sgc_api_url, "http://10.0.2.2:8081/api/v1");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.default_cache_ttl(), Duration::from_secs(30 * 60));
        assert_eq!(config.max_sync_attempts, 4);
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.health_url(), config.sgc_api_url);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = AppConfig::from_json(r#"{"max_sync_attempts": 6}"#).unwrap();
        assert_eq!(config.max_sync_attempts, 6);
        assert_eq!(config.probe_interval_secs, 15);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(env(&[
                (ENV_API_URL, "https://sgc.example.org/api/v1"),
                (ENV_HEALTH_URL, "https://sgc.example.org/health"),
                (ENV_STORE_BACKEND, "sqlite"),
                (ENV_STORE_PATH, "/var/lib/embaixada/store.db"),
            ]))
            .unwrap();

        assert_eq!(config.sgc_api_url, "https://sgc.example.org/api/v1");
        assert_eq!(config.health_url(), "https://sgc.example.org/health");
        assert_eq!(config.store.backend, "sqlite");
        assert_eq!(config.store.options, json!({"path": "/var/lib/embaixada/store.db"}));
    }

    #[test]
    fn test_blank_override_ignored() {
        let mut config = AppConfig::default();
        config.apply_overrides(env(&[(ENV_API_URL, "  ")])).unwrap();
        assert_eq!(config.sgc_api_url, AppConfig::default().sgc_api_url);
    }

    #[test]
    fn test_path_for_memory_backend_is_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_overrides(env(&[(ENV_STORE_PATH, "/tmp/x")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"store": {"backend": "local", "options": {"root": "/data/embaixada"}}}"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.store.backend, "local");
        assert_eq!(config.store.path(), Some("/data/embaixada"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            AppConfig::from_json("{not json"),
            Err(Error::Config(_))
        ));
        let config = AppConfig {
            request_timeout_ms: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
