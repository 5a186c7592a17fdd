//! Persistence configuration.
//!
//! All settings have defaults, so an empty JSON object is a valid
//! configuration:
//!
//! ```rust
//! use helios_persistence_jdbc::config::PersistenceConfig;
//!
//! let config = PersistenceConfig::from_json("{}").unwrap();
//! assert!(config.update_create_enabled);
//! assert_eq!(config.default_page_size, 10);
//!
//! let config = PersistenceConfig::from_json(
//!     r#"{"update_create_enabled": false, "cache": {"code_systems": false}}"#,
//! ).unwrap();
//! assert!(!config.update_create_enabled);
//! assert!(!config.cache.code_systems);
//! assert!(config.cache.parameter_names);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{PersistenceError, PersistenceResult};

/// Top-level configuration for the persistence facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Whether `update` of a nonexistent logical id creates it.
    #[serde(default = "default_true")]
    pub update_create_enabled: bool,

    /// Page size used when a search or history request does not give one.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Upper bound applied to requested page sizes.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub sqlite: SqliteConfig,
}

/// Enables or disables the individual dictionary caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub parameter_names: bool,

    #[serde(default = "default_true")]
    pub code_systems: bool,

    #[serde(default = "default_true")]
    pub resource_types: bool,
}

/// Connection pool settings for the SQLite backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file, or `:memory:`.
    #[serde(default = "default_path")]
    pub path: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of idle connections.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Enable foreign key constraints.
    #[serde(default = "default_true")]
    pub enable_foreign_keys: bool,
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> u32 {
    10
}

fn default_max_page_size() -> u32 {
    1000
}

fn default_path() -> String {
    ":memory:".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            update_create_enabled: true,
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            cache: CacheConfig::default(),
            sqlite: SqliteConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            parameter_names: true,
            code_systems: true,
            resource_types: true,
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
            enable_foreign_keys: true,
        }
    }
}

impl SqliteConfig {
    /// Configuration for a file-backed database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn is_memory(&self) -> bool {
        self.path == ":memory:"
    }
}

impl PersistenceConfig {
    /// Parses a JSON configuration document and validates it.
    pub fn from_json(json: &str) -> PersistenceResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PersistenceError::invalid_argument(format!("invalid configuration: {}", e)))?;
        config.validate().map_err(|errors| {
            PersistenceError::invalid_argument(format!("invalid configuration: {}", errors.join("; ")))
        })?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Returns a list of validation errors, or Ok if valid.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.default_page_size == 0 {
            errors.push("Default page size cannot be 0".to_string());
        }

        if self.default_page_size > self.max_page_size {
            errors.push("Default page size cannot exceed max page size".to_string());
        }

        if self.sqlite.max_connections == 0 {
            errors.push("Max connections cannot be 0".to_string());
        }

        if self.sqlite.min_connections > self.sqlite.max_connections {
            errors.push("Min connections cannot exceed max connections".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Clamps a requested page size into `1..=max_page_size`, falling back to
    /// the default when none was requested.
    pub fn effective_page_size(&self, requested: Option<u32>) -> u32 {
        match requested {
            Some(0) | None => self.default_page_size,
            Some(size) => size.min(self.max_page_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PersistenceConfig::default();
        assert!(config.update_create_enabled);
        assert!(config.cache.parameter_names);
        assert!(config.cache.code_systems);
        assert!(config.cache.resource_types);
        assert!(config.sqlite.is_memory());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config =
            PersistenceConfig::from_json(r#"{"sqlite": {"path": "/tmp/fhir.db", "max_connections": 4}}"#)
                .unwrap();
        assert_eq!(config.sqlite.path, "/tmp/fhir.db");
        assert_eq!(config.sqlite.max_connections, 4);
        assert_eq!(config.sqlite.busy_timeout_ms, 5000);
        assert!(!config.sqlite.is_memory());
    }

    #[test]
    fn test_validation_errors() {
        let config = PersistenceConfig {
            default_page_size: 0,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);

        let result = PersistenceConfig::from_json(r#"{"default_page_size": 50, "max_page_size": 20}"#);
        assert!(matches!(result, Err(PersistenceError::InvalidArgument { .. })));
    }

    #[test]
    fn test_effective_page_size() {
        let config = PersistenceConfig::default();
        assert_eq!(config.effective_page_size(None), 10);
        assert_eq!(config.effective_page_size(Some(0)), 10);
        assert_eq!(config.effective_page_size(Some(25)), 25);
        assert_eq!(config.effective_page_size(Some(5000)), 1000);
    }
}
