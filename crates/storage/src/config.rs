//! Storage configuration loaded from environment variables.

use std::path::PathBuf;

use entity_store::StorageError;

/// Connection string that selects the local development backends.
pub const DEVELOPMENT_CONNECTION_STRING: &str = "UseDevelopmentStorage=true";

/// Which family of backends the facade talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageMode {
    /// In-memory tables, blobs and queues. No file share.
    Development,

    /// PostgreSQL tables and queues, filesystem blobs and file share.
    Production,
}

impl StorageMode {
    /// Derives the mode from a connection string.
    ///
    /// Returns `None` if the string is neither the development marker nor a
    /// PostgreSQL URL.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let value = connection_string.trim();
        if value.eq_ignore_ascii_case(DEVELOPMENT_CONNECTION_STRING) {
            Some(StorageMode::Development)
        } else if value.starts_with("postgres://") || value.starts_with("postgresql://") {
            Some(StorageMode::Production)
        } else {
            None
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, StorageMode::Development)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Development => "development",
            StorageMode::Production => "production",
        }
    }
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `STORAGE_CONNECTION_STRING`: `UseDevelopmentStorage=true` or a
///   `postgres://` URL (default: development)
/// - `STORAGE_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `STORAGE_CONNECT_TIMEOUT_SECS`: pool acquire timeout (default: `5`)
/// - `BLOB_ROOT`: blob container directory (default: `"./data/blobs"`)
/// - `FILE_SHARE_ROOT`: file share directory (default: `"./data/share"`)
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub connection_string: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub blob_root: PathBuf,
    pub share_root: PathBuf,
}

impl StorageConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            connection_string: std::env::var("STORAGE_CONNECTION_STRING")
                .unwrap_or(defaults.connection_string),
            max_connections: std::env::var("STORAGE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            connect_timeout_secs: std::env::var("STORAGE_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.connect_timeout_secs),
            blob_root: std::env::var("BLOB_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.blob_root),
            share_root: std::env::var("FILE_SHARE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.share_root),
        }
    }

    /// Creates a development configuration.
    pub fn development() -> Self {
        Self::default()
    }

    /// Resolves the storage mode from the connection string.
    pub fn mode(&self) -> Result<StorageMode, StorageError> {
        StorageMode::from_connection_string(&self.connection_string).ok_or_else(|| {
            StorageError::Configuration(
                "STORAGE_CONNECTION_STRING must be UseDevelopmentStorage=true or a postgres:// URL"
                    .to_string(),
            )
        })
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            connection_string: DEVELOPMENT_CONNECTION_STRING.to_string(),
            max_connections: 5,
            connect_timeout_secs: 5,
            blob_root: PathBuf::from("./data/blobs"),
            share_root: PathBuf::from("./data/share"),
        }
    }
}
