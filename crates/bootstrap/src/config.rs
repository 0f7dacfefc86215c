//! Application configuration loaded from environment variables.

use std::path::PathBuf;

use storage::StorageConfig;

/// Bootstrap configuration with sensible defaults.
///
/// Reads from environment variables:
/// - everything [`StorageConfig::from_env`] reads
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `SEED_FILE`: JSON catalog to load at startup (default: none)
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub log_level: String,
    pub seed_file: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            storage: StorageConfig::from_env(),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            seed_file: std::env::var("SEED_FILE")
                .ok()
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            log_level: "info".to_string(),
            seed_file: None,
        }
    }
}
