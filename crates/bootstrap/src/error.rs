use std::path::PathBuf;

/// Errors raised while starting up.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Failed to read seed file {path}: {source}")]
    SeedFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid seed file: {0}")]
    SeedFormat(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BootstrapError>;
