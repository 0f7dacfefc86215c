use thiserror::Error;

use crate::codec::CodecError;
use crate::entity::VersionToken;

/// Errors that can occur when interacting with a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No entity exists under the given key.
    #[error("Entity not found in {table}: {partition_key}/{row_key}")]
    NotFound {
        table: String,
        partition_key: String,
        row_key: String,
    },

    /// Insert-if-absent found an existing entity under the key.
    #[error("Entity already exists in {table}: {partition_key}/{row_key}")]
    AlreadyExists {
        table: String,
        partition_key: String,
        row_key: String,
    },

    /// A conditional replace presented a stale version token.
    #[error(
        "Concurrency conflict in {table} for {partition_key}/{row_key}: expected version {expected}, found {}",
        .actual.as_ref().map(VersionToken::as_str).unwrap_or("none")
    )]
    ConcurrencyConflict {
        table: String,
        partition_key: String,
        row_key: String,
        expected: VersionToken,
        actual: Option<VersionToken>,
    },

    /// An update was attempted on a record that was never loaded or written.
    #[error("Update of {kind} {partition_key}/{row_key} requires a version token")]
    VersionRequired {
        kind: &'static str,
        partition_key: String,
        row_key: String,
    },

    /// The table has not been provisioned.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// The blob container or file share has not been provisioned.
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// The queue has not been provisioned.
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// No blob or file exists under the given name.
    #[error("Blob not found: {container}/{name}")]
    BlobNotFound { container: String, name: String },

    /// A record could not be mapped to or from an entity.
    #[error("Encoding error: {0}")]
    Encoding(#[from] CodecError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A filesystem error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage configuration is unusable.
    #[error("Invalid storage configuration: {0}")]
    Configuration(String),

    /// The backend failed in a way that may succeed on retry.
    #[error("Transient backend failure: {0}")]
    Transient(String),
}

impl StorageError {
    /// Returns true for missing entities, blobs, tables, containers and queues.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound { .. }
                | StorageError::BlobNotFound { .. }
                | StorageError::TableNotFound(_)
                | StorageError::ContainerNotFound(_)
                | StorageError::QueueNotFound(_)
        )
    }

    /// Returns true if a write lost an optimistic concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::ConcurrencyConflict { .. } | StorageError::AlreadyExists { .. }
        )
    }

    /// Returns true for network, database, filesystem and provisioning failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Database(_)
                | StorageError::Migration(_)
                | StorageError::Io(_)
                | StorageError::Transient(_)
        )
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_both_versions() {
        let err = StorageError::ConcurrencyConflict {
            table: "Products".to_string(),
            partition_key: "catalog".to_string(),
            row_key: "SKU-1".to_string(),
            expected: VersionToken::new("a"),
            actual: None,
        };
        assert_eq!(
            err.to_string(),
            "Concurrency conflict in Products for catalog/SKU-1: expected version a, found none"
        );
        assert!(err.is_conflict());
        assert!(!err.is_transient());
    }

    #[test]
    fn classification() {
        assert!(StorageError::TableNotFound("Orders".to_string()).is_not_found());
        assert!(StorageError::Transient("timeout".to_string()).is_transient());
        assert!(
            StorageError::Encoding(CodecError::MissingField {
                kind: "Product",
                field: "Name"
            })
            .to_string()
            .contains("Name")
        );
    }
}
