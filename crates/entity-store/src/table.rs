use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::TryStreamExt;

use crate::codec::{TableEntity, decode};
use crate::{Entity, Result, StorageError, VersionToken};

/// A lazy stream of entities.
///
/// Each call to a scan method produces a fresh stream. Writes that happen
/// while a stream is being consumed may or may not be observed.
pub type EntityStream = Pin<Box<dyn Stream<Item = Result<Entity>> + Send>>;

/// Partition/row keyed table storage.
///
/// All implementations must be thread-safe (Send + Sync). Every successful
/// write assigns a new [`VersionToken`] and returns the stored entity
/// carrying it.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Creates a logical table. Returns `true` if it was created, `false` if
    /// it already existed.
    async fn create_table_if_not_exists(&self, table: &str) -> Result<bool>;

    /// Loads a single entity, failing with `NotFound` if it doesn't exist.
    async fn get(&self, table: &str, partition_key: &str, row_key: &str) -> Result<Entity>;

    /// Inserts an entity only if no entity exists under its key.
    ///
    /// Fails with `AlreadyExists` otherwise.
    async fn insert(&self, table: &str, entity: Entity) -> Result<Entity>;

    /// Inserts or unconditionally replaces an entity.
    async fn put(&self, table: &str, entity: Entity) -> Result<Entity>;

    /// Replaces an entity only if its current version matches `expected`.
    ///
    /// Fails with `ConcurrencyConflict` on a stale version and `NotFound` if
    /// the entity was deleted.
    async fn replace_if_version(
        &self,
        table: &str,
        entity: Entity,
        expected: &VersionToken,
    ) -> Result<Entity>;

    /// Deletes an entity, failing with `NotFound` if it doesn't exist.
    async fn delete(&self, table: &str, partition_key: &str, row_key: &str) -> Result<()>;

    /// Deletes every entity in a partition as a single batch.
    ///
    /// Returns the number of entities removed.
    async fn delete_partition(&self, table: &str, partition_key: &str) -> Result<usize>;

    /// Streams every entity in a table.
    async fn scan(&self, table: &str) -> Result<EntityStream>;

    /// Streams every entity in one partition of a table.
    async fn scan_partition(&self, table: &str, partition_key: &str) -> Result<EntityStream>;
}

/// Extension trait providing convenience methods for table stores.
#[async_trait]
pub trait TableStoreExt: TableStore {
    /// Loads an entity, returning `None` instead of `NotFound`.
    async fn find(&self, table: &str, partition_key: &str, row_key: &str) -> Result<Option<Entity>> {
        match self.get(table, partition_key, row_key).await {
            Ok(entity) => Ok(Some(entity)),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Checks whether an entity exists.
    async fn exists(&self, table: &str, partition_key: &str, row_key: &str) -> Result<bool> {
        Ok(self.find(table, partition_key, row_key).await?.is_some())
    }

    /// Collects a whole table into memory.
    async fn scan_all(&self, table: &str) -> Result<Vec<Entity>> {
        self.scan(table).await?.try_collect().await
    }

    /// Loads and decodes a record.
    async fn get_record<T: TableEntity + 'static>(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<T> {
        let entity = self.get(table, partition_key, row_key).await?;
        Ok(decode(entity)?)
    }
}

// Blanket implementation for all TableStore implementations
impl<T: TableStore + ?Sized> TableStoreExt for T {}

/// Builds the `NotFound` error for a key.
pub(crate) fn not_found(table: &str, partition_key: &str, row_key: &str) -> StorageError {
    StorageError::NotFound {
        table: table.to_string(),
        partition_key: partition_key.to_string(),
        row_key: row_key.to_string(),
    }
}

/// Builds the `AlreadyExists` error for an entity.
pub(crate) fn already_exists(table: &str, entity: &Entity) -> StorageError {
    StorageError::AlreadyExists {
        table: table.to_string(),
        partition_key: entity.partition_key.clone(),
        row_key: entity.row_key.clone(),
    }
}

/// Builds the `ConcurrencyConflict` error for an entity.
pub(crate) fn conflict(
    table: &str,
    entity: &Entity,
    expected: &VersionToken,
    actual: Option<VersionToken>,
) -> StorageError {
    metrics::counter!("storage_concurrency_conflicts_total").increment(1);
    StorageError::ConcurrencyConflict {
        table: table.to_string(),
        partition_key: entity.partition_key.clone(),
        row_key: entity.row_key.clone(),
        expected: expected.clone(),
        actual,
    }
}
