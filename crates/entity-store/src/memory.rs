//! In-memory backends for development storage and tests.
//!
//! These provide the same interfaces and concurrency semantics as the
//! PostgreSQL and filesystem implementations: version tokens are checked
//! under a single write lock, so conditional replaces are atomic.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::stream;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::blob::generate_name;
use crate::table::{already_exists, conflict, not_found};
use crate::{
    BlobRef, BlobStore, Entity, EntityStream, QueueMessage, QueueStore, Result, StorageError,
    TableStore, VersionToken,
};

type Rows = BTreeMap<(String, String), Entity>;

/// Failure switches shared by the in-memory backends.
#[derive(Debug, Default)]
struct Faults {
    fail_on_provision: AtomicBool,
    fail_on_delete: AtomicBool,
    failing_writes: Mutex<HashSet<String>>,
}

impl Faults {
    fn check_provision(&self, resource: &str) -> Result<()> {
        if self.fail_on_provision.load(Ordering::SeqCst) {
            return Err(StorageError::Transient(format!(
                "provisioning of {resource} is unavailable"
            )));
        }
        Ok(())
    }

    fn check_write(&self, target: &str) -> Result<()> {
        let failing = self
            .failing_writes
            .lock()
            .map(|set| set.contains(target))
            .unwrap_or(false);
        if failing {
            return Err(StorageError::Transient(format!(
                "writes to {target} are unavailable"
            )));
        }
        Ok(())
    }

    fn set_failing_write(&self, target: &str, fail: bool) {
        if let Ok(mut set) = self.failing_writes.lock() {
            if fail {
                set.insert(target.to_string());
            } else {
                set.remove(target);
            }
        }
    }
}

/// Stamps an entity with a fresh version token and timestamp.
fn stamp(mut entity: Entity) -> Entity {
    entity.version = Some(VersionToken::generate());
    entity.timestamp = Some(Utc::now());
    entity
}

/// In-memory table store.
#[derive(Clone, Default)]
pub struct InMemoryTableStore {
    tables: Arc<RwLock<HashMap<String, Rows>>>,
    faults: Arc<Faults>,
}

impl InMemoryTableStore {
    /// Creates a new empty in-memory table store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `create_table_if_not_exists` call fail.
    pub fn set_fail_on_provision(&self, fail: bool) {
        self.faults.fail_on_provision.store(fail, Ordering::SeqCst);
    }

    /// Makes every write to `table` fail with a transient error.
    pub fn set_fail_on_write(&self, table: &str, fail: bool) {
        self.faults.set_failing_write(table, fail);
    }

    /// Returns the number of entities stored in a table.
    pub async fn entity_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Removes every table and entity.
    pub async fn clear(&self) {
        self.tables.write().await.clear();
    }

    fn row_key(entity: &Entity) -> (String, String) {
        (entity.partition_key.clone(), entity.row_key.clone())
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn create_table_if_not_exists(&self, table: &str) -> Result<bool> {
        self.faults.check_provision(table)?;
        let mut tables = self.tables.write().await;
        if tables.contains_key(table) {
            return Ok(false);
        }
        tables.insert(table.to_string(), Rows::new());
        Ok(true)
    }

    async fn get(&self, table: &str, partition_key: &str, row_key: &str) -> Result<Entity> {
        let tables = self.tables.read().await;
        let rows = tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        rows.get(&(partition_key.to_string(), row_key.to_string()))
            .cloned()
            .ok_or_else(|| not_found(table, partition_key, row_key))
    }

    async fn insert(&self, table: &str, entity: Entity) -> Result<Entity> {
        self.faults.check_write(table)?;
        let mut tables = self.tables.write().await;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        let key = Self::row_key(&entity);
        if rows.contains_key(&key) {
            return Err(already_exists(table, &entity));
        }
        let stored = stamp(entity);
        rows.insert(key, stored.clone());
        Ok(stored)
    }

    async fn put(&self, table: &str, entity: Entity) -> Result<Entity> {
        self.faults.check_write(table)?;
        let mut tables = self.tables.write().await;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        let stored = stamp(entity);
        rows.insert(Self::row_key(&stored), stored.clone());
        Ok(stored)
    }

    async fn replace_if_version(
        &self,
        table: &str,
        entity: Entity,
        expected: &VersionToken,
    ) -> Result<Entity> {
        self.faults.check_write(table)?;
        let mut tables = self.tables.write().await;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        let key = Self::row_key(&entity);
        let current = rows
            .get(&key)
            .ok_or_else(|| not_found(table, &entity.partition_key, &entity.row_key))?;

        if current.version.as_ref() != Some(expected) {
            return Err(conflict(table, &entity, expected, current.version.clone()));
        }

        let stored = stamp(entity);
        rows.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, table: &str, partition_key: &str, row_key: &str) -> Result<()> {
        self.faults.check_write(table)?;
        let mut tables = self.tables.write().await;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        rows.remove(&(partition_key.to_string(), row_key.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(table, partition_key, row_key))
    }

    async fn delete_partition(&self, table: &str, partition_key: &str) -> Result<usize> {
        self.faults.check_write(table)?;
        let mut tables = self.tables.write().await;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        let before = rows.len();
        rows.retain(|(pk, _), _| pk != partition_key);
        Ok(before - rows.len())
    }

    async fn scan(&self, table: &str) -> Result<EntityStream> {
        let tables = self.tables.read().await;
        let rows = tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        let entities: Vec<Entity> = rows.values().cloned().collect();
        Ok(Box::pin(stream::iter(entities.into_iter().map(Ok))))
    }

    async fn scan_partition(&self, table: &str, partition_key: &str) -> Result<EntityStream> {
        let tables = self.tables.read().await;
        let rows = tables
            .get(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        let entities: Vec<Entity> = rows
            .iter()
            .filter(|((pk, _), _)| pk == partition_key)
            .map(|(_, entity)| entity.clone())
            .collect();
        Ok(Box::pin(stream::iter(entities.into_iter().map(Ok))))
    }
}

/// In-memory blob store.
#[derive(Clone, Default)]
pub struct InMemoryBlobStore {
    containers: Arc<RwLock<HashMap<String, HashMap<String, Bytes>>>>,
    faults: Arc<Faults>,
}

impl InMemoryBlobStore {
    /// Creates a new empty in-memory blob store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `create_container_if_not_exists` call fail.
    pub fn set_fail_on_provision(&self, fail: bool) {
        self.faults.fail_on_provision.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of blobs in a container.
    pub async fn blob_count(&self, container: &str) -> usize {
        self.containers
            .read()
            .await
            .get(container)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn create_container_if_not_exists(&self, container: &str) -> Result<bool> {
        self.faults.check_provision(container)?;
        let mut containers = self.containers.write().await;
        if containers.contains_key(container) {
            return Ok(false);
        }
        containers.insert(container.to_string(), HashMap::new());
        Ok(true)
    }

    async fn put(&self, container: &str, name: Option<&str>, data: Bytes) -> Result<BlobRef> {
        let mut containers = self.containers.write().await;
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;

        let name = name.map(str::to_string).unwrap_or_else(|| generate_name(None));
        blobs.insert(name.clone(), data);
        Ok(BlobRef::new(container, name))
    }

    async fn get(&self, container: &str, name: &str) -> Result<Bytes> {
        let containers = self.containers.read().await;
        let blobs = containers
            .get(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;

        blobs
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::BlobNotFound {
                container: container.to_string(),
                name: name.to_string(),
            })
    }

    async fn delete(&self, container: &str, name: &str) -> Result<()> {
        let mut containers = self.containers.write().await;
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;
        blobs.remove(name);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: Uuid,
    body: String,
    dequeue_count: u32,
    inserted_at: DateTime<Utc>,
    visible_at: DateTime<Utc>,
}

/// In-memory queue store.
#[derive(Clone)]
pub struct InMemoryQueueStore {
    queues: Arc<RwLock<HashMap<String, VecDeque<StoredMessage>>>>,
    visibility_timeout: TimeDelta,
    faults: Arc<Faults>,
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self {
            queues: Arc::default(),
            visibility_timeout: TimeDelta::seconds(30),
            faults: Arc::default(),
        }
    }
}

impl InMemoryQueueStore {
    /// Creates a new empty in-memory queue store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a received message stays hidden if its delete fails.
    pub fn with_visibility_timeout(mut self, timeout: TimeDelta) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Makes every `create_queue_if_not_exists` call fail.
    pub fn set_fail_on_provision(&self, fail: bool) {
        self.faults.fail_on_provision.store(fail, Ordering::SeqCst);
    }

    /// Makes the delete step after a receive fail.
    pub fn set_fail_on_delete(&self, fail: bool) {
        self.faults.fail_on_delete.store(fail, Ordering::SeqCst);
    }

    /// Makes every send to `queue` fail with a transient error.
    pub fn set_fail_on_send(&self, queue: &str, fail: bool) {
        self.faults.set_failing_write(queue, fail);
    }

    /// Returns the number of messages in a queue, hidden ones included.
    pub async fn message_count(&self, queue: &str) -> usize {
        self.queues
            .read()
            .await
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn create_queue_if_not_exists(&self, queue: &str) -> Result<bool> {
        self.faults.check_provision(queue)?;
        let mut queues = self.queues.write().await;
        if queues.contains_key(queue) {
            return Ok(false);
        }
        queues.insert(queue.to_string(), VecDeque::new());
        Ok(true)
    }

    async fn send(&self, queue: &str, body: String) -> Result<()> {
        self.faults.check_write(queue)?;
        let mut queues = self.queues.write().await;
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| StorageError::QueueNotFound(queue.to_string()))?;

        let now = Utc::now();
        messages.push_back(StoredMessage {
            id: Uuid::new_v4(),
            body,
            dequeue_count: 0,
            inserted_at: now,
            visible_at: now,
        });
        Ok(())
    }

    async fn receive_one(&self, queue: &str) -> Result<Option<QueueMessage>> {
        let mut queues = self.queues.write().await;
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| StorageError::QueueNotFound(queue.to_string()))?;

        let now = Utc::now();
        let Some(position) = messages.iter().position(|m| m.visible_at <= now) else {
            return Ok(None);
        };

        // Lease the message first; it is only removed once the delete succeeds.
        let leased = &mut messages[position];
        leased.dequeue_count += 1;
        leased.visible_at = now + self.visibility_timeout;
        let message = QueueMessage {
            id: leased.id,
            body: leased.body.clone(),
            dequeue_count: leased.dequeue_count,
            inserted_at: leased.inserted_at,
        };

        if self.faults.fail_on_delete.load(Ordering::SeqCst) {
            tracing::warn!(
                queue,
                message_id = %message.id,
                "failed to delete received message; it will be redelivered"
            );
        } else {
            messages.remove(position);
        }

        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableStoreExt;

    fn entity(pk: &str, rk: &str, stock: i64) -> Entity {
        Entity::builder()
            .partition_key(pk)
            .row_key(rk)
            .property("Stock", stock)
            .build()
    }

    async fn store_with_table(table: &str) -> InMemoryTableStore {
        let store = InMemoryTableStore::new();
        store.create_table_if_not_exists(table).await.unwrap();
        store
    }

    #[tokio::test]
    async fn create_table_is_idempotent() {
        let store = InMemoryTableStore::new();
        assert!(store.create_table_if_not_exists("Products").await.unwrap());
        assert!(!store.create_table_if_not_exists("Products").await.unwrap());
    }

    #[tokio::test]
    async fn insert_assigns_version_and_timestamp() {
        let store = store_with_table("Products").await;
        let stored = store
            .insert("Products", entity("catalog", "SKU-1", 5))
            .await
            .unwrap();
        assert!(stored.version.is_some());
        assert!(stored.timestamp.is_some());

        let loaded = store.get("Products", "catalog", "SKU-1").await.unwrap();
        assert_eq!(loaded, stored);
    }

    #[tokio::test]
    async fn insert_rejects_existing_key() {
        let store = store_with_table("Products").await;
        store
            .insert("Products", entity("catalog", "SKU-1", 5))
            .await
            .unwrap();

        let result = store
            .insert("Products", entity("catalog", "SKU-1", 9))
            .await;
        assert!(matches!(result, Err(StorageError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn put_overwrites_and_changes_version() {
        let store = store_with_table("Products").await;
        let first = store
            .put("Products", entity("catalog", "SKU-1", 5))
            .await
            .unwrap();
        let second = store
            .put("Products", entity("catalog", "SKU-1", 4))
            .await
            .unwrap();
        assert_ne!(first.version, second.version);
        assert_eq!(store.entity_count("Products").await, 1);
    }

    #[tokio::test]
    async fn replace_with_current_version_succeeds() {
        let store = store_with_table("Products").await;
        let stored = store
            .insert("Products", entity("catalog", "SKU-1", 5))
            .await
            .unwrap();
        let expected = stored.version.clone().unwrap();

        let replaced = store
            .replace_if_version("Products", entity("catalog", "SKU-1", 4), &expected)
            .await
            .unwrap();
        assert_ne!(replaced.version, stored.version);
    }

    #[tokio::test]
    async fn replace_with_stale_version_conflicts() {
        let store = store_with_table("Products").await;
        let stored = store
            .insert("Products", entity("catalog", "SKU-1", 5))
            .await
            .unwrap();
        let stale = stored.version.clone().unwrap();
        store
            .replace_if_version("Products", entity("catalog", "SKU-1", 4), &stale)
            .await
            .unwrap();

        let result = store
            .replace_if_version("Products", entity("catalog", "SKU-1", 3), &stale)
            .await;
        assert!(matches!(
            result,
            Err(StorageError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_replaces_with_same_version_have_one_winner() {
        let store = store_with_table("Products").await;
        let stored = store
            .insert("Products", entity("catalog", "SKU-1", 5))
            .await
            .unwrap();
        let version = stored.version.unwrap();

        let (a, b) = tokio::join!(
            store.replace_if_version("Products", entity("catalog", "SKU-1", 4), &version),
            store.replace_if_version("Products", entity("catalog", "SKU-1", 3), &version),
        );

        let wins = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(
            [a, b]
                .into_iter()
                .any(|r| matches!(r, Err(StorageError::ConcurrencyConflict { .. })))
        );
    }

    #[tokio::test]
    async fn replace_of_deleted_entity_is_not_found() {
        let store = store_with_table("Products").await;
        let stored = store
            .insert("Products", entity("catalog", "SKU-1", 5))
            .await
            .unwrap();
        store.delete("Products", "catalog", "SKU-1").await.unwrap();

        let result = store
            .replace_if_version(
                "Products",
                entity("catalog", "SKU-1", 4),
                stored.version.as_ref().unwrap(),
            )
            .await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = store_with_table("Products").await;
        let result = store.delete("Products", "catalog", "nope").await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn delete_partition_only_touches_that_partition() {
        let store = store_with_table("CartItems").await;
        for rk in ["a", "b", "c"] {
            store
                .insert("CartItems", entity("alice", rk, 1))
                .await
                .unwrap();
        }
        store
            .insert("CartItems", entity("bob", "a", 1))
            .await
            .unwrap();

        let removed = store.delete_partition("CartItems", "alice").await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.entity_count("CartItems").await, 1);
        assert!(store.exists("CartItems", "bob", "a").await.unwrap());
    }

    #[tokio::test]
    async fn scans_are_restartable() {
        let store = store_with_table("CartItems").await;
        store
            .insert("CartItems", entity("alice", "a", 1))
            .await
            .unwrap();
        store
            .insert("CartItems", entity("bob", "b", 1))
            .await
            .unwrap();

        assert_eq!(store.scan_all("CartItems").await.unwrap().len(), 2);
        assert_eq!(store.scan_all("CartItems").await.unwrap().len(), 2);

        use futures_util::TryStreamExt;
        let alice: Vec<Entity> = store
            .scan_partition("CartItems", "alice")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].row_key, "a");
    }

    #[tokio::test]
    async fn operations_on_missing_table_fail() {
        let store = InMemoryTableStore::new();
        let result = store.get("Ghost", "p", "r").await;
        assert!(matches!(result, Err(StorageError::TableNotFound(_))));
        assert!(store.scan("Ghost").await.is_err());

        assert!(matches!(
            store.delete("Ghost", "p", "r").await,
            Err(StorageError::TableNotFound(_))
        ));
        assert!(matches!(
            store.delete_partition("Ghost", "p").await,
            Err(StorageError::TableNotFound(_))
        ));
        assert!(matches!(
            store
                .replace_if_version("Ghost", entity("p", "r", 1), &VersionToken::from(Uuid::new_v4()))
                .await,
            Err(StorageError::TableNotFound(_))
        ));
    }

    #[tokio::test]
    async fn injected_write_failure_is_transient() {
        let store = store_with_table("Orders").await;
        store.set_fail_on_write("Orders", true);
        let err = store
            .insert("Orders", entity("alice", "o1", 1))
            .await
            .unwrap_err();
        assert!(err.is_transient());

        store.set_fail_on_write("Orders", false);
        assert!(store.insert("Orders", entity("alice", "o1", 1)).await.is_ok());
    }

    #[tokio::test]
    async fn blob_put_generates_names_and_delete_is_idempotent() {
        let blobs = InMemoryBlobStore::new();
        blobs.create_container_if_not_exists("images").await.unwrap();

        let reference = blobs
            .put("images", None, Bytes::from_static(b"png"))
            .await
            .unwrap();
        assert_eq!(reference.container, "images");
        assert!(!reference.name.is_empty());
        assert_eq!(
            blobs.get("images", &reference.name).await.unwrap(),
            Bytes::from_static(b"png")
        );

        blobs.delete("images", &reference.name).await.unwrap();
        blobs.delete("images", &reference.name).await.unwrap();
        assert_eq!(blobs.blob_count("images").await, 0);
    }

    #[tokio::test]
    async fn blob_put_into_missing_container_fails() {
        let blobs = InMemoryBlobStore::new();
        let result = blobs.put("files", Some("a.txt"), Bytes::new()).await;
        assert!(matches!(result, Err(StorageError::ContainerNotFound(_))));
    }

    #[tokio::test]
    async fn queue_is_fifo_and_deletes_on_receive() {
        let queues = InMemoryQueueStore::new();
        queues.create_queue_if_not_exists("orders").await.unwrap();
        queues.send("orders", "first".to_string()).await.unwrap();
        queues.send("orders", "second".to_string()).await.unwrap();

        let first = queues.receive_one("orders").await.unwrap().unwrap();
        assert_eq!(first.body, "first");
        assert_eq!(first.dequeue_count, 1);
        assert!(!first.is_redelivery());

        let second = queues.receive_one("orders").await.unwrap().unwrap();
        assert_eq!(second.body, "second");
        assert!(queues.receive_one("orders").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_delete_causes_redelivery() {
        let queues = InMemoryQueueStore::new().with_visibility_timeout(TimeDelta::zero());
        queues.create_queue_if_not_exists("orders").await.unwrap();
        queues.send("orders", "hello".to_string()).await.unwrap();

        queues.set_fail_on_delete(true);
        let first = queues.receive_one("orders").await.unwrap().unwrap();
        assert_eq!(first.dequeue_count, 1);
        assert_eq!(queues.message_count("orders").await, 1);

        queues.set_fail_on_delete(false);
        let second = queues.receive_one("orders").await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert!(second.is_redelivery());
        assert_eq!(queues.message_count("orders").await, 0);
    }

    #[tokio::test]
    async fn leased_message_is_hidden_until_timeout() {
        let queues = InMemoryQueueStore::new();
        queues.create_queue_if_not_exists("orders").await.unwrap();
        queues.send("orders", "hello".to_string()).await.unwrap();

        queues.set_fail_on_delete(true);
        assert!(queues.receive_one("orders").await.unwrap().is_some());
        assert!(queues.receive_one("orders").await.unwrap().is_none());
    }
}
