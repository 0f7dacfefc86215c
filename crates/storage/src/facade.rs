//! The storage facade.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use entity_store::{
    BlobRef, BlobStore, Capability, EntityStream, FileShare, InMemoryBlobStore,
    InMemoryQueueStore, InMemoryTableStore, LocalBlobStore, PostgresQueueStore,
    PostgresTableStore, QueueStore, Result, StorageError, TableEntity, TableStore, decode, encode,
    generate_name,
};
use futures_util::TryStreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::config::{StorageConfig, StorageMode};
use crate::names::{FILES_CONTAINER, IMAGES_CONTAINER, ORDERS_QUEUE, TableNames, UPLOADS_SHARE};
use crate::provisioning::{ProvisioningReport, ResourceKind};

/// Backend clients handed to [`Storage::with_backends`].
#[derive(Clone)]
pub struct Backends {
    pub tables: Arc<dyn TableStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub queues: Arc<dyn QueueStore>,
    pub file_share: Option<Arc<dyn FileShare>>,
}

impl Backends {
    /// In-memory tables, blobs and queues without a file share.
    pub fn in_memory() -> Self {
        Self {
            tables: Arc::new(InMemoryTableStore::new()),
            blobs: Arc::new(InMemoryBlobStore::new()),
            queues: Arc::new(InMemoryQueueStore::new()),
            file_share: None,
        }
    }
}

/// A message received through [`Storage::receive_message`].
#[derive(Debug, Clone, PartialEq)]
pub struct Received<M> {
    pub id: Uuid,
    pub body: M,
    pub dequeue_count: u32,
}

impl<M> Received<M> {
    /// Returns true if the message was delivered before.
    pub fn is_redelivery(&self) -> bool {
        self.dequeue_count > 1
    }
}

fn record_op(op: &'static str) {
    metrics::counter!("storage_operations_total", "op" => op).increment(1);
}

/// Uniform access to tables, blobs, queues and the optional file share.
///
/// Cloning is cheap; clones share the same backend clients. The storage mode
/// and the file-share capability are fixed at construction.
#[derive(Clone)]
pub struct Storage {
    tables: Arc<dyn TableStore>,
    blobs: Arc<dyn BlobStore>,
    queues: Arc<dyn QueueStore>,
    file_share: Capability<Arc<dyn FileShare>>,
    names: Arc<TableNames>,
    mode: StorageMode,
    report: Arc<ProvisioningReport>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("mode", &self.mode)
            .field("file_share", &self.file_share.is_supported())
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Builds the backends for the configured mode and provisions them.
    ///
    /// Only an invalid configuration fails. Backends that are unreachable are
    /// reported as failed in the [`ProvisioningReport`] and the facade is
    /// returned anyway.
    #[tracing::instrument(skip(config))]
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let mode = config.mode()?;
        match mode {
            StorageMode::Development => {
                Ok(Self::with_backends(mode, Backends::in_memory(), TableNames::default()).await)
            }
            StorageMode::Production => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
                    .connect_lazy(&config.connection_string)?;

                let mut report = ProvisioningReport::new();
                let migrated = entity_store::postgres::run_migrations(&pool)
                    .await
                    .map(|()| true)
                    .map_err(StorageError::from);
                report.record(ResourceKind::Schema, "entity_tables", migrated);

                let local = Arc::new(LocalBlobStore::new(&config.blob_root));
                let share = Arc::new(LocalBlobStore::new(&config.share_root));
                let backends = Backends {
                    tables: Arc::new(PostgresTableStore::new(pool.clone())),
                    blobs: local,
                    queues: Arc::new(PostgresQueueStore::new(pool)),
                    file_share: Some(share),
                };
                Ok(Self::provision(mode, backends, TableNames::default(), report).await)
            }
        }
    }

    /// Wraps existing backend clients and provisions every known resource.
    pub async fn with_backends(mode: StorageMode, backends: Backends, names: TableNames) -> Self {
        Self::provision(mode, backends, names, ProvisioningReport::new()).await
    }

    /// In-memory development storage with the default table names.
    pub async fn development() -> Self {
        Self::with_backends(
            StorageMode::Development,
            Backends::in_memory(),
            TableNames::default(),
        )
        .await
    }

    async fn provision(
        mode: StorageMode,
        backends: Backends,
        names: TableNames,
        mut report: ProvisioningReport,
    ) -> Self {
        let file_share = match (mode, backends.file_share) {
            (StorageMode::Development, share) => {
                if share.is_some() {
                    tracing::debug!("ignoring file share client in development mode");
                }
                tracing::warn!("file share is not supported with development storage");
                Capability::Unsupported
            }
            (StorageMode::Production, None) => {
                tracing::warn!("no file share client configured");
                Capability::Unsupported
            }
            (StorageMode::Production, Some(share)) => Capability::Supported(share),
        };

        for table in names.tables() {
            let result = backends.tables.create_table_if_not_exists(&table).await;
            report.record(ResourceKind::Table, &table, result);
        }
        for container in [IMAGES_CONTAINER, FILES_CONTAINER] {
            let result = backends.blobs.create_container_if_not_exists(container).await;
            report.record(ResourceKind::Container, container, result);
        }
        let result = backends.queues.create_queue_if_not_exists(ORDERS_QUEUE).await;
        report.record(ResourceKind::Queue, ORDERS_QUEUE, result);

        match &file_share {
            Capability::Supported(share) => {
                let result = share.create_share_if_not_exists(UPLOADS_SHARE).await;
                report.record(ResourceKind::FileShare, UPLOADS_SHARE, result);
            }
            Capability::Unsupported => {
                report.skip(
                    ResourceKind::FileShare,
                    UPLOADS_SHARE,
                    format!("not supported in {mode} mode"),
                );
            }
        }

        report.log();
        if report.is_healthy() {
            tracing::info!(%mode, "storage ready");
        } else {
            tracing::warn!(
                %mode,
                failures = report.failures().count(),
                "storage ready with unprovisioned resources"
            );
        }

        Self {
            tables: backends.tables,
            blobs: backends.blobs,
            queues: backends.queues,
            file_share,
            names: Arc::new(names),
            mode,
            report: Arc::new(report),
        }
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    pub fn names(&self) -> &TableNames {
        &self.names
    }

    /// Result of the provisioning pass run at construction.
    pub fn provisioning_report(&self) -> &ProvisioningReport {
        &self.report
    }

    pub fn file_share_supported(&self) -> bool {
        self.file_share.is_supported()
    }

    /// Decodes a scan, skipping entities that fail to decode.
    async fn collect<T: TableEntity>(table: &str, mut stream: EntityStream) -> Result<Vec<T>> {
        let mut records = Vec::new();
        while let Some(entity) = stream.try_next().await? {
            let key = entity.key();
            match decode::<T>(entity) {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::warn!(table, %key, %error, "skipping undecodable entity")
                }
            }
        }
        Ok(records)
    }

    /// Loads every record of a kind.
    #[tracing::instrument(skip(self), fields(kind = T::KIND))]
    pub async fn get_all<T: TableEntity>(&self) -> Result<Vec<T>> {
        record_op("get_all");
        let table = self.names.table_of::<T>();
        let stream = self.tables.scan(&table).await?;
        Self::collect(&table, stream).await
    }

    /// Loads every record of a kind in one partition.
    #[tracing::instrument(skip(self), fields(kind = T::KIND))]
    pub async fn get_partition<T: TableEntity>(&self, partition_key: &str) -> Result<Vec<T>> {
        record_op("get_partition");
        let table = self.names.table_of::<T>();
        let stream = self.tables.scan_partition(&table, partition_key).await?;
        Self::collect(&table, stream).await
    }

    /// Loads one record, failing with `NotFound` if it doesn't exist.
    #[tracing::instrument(skip(self), fields(kind = T::KIND))]
    pub async fn get<T: TableEntity>(&self, partition_key: &str, row_key: &str) -> Result<T> {
        record_op("get");
        let table = self.names.table_of::<T>();
        let entity = self.tables.get(&table, partition_key, row_key).await?;
        Ok(decode(entity)?)
    }

    /// Loads one record, returning `None` if it doesn't exist.
    pub async fn find<T: TableEntity>(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<T>> {
        match self.get(partition_key, row_key).await {
            Ok(record) => Ok(Some(record)),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Inserts a new record. Fails with `AlreadyExists` if the key is taken.
    #[tracing::instrument(skip(self, record), fields(kind = T::KIND))]
    pub async fn add<T: TableEntity>(&self, record: &T) -> Result<T> {
        record_op("add");
        let table = self.names.table_of::<T>();
        let stored = self.tables.insert(&table, encode(record)?).await?;
        Ok(decode(stored)?)
    }

    /// Replaces a record if it still carries the stored version.
    ///
    /// The returned record carries the new version.
    #[tracing::instrument(skip(self, record), fields(kind = T::KIND))]
    pub async fn update<T: TableEntity>(&self, record: &T) -> Result<T> {
        record_op("update");
        let expected = record
            .version()
            .cloned()
            .ok_or_else(|| StorageError::VersionRequired {
                kind: T::KIND,
                partition_key: record.partition_key(),
                row_key: record.row_key(),
            })?;
        let table = self.names.table_of::<T>();
        let stored = self
            .tables
            .replace_if_version(&table, encode(record)?, &expected)
            .await?;
        Ok(decode(stored)?)
    }

    /// Inserts or unconditionally replaces a record.
    #[tracing::instrument(skip(self, record), fields(kind = T::KIND))]
    pub async fn upsert<T: TableEntity>(&self, record: &T) -> Result<T> {
        record_op("upsert");
        let table = self.names.table_of::<T>();
        let stored = self.tables.put(&table, encode(record)?).await?;
        Ok(decode(stored)?)
    }

    /// Deletes one record, failing with `NotFound` if it doesn't exist.
    #[tracing::instrument(skip(self), fields(kind = T::KIND))]
    pub async fn delete<T: TableEntity>(&self, partition_key: &str, row_key: &str) -> Result<()> {
        record_op("delete");
        let table = self.names.table_of::<T>();
        self.tables.delete(&table, partition_key, row_key).await
    }

    /// Deletes every record of a kind in one partition.
    #[tracing::instrument(skip(self), fields(kind = T::KIND))]
    pub async fn delete_partition<T: TableEntity>(&self, partition_key: &str) -> Result<usize> {
        record_op("delete_partition");
        let table = self.names.table_of::<T>();
        self.tables.delete_partition(&table, partition_key).await
    }

    /// Stores an image under a generated name that keeps the file extension.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn upload_image(&self, filename: &str, data: Bytes) -> Result<BlobRef> {
        record_op("upload_image");
        let name = generate_name(Some(filename));
        self.blobs.put(IMAGES_CONTAINER, Some(&name), data).await
    }

    /// Loads an image by blob name.
    pub async fn get_image(&self, name: &str) -> Result<Bytes> {
        record_op("get_image");
        self.blobs.get(IMAGES_CONTAINER, name).await
    }

    /// Deletes an image. Deleting a missing image succeeds.
    #[tracing::instrument(skip(self))]
    pub async fn delete_image(&self, name: &str) -> Result<()> {
        record_op("delete_image");
        self.blobs.delete(IMAGES_CONTAINER, name).await
    }

    /// Stores a general file under a generated name.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn upload_file(&self, filename: &str, data: Bytes) -> Result<BlobRef> {
        record_op("upload_file");
        let name = generate_name(Some(filename));
        self.blobs.put(FILES_CONTAINER, Some(&name), data).await
    }

    /// Uploads to the file share and returns the file's URI.
    ///
    /// Returns an empty string when the file share is not supported in the
    /// current mode. Callers must check for it.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn upload_to_file_share(&self, filename: &str, data: Bytes) -> Result<String> {
        record_op("upload_to_file_share");
        match &self.file_share {
            Capability::Supported(share) => {
                let name = generate_name(Some(filename));
                let blob = share.upload(UPLOADS_SHARE, Some(&name), data).await?;
                Ok(blob.uri())
            }
            Capability::Unsupported => {
                tracing::warn!(mode = %self.mode, "file share unsupported; upload skipped");
                Ok(String::new())
            }
        }
    }

    /// Serializes a message as JSON and appends it to a queue.
    #[tracing::instrument(skip(self, message))]
    pub async fn send_message<M: Serialize + ?Sized>(&self, queue: &str, message: &M) -> Result<()> {
        record_op("send_message");
        let body = serde_json::to_string(message)?;
        self.queues.send(queue, body).await
    }

    /// Receives and deserializes the oldest visible message of a queue.
    ///
    /// Delivery is at-least-once; check [`Received::dequeue_count`]. A body
    /// that fails to decode has already been removed from the queue; it is
    /// logged with its id and returned as a `Serialization` error.
    #[tracing::instrument(skip(self))]
    pub async fn receive_message<M: DeserializeOwned>(
        &self,
        queue: &str,
    ) -> Result<Option<Received<M>>> {
        record_op("receive_message");
        let Some(message) = self.queues.receive_one(queue).await? else {
            return Ok(None);
        };
        let body = match serde_json::from_str(&message.body) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    queue,
                    message_id = %message.id,
                    dequeue_count = message.dequeue_count,
                    error = %e,
                    "dropping undecodable queue message"
                );
                return Err(e.into());
            }
        };
        Ok(Some(Received {
            id: message.id,
            body,
            dequeue_count: message.dequeue_count,
        }))
    }
}

#[cfg(test)]
mod tests {
    use entity_store::{CodecError, EntityKey, PropertyReader, PropertyWriter, VersionToken};
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        owner: String,
        id: String,
        text: String,
        version: Option<VersionToken>,
    }

    impl Note {
        fn new(owner: &str, id: &str, text: &str) -> Self {
            Self {
                owner: owner.to_string(),
                id: id.to_string(),
                text: text.to_string(),
                version: None,
            }
        }
    }

    impl TableEntity for Note {
        const KIND: &'static str = "Note";

        fn partition_key(&self) -> String {
            self.owner.clone()
        }

        fn row_key(&self) -> String {
            self.id.clone()
        }

        fn version(&self) -> Option<&VersionToken> {
            self.version.as_ref()
        }

        fn set_version(&mut self, version: Option<VersionToken>) {
            self.version = version;
        }

        fn write_properties(&self, props: &mut PropertyWriter) -> std::result::Result<(), CodecError> {
            props.put_required("Text", &self.text)?;
            Ok(())
        }

        fn read_properties(
            key: &EntityKey,
            props: &PropertyReader<'_>,
        ) -> std::result::Result<Self, CodecError> {
            Ok(Self {
                owner: key.partition_key.clone(),
                id: key.row_key.clone(),
                text: props.string("Text")?,
                version: None,
            })
        }
    }

    async fn storage() -> Storage {
        Storage::with_backends(
            StorageMode::Development,
            Backends::in_memory(),
            TableNames::default().register::<Note>(),
        )
        .await
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let storage = storage().await;

        let added = storage.add(&Note::new("alice", "n1", "hello")).await.unwrap();
        assert!(added.version.is_some());

        let loaded: Note = storage.get("alice", "n1").await.unwrap();
        assert_eq!(loaded, added);

        let mut changed = loaded.clone();
        changed.text = "bye".to_string();
        let updated = storage.update(&changed).await.unwrap();
        assert_ne!(updated.version, loaded.version);

        storage.delete::<Note>("alice", "n1").await.unwrap();
        assert!(storage.find::<Note>("alice", "n1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_without_version_is_rejected() {
        let storage = storage().await;
        storage.add(&Note::new("alice", "n1", "hello")).await.unwrap();

        let result = storage.update(&Note::new("alice", "n1", "bye")).await;
        assert!(matches!(result, Err(StorageError::VersionRequired { .. })));
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let storage = storage().await;
        let first = storage.add(&Note::new("alice", "n1", "a")).await.unwrap();
        storage.update(&first).await.unwrap();

        let result = storage.update(&first).await;
        assert!(matches!(
            result,
            Err(StorageError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let storage = storage().await;
        let result = storage.get::<Note>("alice", "nope").await;
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn partition_queries_and_batch_delete() {
        let storage = storage().await;
        for (owner, id) in [("alice", "1"), ("alice", "2"), ("bob", "1")] {
            storage.add(&Note::new(owner, id, "x")).await.unwrap();
        }

        assert_eq!(storage.get_all::<Note>().await.unwrap().len(), 3);
        assert_eq!(storage.get_partition::<Note>("alice").await.unwrap().len(), 2);
        assert_eq!(storage.delete_partition::<Note>("alice").await.unwrap(), 2);
        assert_eq!(storage.get_all::<Note>().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scans_skip_undecodable_entities() {
        let tables = Arc::new(InMemoryTableStore::new());
        let backends = Backends {
            tables: tables.clone(),
            ..Backends::in_memory()
        };
        let storage = Storage::with_backends(
            StorageMode::Development,
            backends,
            TableNames::default().register::<Note>(),
        )
        .await;

        storage.add(&Note::new("alice", "good", "ok")).await.unwrap();
        let broken = entity_store::Entity::builder()
            .partition_key("alice")
            .row_key("bad")
            .property("Text", 42i64)
            .build();
        tables.insert("Notes", broken).await.unwrap();

        let notes = storage.get_partition::<Note>("alice").await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id, "good");
    }

    #[tokio::test]
    async fn development_mode_has_no_file_share() {
        let storage = storage().await;
        assert!(!storage.file_share_supported());

        let uri = storage
            .upload_to_file_share("report.pdf", Bytes::from_static(b"%PDF"))
            .await
            .unwrap();
        assert!(uri.is_empty());
    }

    #[tokio::test]
    async fn images_keep_their_extension() {
        let storage = storage().await;
        let blob = storage
            .upload_image("Cat.PNG", Bytes::from_static(b"png"))
            .await
            .unwrap();
        assert_eq!(blob.container, IMAGES_CONTAINER);
        assert!(blob.name.ends_with(".png"));
        assert_eq!(storage.get_image(&blob.name).await.unwrap(), "png".as_bytes());

        storage.delete_image(&blob.name).await.unwrap();
        storage.delete_image(&blob.name).await.unwrap();
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    #[tokio::test]
    async fn messages_round_trip_as_json() {
        let storage = storage().await;
        storage.send_message(ORDERS_QUEUE, &Ping { n: 1 }).await.unwrap();

        let received = storage
            .receive_message::<Ping>(ORDERS_QUEUE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.body, Ping { n: 1 });
        assert!(!received.is_redelivery());
        assert!(
            storage
                .receive_message::<Ping>(ORDERS_QUEUE)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn undecodable_message_is_dropped_and_the_queue_moves_on() {
        let storage = storage().await;
        storage
            .send_message(ORDERS_QUEUE, &serde_json::json!({ "bogus": 1 }))
            .await
            .unwrap();
        storage.send_message(ORDERS_QUEUE, &Ping { n: 2 }).await.unwrap();

        assert!(matches!(
            storage.receive_message::<Ping>(ORDERS_QUEUE).await,
            Err(StorageError::Serialization(_))
        ));
        let next = storage
            .receive_message::<Ping>(ORDERS_QUEUE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.body, Ping { n: 2 });
    }

    #[tokio::test]
    async fn development_report_skips_file_share() {
        let storage = storage().await;
        let report = storage.provisioning_report();
        assert!(report.is_healthy());
        assert!(report.get(ResourceKind::Table, "Notes").is_some());
        assert!(report.get(ResourceKind::Table, "Products").is_some());
        assert!(matches!(
            report
                .get(ResourceKind::FileShare, UPLOADS_SHARE)
                .unwrap()
                .outcome,
            crate::ProvisionOutcome::Skipped(_)
        ));
    }
}
