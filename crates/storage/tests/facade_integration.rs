//! Facade behavior across backend combinations: degraded file share,
//! provisioning failures and optimistic concurrency.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use entity_store::{
    CodecError, EntityKey, InMemoryBlobStore, InMemoryQueueStore, InMemoryTableStore,
    LocalBlobStore, PropertyReader, PropertyWriter, TableEntity, VersionToken,
};
use storage::{
    Backends, ProvisionOutcome, ResourceKind, Storage, StorageConfig, StorageError, StorageMode,
    TableNames, UPLOADS_SHARE,
};

#[derive(Debug, Clone, PartialEq)]
struct Counter {
    name: String,
    value: i64,
    version: Option<VersionToken>,
}

impl TableEntity for Counter {
    const KIND: &'static str = "Counter";

    fn partition_key(&self) -> String {
        "counters".to_string()
    }

    fn row_key(&self) -> String {
        self.name.clone()
    }

    fn version(&self) -> Option<&VersionToken> {
        self.version.as_ref()
    }

    fn set_version(&mut self, version: Option<VersionToken>) {
        self.version = version;
    }

    fn write_properties(&self, props: &mut PropertyWriter) -> Result<(), CodecError> {
        props.put("Value", self.value);
        Ok(())
    }

    fn read_properties(key: &EntityKey, props: &PropertyReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            name: key.row_key.clone(),
            value: props.i64("Value")?,
            version: None,
        })
    }
}

fn counter(name: &str) -> Counter {
    Counter {
        name: name.to_string(),
        value: 0,
        version: None,
    }
}

fn temp_root() -> PathBuf {
    std::env::temp_dir().join(format!("storage-facade-{}", uuid::Uuid::new_v4()))
}

async fn production_with_local_share(root: &PathBuf) -> Storage {
    let backends = Backends {
        file_share: Some(Arc::new(LocalBlobStore::new(root.join("share")))),
        ..Backends::in_memory()
    };
    Storage::with_backends(
        StorageMode::Production,
        backends,
        TableNames::default().register::<Counter>(),
    )
    .await
}

#[tokio::test]
async fn connect_with_development_string_degrades_file_share() {
    let storage = Storage::connect(&StorageConfig::development()).await.unwrap();

    assert_eq!(storage.mode(), StorageMode::Development);
    assert!(!storage.file_share_supported());
    assert_eq!(
        storage
            .upload_to_file_share("a.txt", Bytes::from_static(b"a"))
            .await
            .unwrap(),
        ""
    );

    // Other backends keep working.
    let blob = storage
        .upload_file("a.txt", Bytes::from_static(b"a"))
        .await
        .unwrap();
    assert!(blob.name.ends_with(".txt"));
}

#[tokio::test]
async fn connect_rejects_unknown_connection_strings() {
    let config = StorageConfig {
        connection_string: "DefaultEndpointsProtocol=https".to_string(),
        ..StorageConfig::default()
    };
    let result = Storage::connect(&config).await;
    assert!(matches!(result, Err(StorageError::Configuration(_))));
}

#[tokio::test]
async fn production_file_share_returns_uri() {
    let root = temp_root();
    let storage = production_with_local_share(&root).await;

    assert!(storage.file_share_supported());
    let report = storage.provisioning_report();
    assert_eq!(
        report.get(ResourceKind::FileShare, UPLOADS_SHARE).unwrap().outcome,
        ProvisionOutcome::Created
    );

    let uri = storage
        .upload_to_file_share("notes.md", Bytes::from_static(b"# hi"))
        .await
        .unwrap();
    assert!(uri.starts_with("uploads/"));
    assert!(uri.ends_with(".md"));

    let _ = tokio::fs::remove_dir_all(&root).await;
}

#[tokio::test]
async fn development_mode_ignores_a_supplied_file_share() {
    let root = temp_root();
    let backends = Backends {
        file_share: Some(Arc::new(LocalBlobStore::new(&root))),
        ..Backends::in_memory()
    };
    let storage =
        Storage::with_backends(StorageMode::Development, backends, TableNames::default()).await;

    assert!(!storage.file_share_supported());
    assert!(!tokio::fs::try_exists(root.join(UPLOADS_SHARE)).await.unwrap());
}

#[tokio::test]
async fn provisioning_failures_do_not_prevent_construction() {
    let tables = InMemoryTableStore::new();
    tables.set_fail_on_provision(true);
    let queues = InMemoryQueueStore::new();
    queues.set_fail_on_provision(true);

    let backends = Backends {
        tables: Arc::new(tables.clone()),
        blobs: Arc::new(InMemoryBlobStore::new()),
        queues: Arc::new(queues),
        file_share: None,
    };
    let storage =
        Storage::with_backends(StorageMode::Development, backends, TableNames::default()).await;

    let report = storage.provisioning_report();
    assert!(!report.is_healthy());
    assert_eq!(report.failures().count(), 4);
    assert_eq!(
        report.get(ResourceKind::Container, "images").unwrap().outcome,
        ProvisionOutcome::Created
    );

    // Images still work even though tables are down.
    storage
        .upload_image("x.jpg", Bytes::from_static(b"jpg"))
        .await
        .unwrap();

    // Table operations surface the missing table.
    let result = storage.get_all::<Counter>().await;
    assert!(matches!(result, Err(StorageError::TableNotFound(_))));
}

#[tokio::test]
async fn concurrent_updates_with_the_same_version_have_one_winner() {
    let root = temp_root();
    let storage = production_with_local_share(&root).await;
    let stored = storage.add(&counter("hits")).await.unwrap();

    let mut a = stored.clone();
    a.value = 1;
    let mut b = stored.clone();
    b.value = 2;

    let (ra, rb) = tokio::join!(storage.update(&a), storage.update(&b));
    let winners = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);

    let loser = if ra.is_ok() { rb } else { ra };
    assert!(loser.unwrap_err().is_conflict());

    let current: Counter = storage.get("counters", "hits").await.unwrap();
    assert!(current.value == 1 || current.value == 2);

    let _ = tokio::fs::remove_dir_all(&root).await;
}

#[tokio::test]
async fn unmapped_kinds_are_not_provisioned() {
    let storage = Storage::development().await;
    assert_eq!(storage.names().table_of::<Counter>(), "Counters");

    let result = storage.add(&counter("hits")).await;
    assert!(matches!(result, Err(StorageError::TableNotFound(_))));
}

#[tokio::test]
async fn upsert_overwrites_without_version() {
    let root = temp_root();
    let storage = production_with_local_share(&root).await;

    storage.add(&counter("hits")).await.unwrap();
    let mut fresh = counter("hits");
    fresh.value = 9;
    let stored = storage.upsert(&fresh).await.unwrap();
    assert_eq!(stored.value, 9);

    let again = storage.add(&counter("hits")).await;
    assert!(again.unwrap_err().is_conflict());

    let _ = tokio::fs::remove_dir_all(&root).await;
}
