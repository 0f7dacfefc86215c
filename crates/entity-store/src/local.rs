//! Filesystem-backed blob store and file share.
//!
//! Containers (or shares) are directories under a root; blobs are files in
//! them. Names are restricted to a single path component.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, instrument};

use crate::blob::generate_name;
use crate::{BlobRef, BlobStore, FileShare, Result, StorageError};

/// A [`BlobStore`] and [`FileShare`] backed by the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Creates a store rooted at `root`. The directory is created lazily by
    /// the first provisioning call.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_component(value: &str) -> Result<()> {
        let valid = !value.is_empty()
            && value != "."
            && value != ".."
            && !value.contains(['/', '\\', '\0']);
        if valid {
            Ok(())
        } else {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid blob path component: {value:?}"),
            )))
        }
    }

    async fn container_dir(&self, container: &str) -> Result<PathBuf> {
        Self::check_component(container)?;
        let dir = self.root.join(container);
        if !fs::try_exists(&dir).await? {
            return Err(StorageError::ContainerNotFound(container.to_string()));
        }
        Ok(dir)
    }

    async fn create_dir(&self, container: &str) -> Result<bool> {
        Self::check_component(container)?;
        let dir = self.root.join(container);
        if fs::try_exists(&dir).await? {
            return Ok(false);
        }
        fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "created container directory");
        Ok(true)
    }

    async fn write(&self, container: &str, name: Option<&str>, data: Bytes) -> Result<BlobRef> {
        let dir = self.container_dir(container).await?;
        let name = match name {
            Some(name) => {
                Self::check_component(name)?;
                name.to_string()
            }
            None => generate_name(None),
        };
        fs::write(dir.join(&name), &data).await?;
        debug!(container, name = %name, size = data.len(), "wrote blob");
        Ok(BlobRef::new(container, name))
    }

    async fn read(&self, container: &str, name: &str) -> Result<Bytes> {
        let dir = self.container_dir(container).await?;
        Self::check_component(name)?;
        match fs::read(dir.join(name)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::BlobNotFound {
                container: container.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, container: &str, name: &str) -> Result<()> {
        let dir = self.container_dir(container).await?;
        Self::check_component(name)?;
        match fs::remove_file(dir.join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn create_container_if_not_exists(&self, container: &str) -> Result<bool> {
        self.create_dir(container).await
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put(&self, container: &str, name: Option<&str>, data: Bytes) -> Result<BlobRef> {
        self.write(container, name, data).await
    }

    async fn get(&self, container: &str, name: &str) -> Result<Bytes> {
        self.read(container, name).await
    }

    async fn delete(&self, container: &str, name: &str) -> Result<()> {
        self.remove(container, name).await
    }
}

#[async_trait]
impl FileShare for LocalBlobStore {
    async fn create_share_if_not_exists(&self, share: &str) -> Result<bool> {
        self.create_dir(share).await
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn upload(&self, share: &str, name: Option<&str>, data: Bytes) -> Result<BlobRef> {
        self.write(share, name, data).await
    }

    async fn download(&self, share: &str, name: &str) -> Result<Bytes> {
        self.read(share, name).await
    }

    async fn delete(&self, share: &str, name: &str) -> Result<()> {
        self.remove(share, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("entity-store-local-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn write_read_delete_blob() {
        let root = temp_root();
        let store = LocalBlobStore::new(&root);
        assert!(store.create_container_if_not_exists("images").await.unwrap());
        assert!(!store.create_container_if_not_exists("images").await.unwrap());

        let reference = BlobStore::put(&store, "images", Some("a.png"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(reference.uri(), "images/a.png");
        assert_eq!(
            BlobStore::get(&store, "images", "a.png").await.unwrap(),
            Bytes::from_static(b"x")
        );

        BlobStore::delete(&store, "images", "a.png").await.unwrap();
        BlobStore::delete(&store, "images", "a.png").await.unwrap();
        assert!(matches!(
            BlobStore::get(&store, "images", "a.png").await,
            Err(StorageError::BlobNotFound { .. })
        ));

        fs::remove_dir_all(root).await.unwrap();
    }

    #[tokio::test]
    async fn file_share_upload_generates_name() {
        let root = temp_root();
        let store = LocalBlobStore::new(&root);
        store.create_share_if_not_exists("uploads").await.unwrap();

        let reference = store
            .upload("uploads", None, Bytes::from_static(b"report"))
            .await
            .unwrap();
        assert_eq!(
            store.download("uploads", &reference.name).await.unwrap(),
            Bytes::from_static(b"report")
        );

        fs::remove_dir_all(root).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let root = temp_root();
        let store = LocalBlobStore::new(&root);
        store.create_container_if_not_exists("files").await.unwrap();

        let result = BlobStore::put(&store, "files", Some("../escape"), Bytes::new()).await;
        assert!(matches!(result, Err(StorageError::Io(_))));

        fs::remove_dir_all(root).await.unwrap();
    }

    #[tokio::test]
    async fn missing_container_is_reported() {
        let store = LocalBlobStore::new(temp_root());
        let result = BlobStore::put(&store, "files", None, Bytes::new()).await;
        assert!(matches!(result, Err(StorageError::ContainerNotFound(_))));
    }
}
