use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Reference to a stored blob or file-share file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    pub container: String,
    pub name: String,
}

impl BlobRef {
    pub fn new(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
        }
    }

    /// Returns the `container/name` URI callers persist as the reference.
    pub fn uri(&self) -> String {
        format!("{}/{}", self.container, self.name)
    }

    /// Parses a URI produced by [`BlobRef::uri`].
    pub fn parse(uri: &str) -> Option<Self> {
        let (container, name) = uri.split_once('/')?;
        if container.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(container, name))
    }
}

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}

/// Generates a unique blob name, keeping the extension of `declared` if any.
pub fn generate_name(declared: Option<&str>) -> String {
    let id = Uuid::new_v4().simple().to_string();
    let extension = declared
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    match extension {
        Some(ext) => format!("{id}.{}", ext.to_ascii_lowercase()),
        None => id,
    }
}

/// Named binary objects grouped into containers.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Creates a container. Returns `true` if it was created.
    async fn create_container_if_not_exists(&self, container: &str) -> Result<bool>;

    /// Stores `data`, overwriting any blob with the same name.
    ///
    /// When `name` is `None` a unique name is generated.
    async fn put(&self, container: &str, name: Option<&str>, data: Bytes) -> Result<BlobRef>;

    /// Reads a blob, failing with `BlobNotFound` if it doesn't exist.
    async fn get(&self, container: &str, name: &str) -> Result<Bytes>;

    /// Deletes a blob. Deleting a missing blob succeeds.
    async fn delete(&self, container: &str, name: &str) -> Result<()>;
}
