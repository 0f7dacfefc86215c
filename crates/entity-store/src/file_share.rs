use async_trait::async_trait;
use bytes::Bytes;

use crate::{BlobRef, Result};

/// Whether a backend is available in the current storage mode.
///
/// Call sites match on the tag instead of holding a nullable client.
#[derive(Debug, Clone)]
pub enum Capability<C> {
    Supported(C),
    Unsupported,
}

impl<C> Capability<C> {
    pub fn is_supported(&self) -> bool {
        matches!(self, Capability::Supported(_))
    }

    /// Returns the client if supported.
    pub fn as_supported(&self) -> Option<&C> {
        match self {
            Capability::Supported(client) => Some(client),
            Capability::Unsupported => None,
        }
    }

    pub fn map<D>(self, f: impl FnOnce(C) -> D) -> Capability<D> {
        match self {
            Capability::Supported(client) => Capability::Supported(f(client)),
            Capability::Unsupported => Capability::Unsupported,
        }
    }
}

impl<C> From<Option<C>> for Capability<C> {
    fn from(client: Option<C>) -> Self {
        match client {
            Some(client) => Capability::Supported(client),
            None => Capability::Unsupported,
        }
    }
}

/// SMB-style file shares. Same shape as [`crate::BlobStore`], but not every
/// storage mode provides one.
#[async_trait]
pub trait FileShare: Send + Sync {
    /// Creates a share. Returns `true` if it was created.
    async fn create_share_if_not_exists(&self, share: &str) -> Result<bool>;

    /// Uploads a file, generating a unique name when `name` is `None`.
    async fn upload(&self, share: &str, name: Option<&str>, data: Bytes) -> Result<BlobRef>;

    /// Downloads a file, failing with `BlobNotFound` if it doesn't exist.
    async fn download(&self, share: &str, name: &str) -> Result<Bytes>;

    /// Deletes a file. Deleting a missing file succeeds.
    async fn delete(&self, share: &str, name: &str) -> Result<()>;
}
