//! Storage facade.
//!
//! [`Storage`] is the single entry point to the table, blob, queue and
//! file-share backends. It is built once from a [`StorageConfig`], provisions
//! every resource it knows about on a best-effort basis and records the result
//! in a [`ProvisioningReport`]. In development mode the file share is not
//! available; the facade keeps working and reports the missing capability
//! through sentinel values instead of errors.

pub mod config;
pub mod facade;
pub mod names;
pub mod provisioning;

pub use config::{DEVELOPMENT_CONNECTION_STRING, StorageConfig, StorageMode};
pub use entity_store::{
    BlobRef, Capability, Entity, EntityKey, Result, StorageError, TableEntity, VersionToken,
};
pub use facade::{Backends, Received, Storage};
pub use names::{FILES_CONTAINER, IMAGES_CONTAINER, ORDERS_QUEUE, TableNames, UPLOADS_SHARE};
pub use provisioning::{ProvisionOutcome, ProvisionedResource, ProvisioningReport, ResourceKind};
