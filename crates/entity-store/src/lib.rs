//! Keyed entity storage primitives.
//!
//! Records are mapped onto a `(partition key, row key, property bag)` shape
//! by the [`TableEntity`] codec and persisted through one of four backend
//! clients: tables, blobs, queues and file shares. Each backend has an
//! in-memory implementation for development and tests; tables and queues
//! also have a PostgreSQL implementation, blobs and file shares a
//! filesystem one.

pub mod blob;
pub mod codec;
pub mod entity;
pub mod error;
pub mod file_share;
pub mod local;
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod table;

pub use blob::{BlobRef, BlobStore, generate_name};
pub use codec::{
    CodecError, PropertyReader, PropertyWriter, TableEntity, decode, encode, parse_key_uuid,
};
pub use entity::{Entity, EntityBuilder, EntityKey, Properties, PropertyValue, VersionToken};
pub use error::{Result, StorageError};
pub use file_share::{Capability, FileShare};
pub use local::LocalBlobStore;
pub use memory::{InMemoryBlobStore, InMemoryQueueStore, InMemoryTableStore};
pub use postgres::{PostgresQueueStore, PostgresTableStore};
pub use queue::{QueueMessage, QueueStore};
pub use table::{EntityStream, TableStore, TableStoreExt};
