//! Physical names of the resources the facade provisions.

use std::collections::BTreeMap;

use entity_store::TableEntity;

/// Blob container for product images.
pub const IMAGES_CONTAINER: &str = "images";

/// Blob container for general file uploads.
pub const FILES_CONTAINER: &str = "files";

/// Queue carrying order notifications.
pub const ORDERS_QUEUE: &str = "orders";

/// File share for uploads that need SMB-style access.
pub const UPLOADS_SHARE: &str = "uploads";

/// Maps logical entity kinds to physical table names.
///
/// Kinds without an explicit mapping use `<Kind>s`. Only mapped tables are
/// provisioned at startup.
#[derive(Debug, Clone)]
pub struct TableNames {
    mapping: BTreeMap<String, String>,
}

impl TableNames {
    /// Creates a mapping with no entries.
    pub fn empty() -> Self {
        Self {
            mapping: BTreeMap::new(),
        }
    }

    /// Adds or replaces the table for a kind.
    pub fn with(mut self, kind: impl Into<String>, table: impl Into<String>) -> Self {
        self.mapping.insert(kind.into(), table.into());
        self
    }

    /// Maps a kind to its default `<Kind>s` table so it gets provisioned.
    pub fn register<T: TableEntity>(self) -> Self {
        let table = format!("{}s", T::KIND);
        self.with(T::KIND, table)
    }

    /// Returns the physical table for a kind.
    pub fn table_for(&self, kind: &str) -> String {
        self.mapping
            .get(kind)
            .cloned()
            .unwrap_or_else(|| format!("{kind}s"))
    }

    /// Returns the physical table for a record type.
    pub fn table_of<T: TableEntity>(&self) -> String {
        self.table_for(T::KIND)
    }

    /// Returns every mapped table, without duplicates.
    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.mapping.values().cloned().collect();
        tables.sort();
        tables.dedup();
        tables
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self::empty()
            .with("Product", "Products")
            .with("CartLine", "CartItems")
            .with("Order", "Orders")
    }
}
