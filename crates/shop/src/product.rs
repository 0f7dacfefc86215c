//! Catalog products.

use common::ProductId;
use entity_store::{CodecError, EntityKey, PropertyReader, PropertyWriter, TableEntity, VersionToken};

use crate::error::{Result, ShopError};
use crate::money::Money;

/// Partition holding every product.
pub const CATALOG_PARTITION: &str = "catalog";

/// A product in the catalog.
///
/// Stored in partition [`CATALOG_PARTITION`] under its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub stock: u32,
    /// URI of the product image blob, e.g. `images/3f2a….png`.
    pub image_ref: Option<String>,
    pub version: Option<VersionToken>,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            price,
            stock,
            image_ref: None,
            version: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    pub fn in_stock(&self, quantity: u64) -> bool {
        u64::from(self.stock) >= quantity
    }

    /// Removes `quantity` units from stock.
    ///
    /// Fails without changing anything if there isn't enough stock.
    pub fn decrement_stock(&mut self, quantity: u32) -> Result<()> {
        self.stock = self
            .stock
            .checked_sub(quantity)
            .ok_or_else(|| ShopError::InsufficientStock {
                product_id: self.id.clone(),
                requested: u64::from(quantity),
                available: self.stock,
            })?;
        Ok(())
    }

    /// Adds `quantity` units to stock.
    pub fn increment_stock(&mut self, quantity: u32) -> Result<()> {
        self.stock = self
            .stock
            .checked_add(quantity)
            .ok_or_else(|| ShopError::StockOverflow(self.id.clone()))?;
        Ok(())
    }
}

impl TableEntity for Product {
    const KIND: &'static str = "Product";

    fn partition_key(&self) -> String {
        CATALOG_PARTITION.to_string()
    }

    fn row_key(&self) -> String {
        self.id.to_string()
    }

    fn version(&self) -> Option<&VersionToken> {
        self.version.as_ref()
    }

    fn set_version(&mut self, version: Option<VersionToken>) {
        self.version = version;
    }

    fn write_properties(&self, props: &mut PropertyWriter) -> std::result::Result<(), CodecError> {
        if !self.price.is_positive() {
            return Err(CodecError::InvalidValue {
                field: "PriceCents".to_string(),
                reason: format!("unit price must be positive, got {}", self.price),
            });
        }
        props
            .put_required("Name", &self.name)?
            .put("Description", self.description.as_str())
            .put("PriceCents", self.price.cents())
            .put("Stock", self.stock)
            .put_opt("ImageRef", self.image_ref.as_deref());
        Ok(())
    }

    fn read_properties(
        key: &EntityKey,
        props: &PropertyReader<'_>,
    ) -> std::result::Result<Self, CodecError> {
        Ok(Self {
            id: ProductId::new(key.row_key.clone()),
            name: props.string("Name")?,
            description: props.string("Description")?,
            price: Money::from_cents(props.i64("PriceCents")?),
            stock: props.u32("Stock")?,
            image_ref: props.opt_string("ImageRef")?,
            version: None,
        })
    }
}
