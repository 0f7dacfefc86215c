//! Cart lines and derived cart views.

use chrono::{DateTime, Utc};
use common::{CartLineId, ProductId, UserId};
use entity_store::{
    CodecError, EntityKey, PropertyReader, PropertyWriter, TableEntity, VersionToken,
    parse_key_uuid,
};

use crate::error::{self, ShopError};
use crate::money::Money;
use crate::product::Product;

/// One product in a user's cart.
///
/// Stored in the user's partition under the line id.
#[derive(Debug, Clone, PartialEq)]
pub struct CartLine {
    pub id: CartLineId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
    pub version: Option<VersionToken>,
}

impl CartLine {
    pub fn new(user_id: UserId, product_id: ProductId, quantity: u32) -> Self {
        Self {
            id: CartLineId::new(),
            user_id,
            product_id,
            quantity,
            added_at: Utc::now(),
            version: None,
        }
    }
}

impl TableEntity for CartLine {
    const KIND: &'static str = "CartLine";

    fn partition_key(&self) -> String {
        self.user_id.to_string()
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

    fn write_properties(&self, props: &mut PropertyWriter) -> Result<(), CodecError> {
        if self.quantity == 0 {
            return Err(CodecError::InvalidValue {
                field: "Quantity".to_string(),
                reason: "quantity must be at least 1".to_string(),
            });
        }
        props
            .put_required("ProductId", self.product_id.as_str())?
            .put("Quantity", self.quantity)
            .put("AddedAt", self.added_at);
        Ok(())
    }

    fn read_properties(key: &EntityKey, props: &PropertyReader<'_>) -> Result<Self, CodecError> {
        let quantity = props.u32("Quantity")?;
        if quantity == 0 {
            return Err(CodecError::InvalidValue {
                field: "Quantity".to_string(),
                reason: "quantity must be at least 1".to_string(),
            });
        }
        Ok(Self {
            id: CartLineId::from_uuid(parse_key_uuid("RowKey", &key.row_key)?),
            user_id: UserId::new(key.partition_key.clone()),
            product_id: ProductId::new(props.string("ProductId")?),
            quantity,
            added_at: props.datetime("AddedAt")?,
            version: None,
        })
    }
}

/// A cart line joined with the current product record.
#[derive(Debug, Clone, PartialEq)]
pub struct CartItem {
    pub line: CartLine,
    pub product: Product,
}

impl CartItem {
    /// Current unit price times quantity.
    ///
    /// Fails with `AmountOverflow` if the subtotal doesn't fit.
    pub fn subtotal(&self) -> error::Result<Money> {
        self.product
            .price
            .checked_multiply(self.line.quantity)
            .ok_or_else(|| ShopError::AmountOverflow(self.product.id.clone()))
    }
}

/// A user's cart with derived totals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CartSummary {
    pub items: Vec<CartItem>,
    pub total: Money,
    pub item_count: u64,
}

impl CartSummary {
    pub fn from_items(items: Vec<CartItem>) -> error::Result<Self> {
        let mut total = Money::zero();
        for item in &items {
            total = total
                .checked_add(item.subtotal()?)
                .ok_or_else(|| ShopError::AmountOverflow(item.product.id.clone()))?;
        }
        let item_count = items.iter().map(|item| u64::from(item.line.quantity)).sum();
        Ok(Self {
            items,
            total,
            item_count,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
