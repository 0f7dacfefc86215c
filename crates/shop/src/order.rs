//! Orders and their status lifecycle.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use entity_store::{
    CodecError, EntityKey, PropertyReader, PropertyWriter, TableEntity, VersionToken,
    parse_key_uuid,
};
use serde::{Deserialize, Serialize};

use crate::error::{self, ShopError};
use crate::money::Money;
use crate::product::Product;

/// The status of an order.
///
/// State transitions:
/// ```text
/// Submitted ──► Processing ──► Shipped ──► Delivered
///     │             │
///     └─────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Created at checkout.
    #[default]
    Submitted,

    /// Picked up by order processing.
    Processing,

    Shipped,

    /// Terminal.
    Delivered,

    /// Terminal.
    Cancelled,
}

impl OrderStatus {
    /// Returns true if the order may move from this status to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Submitted, OrderStatus::Processing)
                | (OrderStatus::Processing, OrderStatus::Shipped)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
                | (OrderStatus::Submitted, OrderStatus::Cancelled)
                | (OrderStatus::Processing, OrderStatus::Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Submitted => "Submitted",
            OrderStatus::Processing => "Processing",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Submitted" => Ok(OrderStatus::Submitted),
            "Processing" => Ok(OrderStatus::Processing),
            "Shipped" => Ok(OrderStatus::Shipped),
            "Delivered" => Ok(OrderStatus::Delivered),
            "Cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status {other:?}")),
        }
    }
}

/// One ordered product.
///
/// Stored in the user's partition under the order id. Name and price are
/// copied from the product when the order is created and never change;
/// only `status` is updated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_price: Money,
    pub status: OrderStatus,
    pub ordered_at: DateTime<Utc>,
    pub version: Option<VersionToken>,
}

impl Order {
    /// Creates a submitted order from a product snapshot.
    ///
    /// Fails with `AmountOverflow` if the total price doesn't fit.
    pub fn submitted(user_id: UserId, product: &Product, quantity: u32) -> error::Result<Self> {
        let total_price = product
            .price
            .checked_multiply(quantity)
            .ok_or_else(|| ShopError::AmountOverflow(product.id.clone()))?;
        Ok(Self {
            id: OrderId::new(),
            user_id,
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            quantity,
            unit_price: product.price,
            total_price,
            status: OrderStatus::Submitted,
            ordered_at: Utc::now(),
            version: None,
        })
    }
}

impl TableEntity for Order {
    const KIND: &'static str = "Order";

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
        props
            .put_required("ProductId", self.product_id.as_str())?
            .put_required("ProductName", &self.product_name)?
            .put("Quantity", self.quantity)
            .put("UnitPriceCents", self.unit_price.cents())
            .put("TotalPriceCents", self.total_price.cents())
            .put("Status", self.status.as_str())
            .put("OrderedAt", self.ordered_at);
        Ok(())
    }

    fn read_properties(key: &EntityKey, props: &PropertyReader<'_>) -> Result<Self, CodecError> {
        let status = props
            .string("Status")?
            .parse()
            .map_err(|reason| CodecError::InvalidValue {
                field: "Status".to_string(),
                reason,
            })?;
        Ok(Self {
            id: OrderId::from_uuid(parse_key_uuid("RowKey", &key.row_key)?),
            user_id: UserId::new(key.partition_key.clone()),
            product_id: ProductId::new(props.string("ProductId")?),
            product_name: props.string("ProductName")?,
            quantity: props.u32("Quantity")?,
            unit_price: Money::from_cents(props.i64("UnitPriceCents")?),
            total_price: Money::from_cents(props.i64("TotalPriceCents")?),
            status,
            ordered_at: props.datetime("OrderedAt")?,
            version: None,
        })
    }
}

/// Queue message published for every order created at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
}

impl From<&Order> for OrderPlaced {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id.clone(),
            product_id: order.product_id.clone(),
            quantity: order.quantity,
        }
    }
}
