//! Shop error types.

use common::{CartLineId, OrderId, ProductId};
use storage::StorageError;
use thiserror::Error;

use crate::money::Money;
use crate::order::OrderStatus;

/// Errors returned by the cart, catalog, checkout and order services.
#[derive(Debug, Error)]
pub enum ShopError {
    /// A quantity was below one.
    #[error("Quantity must be at least 1, got {0}")]
    InvalidQuantity(i64),

    /// A unit price was zero or negative.
    #[error("Unit price must be positive, got {0}")]
    InvalidPrice(Money),

    #[error("Cart line not found: {0}")]
    CartLineNotFound(CartLineId),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// A stock change would take the quantity below zero.
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u64,
        available: u32,
    },

    #[error("Stock for {0} would overflow")]
    StockOverflow(ProductId),

    /// A price times quantity, or a sum of them, doesn't fit in the
    /// money representation.
    #[error("Amount for {0} is too large")]
    AmountOverflow(ProductId),

    #[error("Invalid order status transition from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    /// Checkout stopped partway through. Orders created before the failure
    /// remain and the cart was not cleared.
    #[error("Checkout interrupted after {orders_created} order(s): {source}")]
    CheckoutInterrupted {
        orders_created: usize,
        #[source]
        source: Box<ShopError>,
    },

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ShopError {
    /// Returns true if the error is a version conflict on an update.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ShopError::Storage(e) if e.is_conflict())
    }
}

/// Convenience type alias for shop results.
pub type Result<T> = std::result::Result<T, ShopError>;
