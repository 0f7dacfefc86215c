//! Checkout results.

use common::{OrderId, ProductId};

use crate::order::Order;

/// Why a checkout stopped before creating any order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    EmptyCart,
    ProductMissing {
        product_id: ProductId,
    },
    /// `requested` is the total across every cart line for the product.
    InsufficientStock {
        product_id: ProductId,
        requested: u64,
        available: u32,
    },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::EmptyCart => write!(f, "cart is empty"),
            AbortReason::ProductMissing { product_id } => {
                write!(f, "product {product_id} no longer exists")
            }
            AbortReason::InsufficientStock {
                product_id,
                requested,
                available,
            } => write!(
                f,
                "insufficient stock for {product_id}: requested {requested}, available {available}"
            ),
        }
    }
}

/// An order whose stock decrement was skipped because another writer
/// updated the product first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockWarning {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
}

impl std::fmt::Display for StockWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "order {} created but stock for {} was not decremented by {}",
            self.order_id, self.product_id, self.quantity
        )
    }
}

/// Result of a completed checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutReceipt {
    /// One order per cart line, in cart order.
    pub orders: Vec<Order>,
    pub warnings: Vec<StockWarning>,
    /// False if the orders stand but clearing the cart failed.
    pub cart_cleared: bool,
}

impl CheckoutReceipt {
    /// Returns true if every stock decrement applied and the cart was cleared.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.cart_cleared
    }
}

/// Outcome of [`crate::OrderCoordinator::place_order`].
#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    Completed(CheckoutReceipt),
    Aborted(AbortReason),
}

impl CheckoutOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CheckoutOutcome::Completed(_))
    }

    pub fn receipt(&self) -> Option<&CheckoutReceipt> {
        match self {
            CheckoutOutcome::Completed(receipt) => Some(receipt),
            CheckoutOutcome::Aborted(_) => None,
        }
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            CheckoutOutcome::Completed(_) => None,
            CheckoutOutcome::Aborted(reason) => Some(reason),
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            CheckoutOutcome::Completed(receipt) if receipt.is_clean() => "completed",
            CheckoutOutcome::Completed(_) => "completed_with_warnings",
            CheckoutOutcome::Aborted(_) => "aborted",
        }
    }
}
