//! Cart, catalog, checkout and order processing.
//!
//! Every service works through the [`storage::Storage`] facade:
//! - [`CartService`] keeps cart lines in the user's partition
//! - [`CatalogService`] manages products and their images
//! - [`OrderCoordinator`] turns a cart into orders and decrements stock
//! - [`OrderService`] reads orders and advances their status
//!
//! Checkout is not atomic. See [`OrderCoordinator`] for what can be left
//! behind when it races or fails partway through.

pub mod cart;
pub mod cart_service;
pub mod catalog;
pub mod checkout;
pub mod error;
pub mod money;
pub mod order;
pub mod orders;
pub mod product;

pub use cart::{CartItem, CartLine, CartSummary};
pub use cart_service::CartService;
pub use catalog::{CatalogService, NewProduct, Upload};
pub use checkout::{
    AbortReason, CheckoutOutcome, CheckoutReceipt, CheckoutState, OrderCoordinator, StockWarning,
};
pub use error::{Result, ShopError};
pub use money::Money;
pub use order::{Order, OrderPlaced, OrderStatus};
pub use orders::{OrderService, Processed};
pub use product::{CATALOG_PARTITION, Product};
