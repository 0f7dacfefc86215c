//! Checkout: validating a cart, creating orders and decrementing stock.

pub mod coordinator;
pub mod outcome;
pub mod state;

pub use coordinator::OrderCoordinator;
pub use outcome::{AbortReason, CheckoutOutcome, CheckoutReceipt, StockWarning};
pub use state::CheckoutState;
