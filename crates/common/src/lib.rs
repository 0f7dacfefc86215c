//! Identifiers shared by the storage and shop crates.

mod types;

pub use types::{CartLineId, OrderId, ProductId, UserId};
