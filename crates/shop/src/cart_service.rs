//! Per-user cart operations.

use common::{CartLineId, ProductId, UserId};
use storage::{Storage, StorageError};

use crate::cart::{CartItem, CartLine, CartSummary};
use crate::error::{Result, ShopError};
use crate::product::{CATALOG_PARTITION, Product};

/// Maintains cart lines in each user's partition.
///
/// Stock is not checked here; checkout validates it.
#[derive(Debug, Clone)]
pub struct CartService {
    storage: Storage,
}

impl CartService {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Returns the user's cart lines in the order they were added.
    pub async fn lines(&self, user_id: &UserId) -> Result<Vec<CartLine>> {
        let mut lines = self
            .storage
            .get_partition::<CartLine>(user_id.as_str())
            .await?;
        lines.sort_by(|a, b| a.added_at.cmp(&b.added_at).then(a.id.cmp(&b.id)));
        Ok(lines)
    }

    /// Joins the user's cart lines with the current product records.
    ///
    /// Lines whose product is gone or can't be loaded are left out.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_items(&self, user_id: &UserId) -> Result<Vec<CartItem>> {
        let lines = self.lines(user_id).await?;
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            match self
                .storage
                .find::<Product>(CATALOG_PARTITION, line.product_id.as_str())
                .await
            {
                Ok(Some(product)) => items.push(CartItem { line, product }),
                Ok(None) => {
                    tracing::debug!(product_id = %line.product_id, "omitting cart line for missing product")
                }
                Err(e) => tracing::debug!(
                    product_id = %line.product_id,
                    error = %e,
                    "omitting cart line whose product failed to load"
                ),
            }
        }
        Ok(items)
    }

    /// Returns the cart with derived totals.
    pub async fn summary(&self, user_id: &UserId) -> Result<CartSummary> {
        CartSummary::from_items(self.list_items(user_id).await?)
    }

    /// Adds a product to the cart, merging with an existing line for it.
    #[tracing::instrument(skip(self), fields(user_id = %user_id, product_id = %product_id))]
    pub async fn add_item(
        &self,
        user_id: &UserId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<CartLine> {
        if quantity == 0 {
            return Err(ShopError::InvalidQuantity(0));
        }
        if self
            .storage
            .find::<Product>(CATALOG_PARTITION, product_id.as_str())
            .await?
            .is_none()
        {
            return Err(ShopError::ProductNotFound(product_id.clone()));
        }

        let existing = self
            .lines(user_id)
            .await?
            .into_iter()
            .find(|line| &line.product_id == product_id);

        let line = match existing {
            Some(mut line) => {
                line.quantity = line
                    .quantity
                    .checked_add(quantity)
                    .ok_or(ShopError::InvalidQuantity(i64::from(quantity)))?;
                self.storage.update(&line).await?
            }
            None => {
                let line = CartLine::new(user_id.clone(), product_id.clone(), quantity);
                self.storage.add(&line).await?
            }
        };

        tracing::info!(line_id = %line.id, quantity = line.quantity, "cart line saved");
        Ok(line)
    }

    /// Sets a line's quantity. Zero or less removes the line and returns `None`.
    #[tracing::instrument(skip(self), fields(user_id = %user_id, line_id = %line_id))]
    pub async fn update_quantity(
        &self,
        user_id: &UserId,
        line_id: CartLineId,
        quantity: i64,
    ) -> Result<Option<CartLine>> {
        if quantity <= 0 {
            self.remove_item(user_id, line_id).await?;
            return Ok(None);
        }
        let quantity = u32::try_from(quantity).map_err(|_| ShopError::InvalidQuantity(quantity))?;

        let mut line = self
            .storage
            .find::<CartLine>(user_id.as_str(), &line_id.to_string())
            .await?
            .ok_or(ShopError::CartLineNotFound(line_id))?;
        line.quantity = quantity;
        Ok(Some(self.storage.update(&line).await?))
    }

    /// Removes one line from the cart.
    #[tracing::instrument(skip(self), fields(user_id = %user_id, line_id = %line_id))]
    pub async fn remove_item(&self, user_id: &UserId, line_id: CartLineId) -> Result<()> {
        match self
            .storage
            .delete::<CartLine>(user_id.as_str(), &line_id.to_string())
            .await
        {
            Ok(()) => Ok(()),
            Err(StorageError::NotFound { .. }) => Err(ShopError::CartLineNotFound(line_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Empties the cart in one batch. Returns the number of lines removed.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn clear(&self, user_id: &UserId) -> Result<usize> {
        let removed = self
            .storage
            .delete_partition::<CartLine>(user_id.as_str())
            .await?;
        tracing::info!(removed, "cart cleared");
        Ok(removed)
    }

    /// Total quantity across all of the user's lines.
    pub async fn item_count(&self, user_id: &UserId) -> Result<u64> {
        Ok(self
            .lines(user_id)
            .await?
            .iter()
            .map(|line| u64::from(line.quantity))
            .sum())
    }
}
