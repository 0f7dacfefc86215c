//! Order queries, status changes and queue-driven processing.

use common::{OrderId, UserId};
use storage::{ORDERS_QUEUE, Storage, StorageError};

use crate::error::{Result, ShopError};
use crate::order::{Order, OrderPlaced, OrderStatus};

/// What [`OrderService::process_next`] did with a queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// The order moved from `Submitted` to `Processing`.
    Started(OrderId),
    /// The order was already past `Submitted`; nothing changed.
    AlreadyHandled(OrderId),
    /// The order no longer exists; the message was dropped.
    Missing(OrderId),
}

impl Processed {
    pub fn order_id(&self) -> OrderId {
        match self {
            Processed::Started(id) | Processed::AlreadyHandled(id) | Processed::Missing(id) => *id,
        }
    }
}

/// Reads orders and moves them through their status lifecycle.
#[derive(Debug, Clone)]
pub struct OrderService {
    storage: Storage,
}

impl OrderService {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Returns the user's orders, oldest first.
    pub async fn orders_for_user(&self, user_id: &UserId) -> Result<Vec<Order>> {
        let mut orders = self.storage.get_partition::<Order>(user_id.as_str()).await?;
        orders.sort_by(|a, b| a.ordered_at.cmp(&b.ordered_at).then(a.id.cmp(&b.id)));
        Ok(orders)
    }

    pub async fn get_order(&self, user_id: &UserId, order_id: OrderId) -> Result<Order> {
        self.storage
            .find::<Order>(user_id.as_str(), &order_id.to_string())
            .await?
            .ok_or(ShopError::OrderNotFound(order_id))
    }

    /// Moves an order to a new status if the transition is legal.
    #[tracing::instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn update_status(
        &self,
        user_id: &UserId,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order> {
        let mut order = self.get_order(user_id, order_id).await?;
        if !order.status.can_transition_to(status) {
            return Err(ShopError::InvalidStatusTransition {
                from: order.status,
                to: status,
            });
        }
        let from = order.status;
        order.status = status;
        let stored = self.storage.update(&order).await?;
        tracing::info!(%from, to = %status, "order status changed");
        Ok(stored)
    }

    /// Handles one `OrderPlaced` message from the orders queue.
    ///
    /// Returns `None` if the queue is empty. Messages may be delivered more
    /// than once, so orders that already left `Submitted` are acknowledged
    /// without change.
    #[tracing::instrument(skip(self))]
    pub async fn process_next(&self) -> Result<Option<Processed>> {
        let Some(message) = self
            .storage
            .receive_message::<OrderPlaced>(ORDERS_QUEUE)
            .await?
        else {
            return Ok(None);
        };
        if message.is_redelivery() {
            tracing::debug!(
                order_id = %message.body.order_id,
                dequeue_count = message.dequeue_count,
                "redelivered order message"
            );
        }
        let placed = message.body;

        let Some(mut order) = self
            .storage
            .find::<Order>(placed.user_id.as_str(), &placed.order_id.to_string())
            .await?
        else {
            tracing::warn!(order_id = %placed.order_id, "order for message not found; dropping");
            return Ok(Some(Processed::Missing(placed.order_id)));
        };

        if order.status != OrderStatus::Submitted {
            return Ok(Some(Processed::AlreadyHandled(order.id)));
        }

        order.status = OrderStatus::Processing;
        match self.storage.update(&order).await {
            Ok(_) => {
                metrics::counter!("orders_processed_total").increment(1);
                tracing::info!(order_id = %order.id, "order processing started");
                Ok(Some(Processed::Started(order.id)))
            }
            Err(StorageError::ConcurrencyConflict { .. }) => {
                tracing::debug!(order_id = %order.id, "order changed concurrently; leaving it");
                Ok(Some(Processed::AlreadyHandled(order.id)))
            }
            Err(e) => Err(e.into()),
        }
    }
}
