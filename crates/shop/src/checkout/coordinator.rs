//! Checkout coordinator: cart lines to orders.

use std::collections::HashMap;
use std::time::Instant;

use common::{ProductId, UserId};
use storage::{ORDERS_QUEUE, Storage, StorageError};

use crate::cart::CartLine;
use crate::cart_service::CartService;
use crate::checkout::outcome::{AbortReason, CheckoutOutcome, CheckoutReceipt, StockWarning};
use crate::checkout::state::CheckoutState;
use crate::error::{Result, ShopError};
use crate::order::{Order, OrderPlaced};
use crate::product::{CATALOG_PARTITION, Product};

/// Latest known product records, keyed by id.
type Snapshot = HashMap<ProductId, Product>;

enum Validation {
    Ready(Snapshot),
    Rejected(AbortReason),
}

/// Tracks the state of one checkout.
#[derive(Debug, Default)]
struct Checkout {
    state: CheckoutState,
}

impl Checkout {
    fn advance(&mut self, next: CheckoutState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal checkout transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(from = %self.state, to = %next, "checkout state changed");
        self.state = next;
    }
}

/// Converts a user's cart into orders and decrements stock.
///
/// Checkout is not atomic across lines. Each line creates its order, then
/// decrements stock guarded by the product's version token. A decrement
/// that loses a race is skipped and reported as a [`StockWarning`]; the
/// order stays `Submitted` and nothing is retried or rolled back. An
/// unexpected failure stops the loop: orders already created stay, the
/// remaining lines stay in the cart and the cart is not cleared.
#[derive(Debug, Clone)]
pub struct OrderCoordinator {
    storage: Storage,
    carts: CartService,
}

impl OrderCoordinator {
    pub fn new(storage: Storage) -> Self {
        Self {
            carts: CartService::new(storage.clone()),
            storage,
        }
    }

    /// Places one order per cart line for the user.
    ///
    /// Returns `Aborted` without writing anything if the cart is empty, a
    /// product is gone, or stock can't cover the requested quantity. A line
    /// total too large to represent fails with `AmountOverflow`, also before
    /// any write.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn place_order(&self, user_id: &UserId) -> Result<CheckoutOutcome> {
        let start = Instant::now();
        let result = self.run(user_id).await;

        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(ShopError::CheckoutInterrupted { .. }) => "interrupted",
            Err(_) => "failed",
        };
        metrics::counter!("checkout_total", "outcome" => outcome).increment(1);
        metrics::histogram!("checkout_duration_seconds").record(start.elapsed().as_secs_f64());

        result
    }

    async fn run(&self, user_id: &UserId) -> Result<CheckoutOutcome> {
        let mut checkout = Checkout::default();

        let lines = self.carts.lines(user_id).await?;
        let mut snapshot = match self.validate(&lines).await? {
            Validation::Ready(snapshot) => snapshot,
            Validation::Rejected(reason) => {
                checkout.advance(CheckoutState::Aborted);
                tracing::info!(%reason, "checkout aborted");
                return Ok(CheckoutOutcome::Aborted(reason));
            }
        };

        checkout.advance(CheckoutState::Reserving);
        let mut orders = Vec::with_capacity(lines.len());
        let mut warnings = Vec::new();
        for line in &lines {
            let reserved = self
                .reserve_line(user_id, line, &mut snapshot, &mut orders)
                .await;
            match reserved {
                Ok(warning) => warnings.extend(warning),
                Err(source) => {
                    checkout.advance(CheckoutState::Aborted);
                    tracing::error!(
                        orders_created = orders.len(),
                        line_id = %line.id,
                        error = %source,
                        "checkout interrupted"
                    );
                    return Err(ShopError::CheckoutInterrupted {
                        orders_created: orders.len(),
                        source: Box::new(source),
                    });
                }
            }
        }

        checkout.advance(CheckoutState::Committing);
        let cart_cleared = match self.carts.clear(user_id).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "orders placed but the cart could not be cleared");
                false
            }
        };

        checkout.advance(CheckoutState::Completed);
        tracing::info!(
            orders = orders.len(),
            skipped_decrements = warnings.len(),
            cart_cleared,
            "checkout completed"
        );
        Ok(CheckoutOutcome::Completed(CheckoutReceipt {
            orders,
            warnings,
            cart_cleared,
        }))
    }

    /// Loads every product in the cart and checks stock against the total
    /// quantity requested per product.
    ///
    /// A line whose total price overflows fails with `AmountOverflow`
    /// before anything is written.
    async fn validate(&self, lines: &[CartLine]) -> Result<Validation> {
        if lines.is_empty() {
            return Ok(Validation::Rejected(AbortReason::EmptyCart));
        }

        let mut snapshot = Snapshot::new();
        let mut requested: HashMap<&ProductId, u64> = HashMap::new();
        for line in lines {
            if !snapshot.contains_key(&line.product_id) {
                match self
                    .storage
                    .find::<Product>(CATALOG_PARTITION, line.product_id.as_str())
                    .await?
                {
                    Some(product) => {
                        snapshot.insert(line.product_id.clone(), product);
                    }
                    None => {
                        return Ok(Validation::Rejected(AbortReason::ProductMissing {
                            product_id: line.product_id.clone(),
                        }));
                    }
                }
            }
            *requested.entry(&line.product_id).or_default() += u64::from(line.quantity);
        }

        for line in lines {
            let Some(product) = snapshot.get(&line.product_id) else {
                continue;
            };
            if product.price.checked_multiply(line.quantity).is_none() {
                return Err(ShopError::AmountOverflow(line.product_id.clone()));
            }
            let total = requested[&line.product_id];
            if !product.in_stock(total) {
                return Ok(Validation::Rejected(AbortReason::InsufficientStock {
                    product_id: line.product_id.clone(),
                    requested: total,
                    available: product.stock,
                }));
            }
        }

        Ok(Validation::Ready(snapshot))
    }

    /// Creates the order for one line, announces it and decrements stock.
    ///
    /// The order is pushed onto `orders` as soon as it exists, so the count
    /// stays accurate if the decrement fails afterwards.
    async fn reserve_line(
        &self,
        user_id: &UserId,
        line: &CartLine,
        snapshot: &mut Snapshot,
        orders: &mut Vec<Order>,
    ) -> Result<Option<StockWarning>> {
        let product = snapshot
            .get(&line.product_id)
            .cloned()
            .ok_or_else(|| ShopError::ProductNotFound(line.product_id.clone()))?;

        let order = self
            .storage
            .add(&Order::submitted(user_id.clone(), &product, line.quantity)?)
            .await?;
        tracing::info!(order_id = %order.id, product_id = %order.product_id, "order created");

        if let Err(e) = self
            .storage
            .send_message(ORDERS_QUEUE, &OrderPlaced::from(&order))
            .await
        {
            tracing::warn!(order_id = %order.id, error = %e, "failed to publish order placed message");
        }

        let warning = StockWarning {
            order_id: order.id,
            product_id: order.product_id.clone(),
            quantity: order.quantity,
        };
        orders.push(order);

        let mut decremented = product;
        decremented.decrement_stock(line.quantity)?;
        match self.storage.update(&decremented).await {
            Ok(stored) => {
                snapshot.insert(stored.id.clone(), stored);
                Ok(None)
            }
            Err(StorageError::ConcurrencyConflict { .. }) => {
                metrics::counter!("checkout_stock_decrement_skipped_total").increment(1);
                tracing::warn!(%warning, "stock decrement skipped after concurrent update");
                Ok(Some(warning))
            }
            Err(e) => Err(e.into()),
        }
    }
}
