//! Order fulfillment adapter.
//!
//! Turns an order reservation into a `sale` outbound movement. Lock contention
//! is retried with backoff; not enough stock becomes a backorder instead of an
//! error. Reservations are idempotent per order id.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stockledger_core::{LedgerError, LedgerResult, ProductId, UserId};
use stockledger_inventory::{
    MovementFilter, MovementLineRequest, MovementRequest, MovementStatus, MovementSubType,
    MovementType, StockMovement,
};

use crate::locks::KeyedLocks;
use crate::movement_engine::MovementEngine;
use crate::retry::RetryPolicy;
use crate::store::LedgerStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u64,
    #[serde(default)]
    pub serial_numbers: Vec<String>,
    #[serde(default)]
    pub batch_number: Option<String>,
}

/// A product the order asked more of than is sellable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortage {
    pub product_id: ProductId,
    pub sku: String,
    pub requested: u64,
    pub available: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FulfillmentOutcome {
    Fulfilled { movement: StockMovement },
    /// Nothing was deducted.
    Backorder {
        order_id: String,
        shortages: Vec<Shortage>,
    },
}

pub struct OrderFulfillment<S> {
    store: S,
    movements: Arc<MovementEngine<S>>,
    retry: RetryPolicy,
    orders: KeyedLocks<String>,
}

impl<S: LedgerStore> OrderFulfillment<S> {
    pub fn new(store: S, movements: Arc<MovementEngine<S>>, retry: RetryPolicy) -> Self {
        let timeout = movements.locks().timeout();
        Self {
            store,
            movements,
            retry,
            orders: KeyedLocks::new(timeout),
        }
    }

    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub fn reserve(
        &self,
        order_id: &str,
        lines: Vec<OrderLine>,
        by: UserId,
    ) -> LedgerResult<FulfillmentOutcome> {
        if order_id.trim().is_empty() {
            return Err(LedgerError::validation("order id cannot be empty"));
        }
        if lines.is_empty() {
            return Err(LedgerError::validation("order has no lines"));
        }

        let _order = self.orders.acquire(&[order_id.to_string()])?;
        if let Some(movement) = self.fulfilled_by(order_id)? {
            info!(order_id, receipt = movement.receipt_number(), "order already fulfilled");
            return Ok(FulfillmentOutcome::Fulfilled { movement });
        }

        let request = MovementRequest {
            movement_type: MovementType::Outbound,
            sub_type: MovementSubType::Sale,
            lines: lines
                .iter()
                .map(|l| MovementLineRequest {
                    product_id: l.product_id,
                    quantity: l.quantity,
                    serial_numbers: l.serial_numbers.clone(),
                    batch_number: l.batch_number.clone(),
                    ..MovementLineRequest::default()
                })
                .collect(),
            created_by: by,
            order_id: Some(order_id.to_string()),
            reference: None,
            discount_amount: 0,
            allow_negative: false,
            note: Some(format!("order {order_id}")),
            submit: false,
        };

        match self.retry.run(|| self.movements.process(request.clone())) {
            Ok(movement) => Ok(FulfillmentOutcome::Fulfilled { movement }),
            Err(LedgerError::InsufficientStock {
                product_id,
                requested,
                available,
            }) => {
                let mut shortages = self.shortages(&lines)?;
                if shortages.is_empty() {
                    // stock moved between the failure and this read
                    shortages.push(Shortage {
                        product_id,
                        sku: self.sku_of(product_id)?,
                        requested,
                        available,
                    });
                }
                info!(order_id, shortages = shortages.len(), "order backordered");
                Ok(FulfillmentOutcome::Backorder {
                    order_id: order_id.to_string(),
                    shortages,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn fulfilled_by(&self, order_id: &str) -> LedgerResult<Option<StockMovement>> {
        let filter = MovementFilter {
            movement_type: Some(MovementType::Outbound),
            status: Some(MovementStatus::Completed),
            order_id: Some(order_id.to_string()),
            ..MovementFilter::default()
        };
        Ok(self.movements.list(&filter)?.into_iter().next())
    }

    fn shortages(&self, lines: &[OrderLine]) -> LedgerResult<Vec<Shortage>> {
        let mut requested: BTreeMap<ProductId, u64> = BTreeMap::new();
        for line in lines {
            *requested.entry(line.product_id).or_default() += line.quantity;
        }

        let today = Utc::now().date_naive();
        let mut shortages = Vec::new();
        for (product_id, requested) in requested {
            let Some(item) = self.store.items().get(product_id)? else {
                continue;
            };
            let available = item.sellable_quantity(today);
            if requested > available {
                shortages.push(Shortage {
                    product_id,
                    sku: item.sku().to_string(),
                    requested,
                    available,
                });
            }
        }
        Ok(shortages)
    }

    fn sku_of(&self, product_id: ProductId) -> LedgerResult<String> {
        Ok(self
            .store
            .items()
            .get(product_id)?
            .map(|i| i.sku().to_string())
            .unwrap_or_default())
    }
}
