//! `InventoryLedger`: the engine's public surface.
//!
//! Wires one store, one lock table, one numbering sequence and one notifier
//! into the movement, check, alert and fulfillment components, and adds item
//! registration and queries on top.

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use tracing::{info, instrument};

use stockledger_core::{
    AlertId, CheckId, ExpectedVersion, LedgerError, LedgerResult, MovementId, ProductId, UserId,
};
use stockledger_inventory::{
    AlertFilter, Catalog, CheckScope, CountEntry, InventoryItem, MovementFilter, MovementRequest,
    NewItem, StockAlert, StockCheck, StockMovement,
};

use crate::alert_generator::AlertGenerator;
use crate::check_engine::CheckEngine;
use crate::config::EngineConfig;
use crate::fulfillment::{FulfillmentOutcome, OrderFulfillment, OrderLine};
use crate::locks::KeyedLocks;
use crate::movement_engine::MovementEngine;
use crate::notifier::{Notifier, SharedSink};
use crate::sequence::DailySequence;
use crate::store::LedgerStore;

pub struct InventoryLedger<S> {
    store: S,
    movements: Arc<MovementEngine<S>>,
    checks: CheckEngine<S>,
    alerts: Arc<AlertGenerator<S>>,
    fulfillment: OrderFulfillment<S>,
    /// Held while checking SKU uniqueness and inserting.
    registration: Mutex<()>,
}

impl<S: LedgerStore + Clone> InventoryLedger<S> {
    /// Build the ledger over `store`. Numbering continues after every
    /// receipt and check number already in the store.
    pub fn new(
        store: S,
        catalog: Arc<dyn Catalog>,
        sink: SharedSink,
        config: &EngineConfig,
    ) -> LedgerResult<Self> {
        let movements_seen = store.movements().list()?;
        let checks_seen = store.checks().list()?;
        let sequence = Arc::new(DailySequence::seeded(
            movements_seen
                .iter()
                .map(|m| m.receipt_number())
                .chain(checks_seen.iter().map(|c| c.check_number())),
        ));

        let notifier = Arc::new(Notifier::new(sink));
        let locks = Arc::new(KeyedLocks::new(config.lock_timeout()));
        let alerts = Arc::new(AlertGenerator::new(
            store.clone(),
            notifier.clone(),
            catalog.clone(),
            config.expiry_horizon_days,
        ));
        let movements = Arc::new(MovementEngine::new(
            store.clone(),
            locks,
            sequence.clone(),
            notifier.clone(),
            catalog.clone(),
            alerts.clone(),
            config.vat_rate_bps,
        ));
        let checks = CheckEngine::new(
            store.clone(),
            movements.clone(),
            sequence,
            notifier,
            catalog,
            alerts.clone(),
        );
        let fulfillment = OrderFulfillment::new(store.clone(), movements.clone(), config.retry_policy());

        info!(
            movements = movements_seen.len(),
            checks = checks_seen.len(),
            "inventory ledger ready"
        );
        Ok(Self {
            store,
            movements,
            checks,
            alerts,
            fulfillment,
            registration: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn movements(&self) -> &MovementEngine<S> {
        &self.movements
    }

    // ---- items ----

    #[instrument(skip(self, new), fields(sku = %new.sku))]
    pub fn register_item(&self, new: NewItem) -> LedgerResult<InventoryItem> {
        let _registering = self
            .registration
            .lock()
            .map_err(|_| LedgerError::consistency("registration lock poisoned"))?;

        // Uniqueness is checked on the normalized item, not the raw input.
        let item = InventoryItem::register(new, Utc::now())?;
        let existing = self.store.items().list()?;
        if existing.iter().any(|i| i.sku() == item.sku()) {
            return Err(LedgerError::conflict(format!("sku {} already registered", item.sku())));
        }
        if existing.iter().any(|i| i.product_id() == item.product_id()) {
            return Err(LedgerError::conflict(format!(
                "product {} already has an inventory item",
                item.product_id()
            )));
        }

        let stored = self.store.items().put(item, ExpectedVersion::ABSENT)?;
        info!(product_id = %stored.product_id(), "item registered");
        Ok(stored)
    }

    /// Change thresholds under the product's lock; re-derives status and
    /// runs the threshold rule.
    #[instrument(skip(self))]
    pub fn update_thresholds(
        &self,
        product_id: ProductId,
        min_quantity: u64,
        max_quantity: u64,
    ) -> LedgerResult<InventoryItem> {
        let _guard = self.movements.locks().acquire(&[product_id])?;
        let mut item = self.get_item_by_product(product_id)?;
        let expected = ExpectedVersion::of(&item);
        let previous = item.set_thresholds(min_quantity, max_quantity, Utc::now());
        let stored = self.store.items().put(item, expected)?;

        info!(sku = stored.sku(), status = ?stored.status(), "thresholds updated");
        self.alerts.on_status_change(&stored, previous);
        Ok(stored)
    }

    pub fn get_item(&self, sku: &str) -> LedgerResult<InventoryItem> {
        let sku = sku.trim();
        self.store
            .items()
            .list()?
            .into_iter()
            .find(|i| i.sku() == sku)
            .ok_or_else(|| LedgerError::not_found(format!("sku {sku}")))
    }

    pub fn get_item_by_product(&self, product_id: ProductId) -> LedgerResult<InventoryItem> {
        self.store
            .items()
            .get(product_id)?
            .ok_or_else(|| LedgerError::not_found(format!("inventory item for product {product_id}")))
    }

    /// All items, by SKU.
    pub fn list_items(&self) -> LedgerResult<Vec<InventoryItem>> {
        let mut items = self.store.items().list()?;
        items.sort_by(|a, b| a.sku().cmp(b.sku()));
        Ok(items)
    }

    // ---- movements ----

    pub fn create_movement(&self, request: MovementRequest) -> LedgerResult<StockMovement> {
        self.movements.create(request)
    }

    pub fn submit_movement(&self, id: MovementId, by: UserId) -> LedgerResult<StockMovement> {
        self.movements.submit(id, by)
    }

    pub fn approve_movement(&self, id: MovementId, by: UserId) -> LedgerResult<StockMovement> {
        self.movements.approve(id, by)
    }

    pub fn complete_movement(&self, id: MovementId, by: UserId) -> LedgerResult<StockMovement> {
        self.movements.complete(id, by)
    }

    pub fn cancel_movement(
        &self,
        id: MovementId,
        by: UserId,
        reason: Option<String>,
    ) -> LedgerResult<StockMovement> {
        self.movements.cancel(id, by, reason)
    }

    pub fn process_movement(&self, request: MovementRequest) -> LedgerResult<StockMovement> {
        self.movements.process(request)
    }

    pub fn reverse_movement(&self, id: MovementId, by: UserId) -> LedgerResult<StockMovement> {
        self.movements.reverse(id, by)
    }

    pub fn get_movement(&self, id: MovementId) -> LedgerResult<StockMovement> {
        self.movements.get(id)
    }

    pub fn list_movements(&self, filter: &MovementFilter) -> LedgerResult<Vec<StockMovement>> {
        self.movements.list(filter)
    }

    // ---- stock checks ----

    pub fn create_stock_check(&self, scope: CheckScope, by: UserId) -> LedgerResult<StockCheck> {
        self.checks.create(scope, by)
    }

    pub fn start_check(&self, id: CheckId) -> LedgerResult<StockCheck> {
        self.checks.start(id)
    }

    pub fn record_count(&self, id: CheckId, entry: CountEntry, by: UserId) -> LedgerResult<StockCheck> {
        self.checks.record_count(id, entry, by)
    }

    pub fn complete_check(&self, id: CheckId) -> LedgerResult<StockCheck> {
        self.checks.complete(id)
    }

    pub fn approve_check(&self, id: CheckId, by: UserId) -> LedgerResult<StockCheck> {
        self.checks.approve(id, by)
    }

    pub fn get_check(&self, id: CheckId) -> LedgerResult<StockCheck> {
        self.checks.get(id)
    }

    pub fn list_checks(&self) -> LedgerResult<Vec<StockCheck>> {
        self.checks.list()
    }

    // ---- alerts ----

    pub fn list_alerts(&self, filter: &AlertFilter) -> LedgerResult<Vec<StockAlert>> {
        self.alerts.list(filter)
    }

    pub fn resolve_alert(
        &self,
        id: AlertId,
        by: UserId,
        note: Option<String>,
    ) -> LedgerResult<StockAlert> {
        self.alerts.resolve(id, by, note)
    }

    pub fn scan_expiring(&self, today: NaiveDate) -> LedgerResult<Vec<StockAlert>> {
        self.alerts.scan_expiring(today)
    }

    // ---- orders ----

    pub fn reserve_for_order(
        &self,
        order_id: &str,
        lines: Vec<OrderLine>,
        by: UserId,
    ) -> LedgerResult<FulfillmentOutcome> {
        self.fulfillment.reserve(order_id, lines, by)
    }
}
