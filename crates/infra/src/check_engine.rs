//! Stock check engine.
//!
//! Counting is two-phase: `record_count` only writes to the check record.
//! Real stock changes exactly once, at approval, through a `check` movement
//! run by the movement engine under the same per-product locks as live
//! traffic.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use stockledger_core::{CheckId, ExpectedVersion, LedgerError, LedgerResult, UserId};
use stockledger_inventory::{
    CHECK_PREFIX, Catalog, CheckScope, CheckStatus, CountEntry, InventoryItem, LedgerEvent,
    MovementReference, MovementRequest, MovementSubType, MovementType, StockCheck, StockCheckItem,
    TrackingType, validate_counted_serials,
};

use crate::alert_generator::AlertGenerator;
use crate::movement_engine::MovementEngine;
use crate::notifier::Notifier;
use crate::sequence::DailySequence;
use crate::store::LedgerStore;

pub struct CheckEngine<S> {
    store: S,
    movements: Arc<MovementEngine<S>>,
    sequence: Arc<DailySequence>,
    notifier: Arc<Notifier>,
    catalog: Arc<dyn Catalog>,
    alerts: Arc<AlertGenerator<S>>,
}

impl<S: LedgerStore> CheckEngine<S> {
    pub fn new(
        store: S,
        movements: Arc<MovementEngine<S>>,
        sequence: Arc<DailySequence>,
        notifier: Arc<Notifier>,
        catalog: Arc<dyn Catalog>,
        alerts: Arc<AlertGenerator<S>>,
    ) -> Self {
        Self {
            store,
            movements,
            sequence,
            notifier,
            catalog,
            alerts,
        }
    }

    /// Snapshot every item in `scope` into a new `pending` check.
    #[instrument(skip(self))]
    pub fn create(&self, scope: CheckScope, created_by: UserId) -> LedgerResult<StockCheck> {
        scope.validate()?;
        let items = self.store.items().list()?;

        if let CheckScope::Skus { skus } = &scope {
            if let Some(missing) = skus.iter().find(|s| !items.iter().any(|i| i.sku() == s.as_str())) {
                return Err(LedgerError::not_found(format!("sku {missing}")));
            }
        }

        let lines: Vec<StockCheckItem> = items
            .iter()
            .filter(|item| scope.matches(item))
            .map(|item| {
                let name = self.catalog.product_meta(item.product_id()).map(|m| m.name);
                StockCheckItem::snapshot(item, name)
            })
            .collect();
        if lines.is_empty() {
            return Err(LedgerError::validation("check scope matched no items"));
        }

        let now = Utc::now();
        let number = self.sequence.next(CHECK_PREFIX, now.date_naive())?;
        let check = StockCheck::open(CheckId::new(), number, scope, lines, created_by, now)?;
        let stored = self.store.checks().put(check, ExpectedVersion::ABSENT)?;

        info!(
            check_id = %stored.id(),
            check_number = stored.check_number(),
            lines = stored.items().len(),
            "stock check created"
        );
        Ok(stored)
    }

    #[instrument(skip(self))]
    pub fn start(&self, id: CheckId) -> LedgerResult<StockCheck> {
        let mut check = self.get(id)?;
        let expected = ExpectedVersion::of(&check);
        check.start(Utc::now())?;
        let stored = self.store.checks().put(check, expected)?;
        info!(check_number = stored.check_number(), "stock check started");
        Ok(stored)
    }

    /// Record (or overwrite) one line's count. Stock is not touched.
    #[instrument(skip(self, entry), fields(sku = %entry.sku, actual = entry.actual_quantity))]
    pub fn record_count(&self, id: CheckId, entry: CountEntry, by: UserId) -> LedgerResult<StockCheck> {
        let mut check = self.get(id)?;
        let expected = ExpectedVersion::of(&check);

        if let Some(line) = check.item(&entry.sku) {
            if line.tracking_type == TrackingType::Serial {
                let live = self.load_item(line)?;
                validate_counted_serials(&live, &entry.serial_numbers)?;
            }
        }
        check.record_count(&entry, by, Utc::now())?;

        Ok(self.store.checks().put(check, expected)?)
    }

    /// Freeze the counts and compute the rollups; raises discrepancy alerts.
    #[instrument(skip(self))]
    pub fn complete(&self, id: CheckId) -> LedgerResult<StockCheck> {
        let mut check = self.get(id)?;
        let expected = ExpectedVersion::of(&check);
        let now = Utc::now();
        check.complete(now)?;
        let stored = self.store.checks().put(check, expected)?;

        info!(
            check_number = stored.check_number(),
            discrepancy_items = stored.discrepancy_items(),
            total_discrepancy_value = stored.total_discrepancy_value(),
            "stock check completed"
        );
        self.notifier.publish(LedgerEvent::CheckCompleted {
            check_id: stored.id(),
            check_number: stored.check_number().to_string(),
            discrepancy_items: stored.discrepancy_items(),
            accuracy_rate: stored.accuracy_rate().unwrap_or(1.0),
            at: now,
        });
        self.alerts.on_check_completed(&stored);
        Ok(stored)
    }

    /// Apply every non-zero discrepancy to live stock and seal the check.
    ///
    /// Discrepancies are applied as deltas to the quantity at approval time,
    /// not to the snapshot; lines whose stock moved since the snapshot are
    /// logged.
    #[instrument(skip(self))]
    pub fn approve(&self, id: CheckId, by: UserId) -> LedgerResult<StockCheck> {
        let check = self.get(id)?;
        check.ensure_transition(CheckStatus::Approved)?;
        let products: Vec<_> = check.discrepant_lines().map(|l| l.product_id).collect();

        let _guard = self.movements.locks().acquire(&products)?;
        let mut check = self.get(id)?;
        check.ensure_transition(CheckStatus::Approved)?;
        let expected = ExpectedVersion::of(&check);

        let mut corrections = Vec::new();
        for line in check.discrepant_lines() {
            let live = self.load_item(line)?;
            let drift = line.drift(&live);
            if drift != 0 {
                warn!(
                    sku = %line.sku,
                    snapshot = line.system_quantity,
                    live = live.quantity(),
                    drift,
                    "stock moved since the count snapshot"
                );
            }
            if let Some(correction) = line.correction_line(&live) {
                corrections.push(correction);
            }
        }

        let adjustment = if corrections.is_empty() {
            None
        } else {
            let movement = self.movements.process_locked(MovementRequest {
                movement_type: MovementType::Check,
                sub_type: MovementSubType::StockCheck,
                lines: corrections,
                created_by: by,
                order_id: None,
                reference: Some(MovementReference::Check(id)),
                discount_amount: 0,
                allow_negative: true,
                note: Some(format!("stock check {}", check.check_number())),
                submit: false,
            })?;
            Some(movement.id())
        };

        let now = Utc::now();
        check.approve(by, adjustment, now)?;
        let stored = self.store.checks().put(check, expected)?;

        info!(
            check_number = stored.check_number(),
            adjustment_movement_id = ?adjustment,
            "stock check approved"
        );
        self.notifier.publish(LedgerEvent::CheckApproved {
            check_id: stored.id(),
            check_number: stored.check_number().to_string(),
            adjustment_movement_id: adjustment,
            at: now,
        });
        Ok(stored)
    }

    pub fn get(&self, id: CheckId) -> LedgerResult<StockCheck> {
        self.store
            .checks()
            .get(id)?
            .ok_or_else(|| LedgerError::not_found(format!("stock check {id}")))
    }

    /// All checks, newest first.
    pub fn list(&self) -> LedgerResult<Vec<StockCheck>> {
        let mut checks = self.store.checks().list()?;
        checks.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(checks)
    }

    fn load_item(&self, line: &StockCheckItem) -> LedgerResult<InventoryItem> {
        self.store
            .items()
            .get(line.product_id)?
            .ok_or_else(|| LedgerError::not_found(format!("sku {}", line.sku)))
    }
}
