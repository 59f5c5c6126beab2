//! Movement engine: the only writer of inventory quantities.
//!
//! A stock-changing operation runs as:
//!
//! 1. acquire the per-product locks for every product the movement touches
//!    (sorted, bounded wait, `Busy` on timeout)
//! 2. re-read the items and apply each line to a staged copy
//! 3. verify the aggregate invariant on every staged item
//! 4. commit the item writes and the completed movement record in one atomic
//!    store write (CAS on the item versions read in 2 and on the movement)
//! 5. release the locks, then notify and run the alert rules
//!
//! Any failure, including a rejected commit, leaves the store untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument};

use stockledger_core::{ExpectedVersion, LedgerError, LedgerResult, MovementId, ProductId, UserId};
use stockledger_inventory::{
    Catalog, InventoryItem, LedgerEvent, LineContext, MovementFilter, MovementRequest,
    MovementStatus, StockMovement, StockMovementItem, TrackingType, apply_line,
};

use crate::alert_generator::AlertGenerator;
use crate::locks::KeyedLocks;
use crate::notifier::Notifier;
use crate::sequence::DailySequence;
use crate::store::LedgerStore;

pub struct MovementEngine<S> {
    store: S,
    locks: Arc<KeyedLocks<ProductId>>,
    sequence: Arc<DailySequence>,
    notifier: Arc<Notifier>,
    catalog: Arc<dyn Catalog>,
    alerts: Arc<AlertGenerator<S>>,
    vat_rate_bps: u32,
}

impl<S: LedgerStore> MovementEngine<S> {
    pub fn new(
        store: S,
        locks: Arc<KeyedLocks<ProductId>>,
        sequence: Arc<DailySequence>,
        notifier: Arc<Notifier>,
        catalog: Arc<dyn Catalog>,
        alerts: Arc<AlertGenerator<S>>,
        vat_rate_bps: u32,
    ) -> Self {
        Self {
            store,
            locks,
            sequence,
            notifier,
            catalog,
            alerts,
            vat_rate_bps,
        }
    }

    pub fn locks(&self) -> &KeyedLocks<ProductId> {
        &self.locks
    }

    /// Validate and persist a movement as draft (or pending if `submit`).
    /// Stock is untouched until the movement completes.
    #[instrument(skip_all, fields(movement_type = ?request.movement_type, lines = request.lines.len()))]
    pub fn create(&self, request: MovementRequest) -> LedgerResult<StockMovement> {
        let movement = self.build(&request, Utc::now())?;
        let stored = self.store.movements().put(movement, ExpectedVersion::ABSENT)?;
        info!(
            movement_id = %stored.id(),
            receipt = stored.receipt_number(),
            status = ?stored.status(),
            "movement created"
        );
        Ok(stored)
    }

    #[instrument(skip(self))]
    pub fn submit(&self, id: MovementId, by: UserId) -> LedgerResult<StockMovement> {
        self.update(id, |m, now| m.submit(by, now))
    }

    #[instrument(skip(self))]
    pub fn approve(&self, id: MovementId, by: UserId) -> LedgerResult<StockMovement> {
        self.update(id, |m, now| m.approve(by, now))
    }

    #[instrument(skip(self))]
    pub fn cancel(
        &self,
        id: MovementId,
        by: UserId,
        reason: Option<String>,
    ) -> LedgerResult<StockMovement> {
        let cancelled = self.update(id, |m, now| m.cancel(by, reason, now))?;
        info!(receipt = cancelled.receipt_number(), "movement cancelled");
        Ok(cancelled)
    }

    /// Apply an approved movement to stock.
    #[instrument(skip(self))]
    pub fn complete(&self, id: MovementId, by: UserId) -> LedgerResult<StockMovement> {
        let movement = self.get(id)?;
        ensure_approved(&movement)?;

        let _guard = self.locks.acquire(&movement.product_ids())?;
        // the movement may have been completed while we waited
        let movement = self.get(id)?;
        ensure_approved(&movement)?;

        let expected = ExpectedVersion::of(&movement);
        self.apply_and_commit(movement, expected, by)
    }

    /// Create, approve and complete in one step under the product locks.
    #[instrument(skip_all, fields(movement_type = ?request.movement_type, lines = request.lines.len()))]
    pub fn process(&self, request: MovementRequest) -> LedgerResult<StockMovement> {
        let products: Vec<ProductId> = request.lines.iter().map(|l| l.product_id).collect();
        let _guard = self.locks.acquire(&products)?;
        self.process_locked(request)
    }

    /// [`Self::process`] for callers that already hold the locks of every
    /// product in `request`.
    pub(crate) fn process_locked(&self, request: MovementRequest) -> LedgerResult<StockMovement> {
        let now = Utc::now();
        let by = request.created_by;
        let mut movement = self.build(&request, now)?;
        if movement.status() == MovementStatus::Draft {
            movement.submit(by, now)?;
        }
        movement.approve(by, now)?;
        self.apply_and_commit(movement, ExpectedVersion::ABSENT, by)
    }

    /// Create (as draft) the compensating adjustment for a completed movement.
    #[instrument(skip(self))]
    pub fn reverse(&self, id: MovementId, by: UserId) -> LedgerResult<StockMovement> {
        let request = self.get(id)?.reversal_request(by)?;
        self.create(request)
    }

    pub fn get(&self, id: MovementId) -> LedgerResult<StockMovement> {
        self.store
            .movements()
            .get(id)?
            .ok_or_else(|| LedgerError::not_found(format!("movement {id}")))
    }

    /// Movements matching `filter`, newest first.
    pub fn list(&self, filter: &MovementFilter) -> LedgerResult<Vec<StockMovement>> {
        let mut movements: Vec<StockMovement> = self
            .store
            .movements()
            .list()?
            .into_iter()
            .filter(|m| filter.matches(m))
            .collect();
        movements.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(movements)
    }

    fn update(
        &self,
        id: MovementId,
        change: impl FnOnce(&mut StockMovement, DateTime<Utc>) -> LedgerResult<()>,
    ) -> LedgerResult<StockMovement> {
        let mut movement = self.get(id)?;
        let expected = ExpectedVersion::of(&movement);
        change(&mut movement, Utc::now())?;
        let stored = self.store.movements().put(movement, expected)?;
        info!(receipt = stored.receipt_number(), status = ?stored.status(), "movement updated");
        Ok(stored)
    }

    fn build(&self, request: &MovementRequest, now: DateTime<Utc>) -> LedgerResult<StockMovement> {
        if request.lines.is_empty() {
            return Err(LedgerError::validation("movement must have at least one line"));
        }
        if !request.movement_type.allows(request.sub_type) {
            return Err(LedgerError::validation(format!(
                "sub-type {:?} is not valid for {:?} movements",
                request.sub_type, request.movement_type
            )));
        }

        let mut lines = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let item = self.load_item(line.product_id)?;
            let name = self.catalog.product_meta(line.product_id).map(|m| m.name);
            lines.push(StockMovementItem::from_request(
                line,
                request.movement_type,
                &item,
                name,
            )?);
        }

        let receipt = self
            .sequence
            .next(request.movement_type.receipt_prefix(), now.date_naive())?;
        StockMovement::create(MovementId::new(), receipt, request, lines, self.vat_rate_bps, now)
    }

    fn load_item(&self, product_id: ProductId) -> LedgerResult<InventoryItem> {
        self.store
            .items()
            .get(product_id)?
            .ok_or_else(|| LedgerError::not_found(format!("inventory item for product {product_id}")))
    }

    /// Steps 2-5 of the pipeline. The caller holds the locks.
    fn apply_and_commit(
        &self,
        movement: StockMovement,
        expected: ExpectedVersion,
        by: UserId,
    ) -> LedgerResult<StockMovement> {
        let now = Utc::now();
        let today = now.date_naive();

        let mut originals = BTreeMap::new();
        for product_id in movement.product_ids() {
            originals.insert(product_id, self.load_item(product_id)?);
        }
        let mut staged = originals.clone();

        let effects = {
            let ctx = LineContext {
                movement_type: movement.movement_type(),
                sub_type: movement.sub_type(),
                order_id: movement.order_id(),
                allow_negative: movement.allow_negative(),
                fallback_batch: movement.receipt_number(),
                today,
                now,
            };
            let mut effects = Vec::with_capacity(movement.items().len());
            for line in movement.items() {
                let item = staged.get_mut(&line.product_id).ok_or_else(|| {
                    LedgerError::consistency(format!("product {} was not staged", line.product_id))
                })?;
                match apply_line(item, line, &ctx) {
                    Ok(effect) => effects.push(effect),
                    Err(e) => {
                        if matches!(e, LedgerError::Consistency(_)) {
                            self.report_violation(Some(line.product_id), &e);
                        }
                        return Err(e);
                    }
                }
            }
            effects
        };

        let mut completed = movement;
        completed.complete(effects, by, now)?;

        let writes = staged
            .into_values()
            .map(|item| {
                let expected = originals
                    .get(&item.product_id())
                    .map(ExpectedVersion::of)
                    .unwrap_or(ExpectedVersion::ABSENT);
                (item, expected)
            })
            .collect();
        let (saved_items, saved) = self.store.commit_movement(writes, (completed, expected))?;

        info!(
            movement_id = %saved.id(),
            receipt = saved.receipt_number(),
            movement_type = ?saved.movement_type(),
            lines = saved.items().len(),
            "movement completed"
        );

        self.notifier.publish(LedgerEvent::MovementCompleted {
            movement_id: saved.id(),
            receipt_number: saved.receipt_number().to_string(),
            movement_type: saved.movement_type(),
            sub_type: saved.sub_type(),
            order_id: saved.order_id().map(str::to_string),
            product_ids: saved.product_ids(),
            at: now,
        });
        for item in &saved_items {
            if let Some(original) = originals.get(&item.product_id()) {
                self.alerts.on_status_change(item, original.status());
            }
            if item.tracking_type() == TrackingType::Batch {
                self.alerts.on_batch_write(item, today);
            }
        }

        Ok(saved)
    }

    fn report_violation(&self, product_id: Option<ProductId>, err: &LedgerError) {
        error!(product_id = ?product_id, error = %err, "consistency violation; nothing committed");
        self.notifier.publish(LedgerEvent::ConsistencyViolation {
            product_id,
            detail: err.to_string(),
            at: Utc::now(),
        });
    }
}

fn ensure_approved(movement: &StockMovement) -> LedgerResult<()> {
    if movement.status() == MovementStatus::Approved {
        Ok(())
    } else {
        Err(LedgerError::invalid_transition(
            "movement",
            movement.status(),
            MovementStatus::Completed,
        ))
    }
}
