use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{CheckId, LedgerError, LedgerResult, MovementId, ProductId, Record, UserId};

use crate::item::{InventoryItem, TrackingType};
use crate::tracking::{BatchConsumption, LineEffect};

/// Kind of stock transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Inbound,
    Outbound,
    Adjustment,
    /// Correction derived from an approved stock check.
    Check,
}

impl MovementType {
    /// Prefix used in receipt numbers (`{PREFIX}-{YYYYMMDD}-{NNN}`).
    pub fn receipt_prefix(self) -> &'static str {
        match self {
            MovementType::Inbound => "INB",
            MovementType::Outbound => "OUT",
            MovementType::Adjustment => "ADJ",
            MovementType::Check => "CHK",
        }
    }

    pub fn allows(self, sub_type: MovementSubType) -> bool {
        use MovementSubType::*;
        match self {
            MovementType::Inbound => matches!(sub_type, Purchase | Return | TransferIn | Opening),
            MovementType::Outbound => matches!(sub_type, Sale | TransferOut | SupplierReturn),
            MovementType::Adjustment => matches!(sub_type, Correction | Damage | Expired),
            MovementType::Check => matches!(sub_type, StockCheck),
        }
    }

    /// Adjustment-like movements carry an explicit direction per line.
    pub fn has_line_directions(self) -> bool {
        matches!(self, MovementType::Adjustment | MovementType::Check)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementSubType {
    Purchase,
    Return,
    TransferIn,
    Opening,
    Sale,
    TransferOut,
    SupplierReturn,
    Correction,
    Damage,
    Expired,
    StockCheck,
}

/// Whether a line adds or removes units.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineDirection {
    Increase,
    Decrease,
}

impl LineDirection {
    pub fn inverse(self) -> Self {
        match self {
            LineDirection::Increase => LineDirection::Decrease,
            LineDirection::Decrease => LineDirection::Increase,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementStatus {
    Draft,
    Pending,
    Approved,
    Completed,
    Cancelled,
}

impl MovementStatus {
    /// `draft -> pending -> approved -> completed`; `cancelled` only from
    /// `draft | pending`. `completed` and `cancelled` are terminal.
    pub fn can_transition_to(self, next: MovementStatus) -> bool {
        use MovementStatus::*;
        matches!(
            (self, next),
            (Draft, Pending)
                | (Pending, Approved)
                | (Approved, Completed)
                | (Draft, Cancelled)
                | (Pending, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MovementStatus::Completed | MovementStatus::Cancelled)
    }
}

/// What a movement corrects or derives from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MovementReference {
    Movement(MovementId),
    Check(CheckId),
}

/// Audit-trail entry; appended on every status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementHistory {
    pub from: Option<MovementStatus>,
    pub to: MovementStatus,
    pub by: UserId,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// Caller-supplied line of a movement request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MovementLineRequest {
    pub product_id: ProductId,
    pub quantity: u64,
    #[serde(default)]
    pub direction: Option<LineDirection>,
    #[serde(default)]
    pub cost_price: Option<i64>,
    #[serde(default)]
    pub batch_number: Option<String>,
    #[serde(default)]
    pub manufacture_date: Option<NaiveDate>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub serial_numbers: Vec<String>,
    #[serde(default)]
    pub picking_location: Option<String>,
}

/// Caller-supplied movement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub movement_type: MovementType,
    pub sub_type: MovementSubType,
    pub lines: Vec<MovementLineRequest>,
    pub created_by: UserId,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub reference: Option<MovementReference>,
    #[serde(default)]
    pub discount_amount: i64,
    /// Let decreases clamp at zero instead of failing. Adjustment/check only.
    #[serde(default)]
    pub allow_negative: bool,
    #[serde(default)]
    pub note: Option<String>,
    /// Create directly in `pending` instead of `draft`.
    #[serde(default)]
    pub submit: bool,
}

/// One SKU line within a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovementItem {
    pub product_id: ProductId,
    pub sku: String,
    pub product_name: Option<String>,
    /// Always positive; `direction` says which way it moves.
    pub quantity: u64,
    pub direction: LineDirection,
    pub cost_price: i64,
    pub quantity_before: Option<u64>,
    pub quantity_after: Option<u64>,
    pub batch_number: Option<String>,
    pub manufacture_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub serial_numbers: Vec<String>,
    pub picking_location: Option<String>,
    /// Per-batch debits recorded when a decrease was split across batches.
    pub batch_consumptions: Vec<BatchConsumption>,
}

impl StockMovementItem {
    /// Validate a requested line against the item it targets.
    pub fn from_request(
        request: &MovementLineRequest,
        movement_type: MovementType,
        item: &InventoryItem,
        product_name: Option<String>,
    ) -> LedgerResult<Self> {
        if request.quantity == 0 {
            return Err(LedgerError::validation(format!(
                "line for sku {}: quantity must be greater than zero",
                item.sku()
            )));
        }

        let direction = match (movement_type, request.direction) {
            (MovementType::Inbound, None | Some(LineDirection::Increase)) => LineDirection::Increase,
            (MovementType::Outbound, None | Some(LineDirection::Decrease)) => LineDirection::Decrease,
            (MovementType::Inbound | MovementType::Outbound, Some(d)) => {
                return Err(LedgerError::validation(format!(
                    "{movement_type:?} line cannot have direction {d:?}"
                )));
            }
            (_, Some(d)) => d,
            (_, None) => {
                return Err(LedgerError::validation(format!(
                    "{movement_type:?} line for sku {} requires a direction",
                    item.sku()
                )));
            }
        };

        let cost_price = request.cost_price.unwrap_or(item.cost_price());
        if cost_price < 0 {
            return Err(LedgerError::validation("cost price cannot be negative"));
        }

        // Identifiers are stored trimmed in the sub-ledgers; the line must match.
        let batch_number = request
            .batch_number
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string);
        let serial_numbers: Vec<String> =
            request.serial_numbers.iter().map(|s| s.trim().to_string()).collect();
        if serial_numbers.iter().any(String::is_empty) {
            return Err(LedgerError::validation("serial number cannot be empty"));
        }

        let mut distinct = serial_numbers.clone();
        distinct.sort();
        distinct.dedup();
        if distinct.len() != serial_numbers.len() {
            return Err(LedgerError::validation("serial numbers must be unique within a line"));
        }

        match item.tracking_type() {
            TrackingType::Serial => {
                if serial_numbers.len() as u64 != request.quantity {
                    return Err(LedgerError::validation(format!(
                        "sku {} is serial-tracked: expected {} serial numbers, got {}",
                        item.sku(),
                        request.quantity,
                        serial_numbers.len()
                    )));
                }
            }
            _ if !serial_numbers.is_empty() => {
                return Err(LedgerError::validation(format!(
                    "sku {} is not serial-tracked",
                    item.sku()
                )));
            }
            _ => {}
        }

        match item.tracking_type() {
            TrackingType::Batch => {
                if movement_type == MovementType::Inbound && batch_number.is_none() {
                    return Err(LedgerError::validation(format!(
                        "sku {} is batch-tracked: inbound lines require a batch number",
                        item.sku()
                    )));
                }
            }
            _ if batch_number.is_some() => {
                return Err(LedgerError::validation(format!(
                    "sku {} is not batch-tracked",
                    item.sku()
                )));
            }
            _ => {}
        }

        Ok(Self {
            product_id: item.product_id(),
            sku: item.sku().to_string(),
            product_name,
            quantity: request.quantity,
            direction,
            cost_price,
            quantity_before: None,
            quantity_after: None,
            batch_number,
            manufacture_date: request.manufacture_date,
            expiry_date: request.expiry_date,
            serial_numbers,
            picking_location: request
                .picking_location
                .clone()
                .or_else(|| item.location().map(str::to_string)),
            batch_consumptions: Vec::new(),
        })
    }

    /// Requested quantity with the sign of its direction.
    pub fn signed_quantity(&self) -> i64 {
        match self.direction {
            LineDirection::Increase => self.quantity as i64,
            LineDirection::Decrease => -(self.quantity as i64),
        }
    }

    /// What actually happened to the item quantity, once applied.
    pub fn applied_delta(&self) -> Option<i64> {
        match (self.quantity_before, self.quantity_after) {
            (Some(before), Some(after)) => Some(after as i64 - before as i64),
            _ => None,
        }
    }

    pub fn line_value(&self) -> LedgerResult<i64> {
        i64::try_from(self.quantity)
            .ok()
            .and_then(|q| q.checked_mul(self.cost_price))
            .ok_or_else(|| LedgerError::validation(format!("line value overflow for sku {}", self.sku)))
    }
}

/// Query filter for listing movements. Empty filter matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MovementFilter {
    #[serde(default)]
    pub movement_type: Option<MovementType>,
    #[serde(default)]
    pub status: Option<MovementStatus>,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub order_id: Option<String>,
}

impl MovementFilter {
    pub fn matches(&self, movement: &StockMovement) -> bool {
        self.movement_type.is_none_or(|t| t == movement.movement_type)
            && self.status.is_none_or(|s| s == movement.status)
            && self
                .product_id
                .is_none_or(|p| movement.items.iter().any(|l| l.product_id == p))
            && self
                .order_id
                .as_deref()
                .is_none_or(|o| movement.order_id.as_deref() == Some(o))
    }
}

/// Append-only record of one stock transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    id: MovementId,
    receipt_number: String,
    movement_type: MovementType,
    sub_type: MovementSubType,
    items: Vec<StockMovementItem>,
    status: MovementStatus,
    history: Vec<MovementHistory>,
    order_id: Option<String>,
    reference: Option<MovementReference>,
    allow_negative: bool,
    note: Option<String>,
    subtotal: i64,
    vat_amount: i64,
    discount_amount: i64,
    final_total: i64,
    total_value: i64,
    created_by: UserId,
    approved_by: Option<UserId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    approved_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
}

impl StockMovement {
    /// Build a new movement in `draft` (or `pending` when `request.submit`).
    ///
    /// `items` are the already-resolved lines (see [`StockMovementItem::from_request`]).
    pub fn create(
        id: MovementId,
        receipt_number: String,
        request: &MovementRequest,
        items: Vec<StockMovementItem>,
        vat_rate_bps: u32,
        now: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        if items.is_empty() {
            return Err(LedgerError::validation("movement must contain at least one line"));
        }
        if !request.movement_type.allows(request.sub_type) {
            return Err(LedgerError::validation(format!(
                "{:?} movement cannot have sub-type {:?}",
                request.movement_type, request.sub_type
            )));
        }
        if request.allow_negative && !request.movement_type.has_line_directions() {
            return Err(LedgerError::validation(
                "negative stock override is reserved for adjustment corrections",
            ));
        }
        if request.discount_amount < 0 {
            return Err(LedgerError::validation("discount cannot be negative"));
        }

        let subtotal = items.iter().try_fold(0i64, |acc, line| {
            acc.checked_add(line.line_value()?)
                .ok_or_else(|| LedgerError::validation("subtotal overflow"))
        })?;
        let vat_amount = vat_for(subtotal, vat_rate_bps);
        let gross = subtotal + vat_amount;
        if request.discount_amount > gross {
            return Err(LedgerError::validation(format!(
                "discount {} exceeds total {}",
                request.discount_amount, gross
            )));
        }

        let mut movement = Self {
            id,
            receipt_number,
            movement_type: request.movement_type,
            sub_type: request.sub_type,
            items,
            status: MovementStatus::Draft,
            history: vec![MovementHistory {
                from: None,
                to: MovementStatus::Draft,
                by: request.created_by,
                at: now,
                note: request.note.clone(),
            }],
            order_id: request.order_id.clone(),
            reference: request.reference,
            allow_negative: request.allow_negative,
            note: request.note.clone(),
            subtotal,
            vat_amount,
            discount_amount: request.discount_amount,
            final_total: gross - request.discount_amount,
            total_value: subtotal,
            created_by: request.created_by,
            approved_by: None,
            created_at: now,
            updated_at: now,
            approved_at: None,
            completed_at: None,
            cancelled_at: None,
            version: 0,
        };

        if request.submit {
            movement.submit(request.created_by, now)?;
        }
        Ok(movement)
    }

    pub fn id(&self) -> MovementId {
        self.id
    }

    pub fn receipt_number(&self) -> &str {
        &self.receipt_number
    }

    pub fn movement_type(&self) -> MovementType {
        self.movement_type
    }

    pub fn sub_type(&self) -> MovementSubType {
        self.sub_type
    }

    pub fn items(&self) -> &[StockMovementItem] {
        &self.items
    }

    pub fn status(&self) -> MovementStatus {
        self.status
    }

    pub fn history(&self) -> &[MovementHistory] {
        &self.history
    }

    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }

    pub fn reference(&self) -> Option<MovementReference> {
        self.reference
    }

    pub fn allow_negative(&self) -> bool {
        self.allow_negative
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn subtotal(&self) -> i64 {
        self.subtotal
    }

    pub fn vat_amount(&self) -> i64 {
        self.vat_amount
    }

    pub fn discount_amount(&self) -> i64 {
        self.discount_amount
    }

    pub fn final_total(&self) -> i64 {
        self.final_total
    }

    pub fn total_value(&self) -> i64 {
        self.total_value
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Distinct products touched, sorted. This is the lock acquisition order.
    pub fn product_ids(&self) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = self.items.iter().map(|l| l.product_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn submit(&mut self, by: UserId, now: DateTime<Utc>) -> LedgerResult<()> {
        self.transition(MovementStatus::Pending, by, None, now)
    }

    pub fn approve(&mut self, by: UserId, now: DateTime<Utc>) -> LedgerResult<()> {
        self.transition(MovementStatus::Approved, by, None, now)?;
        self.approved_by = Some(by);
        self.approved_at = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self, by: UserId, reason: Option<String>, now: DateTime<Utc>) -> LedgerResult<()> {
        self.transition(MovementStatus::Cancelled, by, reason, now)?;
        self.cancelled_at = Some(now);
        Ok(())
    }

    /// Seal the movement with what each line actually did to stock.
    ///
    /// `effects` must be in line order. After this the record is immutable.
    pub fn complete(
        &mut self,
        effects: Vec<LineEffect>,
        by: UserId,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.ensure_transition(MovementStatus::Completed)?;
        if effects.len() != self.items.len() {
            return Err(LedgerError::consistency(format!(
                "movement {}: {} line effects for {} lines",
                self.receipt_number,
                effects.len(),
                self.items.len()
            )));
        }

        for (line, effect) in self.items.iter_mut().zip(effects) {
            line.quantity_before = Some(effect.quantity_before);
            line.quantity_after = Some(effect.quantity_after);
            line.batch_consumptions = effect.consumptions;
            if line.batch_number.is_none() {
                line.batch_number = effect.credited_batch;
            }
        }

        self.transition(MovementStatus::Completed, by, None, now)?;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Build the compensating adjustment for a completed movement.
    ///
    /// Lines invert what actually happened (clamped decreases reverse only
    /// what was removed). Serial-tracked lines must be compensated through
    /// returns instead.
    pub fn reversal_request(&self, created_by: UserId) -> LedgerResult<MovementRequest> {
        if self.status != MovementStatus::Completed {
            return Err(LedgerError::invalid_transition(
                "movement reversal",
                self.status,
                "reversed",
            ));
        }

        let mut lines = Vec::new();
        for line in &self.items {
            if !line.serial_numbers.is_empty() {
                return Err(LedgerError::validation(format!(
                    "serial-tracked sku {} must be compensated through a return",
                    line.sku
                )));
            }
            let delta = line.applied_delta().unwrap_or(0);
            if delta == 0 {
                continue;
            }
            let direction = if delta > 0 {
                LineDirection::Decrease
            } else {
                LineDirection::Increase
            };

            if !line.batch_consumptions.is_empty() {
                for consumption in &line.batch_consumptions {
                    lines.push(MovementLineRequest {
                        product_id: line.product_id,
                        quantity: consumption.quantity,
                        direction: Some(direction),
                        cost_price: Some(line.cost_price),
                        batch_number: Some(consumption.batch_number.clone()),
                        expiry_date: consumption.expiry_date,
                        ..MovementLineRequest::default()
                    });
                }
            } else {
                lines.push(MovementLineRequest {
                    product_id: line.product_id,
                    quantity: delta.unsigned_abs(),
                    direction: Some(direction),
                    cost_price: Some(line.cost_price),
                    batch_number: line.batch_number.clone(),
                    manufacture_date: line.manufacture_date,
                    expiry_date: line.expiry_date,
                    ..MovementLineRequest::default()
                });
            }
        }

        if lines.is_empty() {
            return Err(LedgerError::validation(format!(
                "movement {} changed no stock; nothing to reverse",
                self.receipt_number
            )));
        }

        Ok(MovementRequest {
            movement_type: MovementType::Adjustment,
            sub_type: MovementSubType::Correction,
            lines,
            created_by,
            order_id: self.order_id.clone(),
            reference: Some(MovementReference::Movement(self.id)),
            discount_amount: 0,
            allow_negative: false,
            note: Some(format!("reversal of {}", self.receipt_number)),
            submit: false,
        })
    }

    fn ensure_transition(&self, to: MovementStatus) -> LedgerResult<()> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(LedgerError::invalid_transition("movement", self.status, to))
        }
    }

    fn transition(
        &mut self,
        to: MovementStatus,
        by: UserId,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.ensure_transition(to)?;
        self.history.push(MovementHistory {
            from: Some(self.status),
            to,
            by,
            at: now,
            note,
        });
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

impl Record for StockMovement {
    type Key = MovementId;

    const KIND: &'static str = "stock_movement";

    fn key(&self) -> MovementId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// VAT in minor units, rounded half up.
fn vat_for(subtotal: i64, vat_rate_bps: u32) -> i64 {
    let raw = subtotal as i128 * vat_rate_bps as i128;
    ((raw + 5_000) / 10_000) as i64
}
