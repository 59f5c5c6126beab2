//! Batch/serial tracker.
//!
//! Every function here mutates an item's quantity together with its
//! sub-ledger and keeps `status` derived. Callers work on a staged copy of the
//! item: on error the copy is discarded, so functions may bail out midway.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerError, LedgerResult, ProductId};

use crate::item::{BatchInfo, InventoryItem, SerialInfo, SerialStatus, TrackingType};
use crate::movement::{LineDirection, MovementSubType, MovementType, StockMovementItem};

/// Debit against one batch, recorded as a sub-line of a movement line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConsumption {
    pub batch_number: String,
    pub quantity: u64,
    pub expiry_date: Option<NaiveDate>,
}

/// Outcome of applying one movement line to an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEffect {
    pub quantity_before: u64,
    pub quantity_after: u64,
    pub consumptions: Vec<BatchConsumption>,
    /// Batch that received an increase when the line did not name one.
    pub credited_batch: Option<String>,
}

/// Whether expired batches may be consumed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpiredStock {
    /// Sales never ship expired stock.
    Skip,
    /// Write-offs and count corrections consume expired stock first.
    Include,
}

/// Movement-level context a line is applied in.
#[derive(Debug, Clone)]
pub struct LineContext<'a> {
    pub movement_type: MovementType,
    pub sub_type: MovementSubType,
    pub order_id: Option<&'a str>,
    pub allow_negative: bool,
    /// Batch number used when an increase on a batch item names no batch and
    /// the item has none yet.
    pub fallback_batch: &'a str,
    pub today: NaiveDate,
    pub now: DateTime<Utc>,
}

/// Apply one line to `item` and verify the aggregate invariant.
pub fn apply_line(
    item: &mut InventoryItem,
    line: &StockMovementItem,
    ctx: &LineContext<'_>,
) -> LedgerResult<LineEffect> {
    if line.product_id != item.product_id {
        return Err(LedgerError::consistency(format!(
            "line for product {} applied to sku {}",
            line.product_id, item.sku
        )));
    }

    let quantity_before = item.quantity;
    let mut consumptions = Vec::new();
    let mut credited_batch = None;

    match (item.tracking_type, line.direction) {
        (TrackingType::None, LineDirection::Increase) => {
            let after = checked_increase(item, line.quantity)?;
            item.set_quantity(after);
        }
        (TrackingType::None, LineDirection::Decrease) => {
            let take = allowed_decrease(
                item.product_id,
                item.quantity,
                line.quantity,
                ctx.allow_negative,
            )?;
            item.set_quantity(item.quantity - take);
        }
        (TrackingType::Batch, LineDirection::Increase) => {
            let batch_number = match &line.batch_number {
                Some(b) => b.clone(),
                None => newest_batch(item)
                    .map(|b| b.batch_number.clone())
                    .unwrap_or_else(|| ctx.fallback_batch.to_string()),
            };
            receive_batch(
                item,
                &batch_number,
                line.quantity,
                line.manufacture_date,
                line.expiry_date,
                ctx.now,
            )?;
            if line.batch_number.is_none() {
                credited_batch = Some(batch_number);
            }
        }
        (TrackingType::Batch, LineDirection::Decrease) => {
            let expired = if ctx.movement_type == MovementType::Outbound {
                ExpiredStock::Skip
            } else {
                ExpiredStock::Include
            };
            consumptions = consume_batch(
                item,
                line.quantity,
                line.batch_number.as_deref(),
                expired,
                ctx.allow_negative,
                ctx.today,
            )?;
        }
        (TrackingType::Serial, LineDirection::Increase) => {
            if ctx.sub_type == MovementSubType::Return {
                return_serials(item, &line.serial_numbers, ctx.now)?;
            } else {
                receive_serials(item, &line.serial_numbers, ctx.now)?;
            }
        }
        (TrackingType::Serial, LineDirection::Decrease) => {
            if ctx.movement_type == MovementType::Outbound {
                mark_serial_sold(item, &line.serial_numbers, ctx.order_id, ctx.now)?;
            } else {
                damage_serials(item, &line.serial_numbers, ctx.now)?;
            }
        }
    }

    item.verify_aggregate()?;
    item.touch(ctx.now);

    Ok(LineEffect {
        quantity_before,
        quantity_after: item.quantity,
        consumptions,
        credited_batch,
    })
}

/// Batches eligible for consumption, in allocation order: soonest expiry
/// first (undated last), then oldest receipt.
pub fn allocation_order(
    batches: &[BatchInfo],
    today: NaiveDate,
    expired: ExpiredStock,
) -> Vec<usize> {
    let mut order: Vec<usize> = batches
        .iter()
        .enumerate()
        .filter(|(_, b)| b.quantity > 0)
        .filter(|(_, b)| expired == ExpiredStock::Include || !b.is_expired(today))
        .map(|(i, _)| i)
        .collect();

    order.sort_by(|&a, &b| {
        let (a, b) = (&batches[a], &batches[b]);
        (a.expiry_date.is_none(), a.expiry_date, a.received_at, &a.batch_number).cmp(&(
            b.expiry_date.is_none(),
            b.expiry_date,
            b.received_at,
            &b.batch_number,
        ))
    });
    order
}

/// Debit `quantity` units from a batch item.
///
/// With `requested_batch` only that batch is debited; otherwise units are
/// allocated FIFO across batches and the split is returned as sub-lines.
pub fn consume_batch(
    item: &mut InventoryItem,
    quantity: u64,
    requested_batch: Option<&str>,
    expired: ExpiredStock,
    allow_negative: bool,
    today: NaiveDate,
) -> LedgerResult<Vec<BatchConsumption>> {
    if let Some(batch_number) = requested_batch {
        let idx = item
            .batches
            .iter()
            .position(|b| b.batch_number == batch_number)
            .ok_or_else(|| LedgerError::BatchNotFound {
                batch_number: batch_number.to_string(),
            })?;

        let batch = &item.batches[idx];
        if expired == ExpiredStock::Skip && batch.is_expired(today) {
            return Err(LedgerError::validation(format!(
                "batch {batch_number} expired on {}",
                batch.expiry_date.map(|d| d.to_string()).unwrap_or_default()
            )));
        }

        let take = allowed_decrease(item.product_id, batch.quantity, quantity, allow_negative)?;
        let consumption = BatchConsumption {
            batch_number: batch.batch_number.clone(),
            quantity: take,
            expiry_date: batch.expiry_date,
        };
        item.batches[idx].quantity -= take;
        item.set_quantity(item.quantity - take);
        return Ok(if take > 0 { vec![consumption] } else { vec![] });
    }

    if quantity > item.quantity && !allow_negative {
        return Err(LedgerError::InsufficientStock {
            product_id: item.product_id,
            requested: quantity,
            available: item.quantity,
        });
    }

    let order = allocation_order(&item.batches, today, expired);
    let eligible: u64 = order.iter().map(|&i| item.batches[i].quantity).sum();
    let mut remaining = allowed_decrease(item.product_id, eligible, quantity, allow_negative)?;
    let total = remaining;

    let mut consumptions = Vec::new();
    for idx in order {
        if remaining == 0 {
            break;
        }
        let batch = &mut item.batches[idx];
        let take = remaining.min(batch.quantity);
        batch.quantity -= take;
        remaining -= take;
        consumptions.push(BatchConsumption {
            batch_number: batch.batch_number.clone(),
            quantity: take,
            expiry_date: batch.expiry_date,
        });
    }

    item.set_quantity(item.quantity - total);
    Ok(consumptions)
}

/// Credit units to a batch, creating it if needed.
pub fn receive_batch(
    item: &mut InventoryItem,
    batch_number: &str,
    quantity: u64,
    manufacture_date: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> LedgerResult<()> {
    let batch_number = batch_number.trim();
    if batch_number.is_empty() {
        return Err(LedgerError::validation("batch number cannot be empty"));
    }
    let after = checked_increase(item, quantity)?;

    match item.batches.iter_mut().find(|b| b.batch_number == batch_number) {
        Some(batch) => {
            if let (Some(existing), Some(given)) = (batch.expiry_date, expiry_date) {
                if existing != given {
                    return Err(LedgerError::validation(format!(
                        "batch {batch_number} is recorded with expiry {existing}, got {given}"
                    )));
                }
            }
            batch.expiry_date = batch.expiry_date.or(expiry_date);
            batch.manufacture_date = batch.manufacture_date.or(manufacture_date);
            batch.quantity += quantity;
        }
        None => item.batches.push(BatchInfo {
            batch_number: batch_number.to_string(),
            quantity,
            manufacture_date,
            expiry_date,
            received_at: now,
        }),
    }

    item.set_quantity(after);
    Ok(())
}

/// Add new units as `available`.
pub fn receive_serials(
    item: &mut InventoryItem,
    serials: &[String],
    now: DateTime<Utc>,
) -> LedgerResult<()> {
    for serial in serials {
        if serial.trim().is_empty() {
            return Err(LedgerError::validation("serial number cannot be empty"));
        }
        if item.serial(serial).is_some() {
            return Err(LedgerError::conflict(format!(
                "serial {serial} already exists for sku {}",
                item.sku
            )));
        }
    }

    let after = checked_increase(item, serials.len() as u64)?;
    item.serials.extend(serials.iter().map(|s| SerialInfo {
        serial_number: s.clone(),
        status: SerialStatus::Available,
        received_at: now,
        sold_at: None,
        order_id: None,
        updated_at: now,
    }));
    item.set_quantity(after);
    Ok(())
}

/// Flip available units to `sold`, recording the order.
pub fn mark_serial_sold(
    item: &mut InventoryItem,
    serials: &[String],
    order_id: Option<&str>,
    now: DateTime<Utc>,
) -> LedgerResult<()> {
    let indices = transition_targets(item, serials, SerialStatus::Sold)?;
    for idx in indices {
        let serial = &mut item.serials[idx];
        serial.status = SerialStatus::Sold;
        serial.sold_at = Some(now);
        serial.order_id = order_id.map(str::to_string);
        serial.updated_at = now;
    }
    item.set_quantity(item.quantity - serials.len() as u64);
    Ok(())
}

/// Flip sold units to `returned`. Returned units are not sellable stock.
pub fn return_serials(
    item: &mut InventoryItem,
    serials: &[String],
    now: DateTime<Utc>,
) -> LedgerResult<()> {
    let indices = transition_targets(item, serials, SerialStatus::Returned)?;
    for idx in indices {
        let serial = &mut item.serials[idx];
        serial.status = SerialStatus::Returned;
        serial.updated_at = now;
    }
    Ok(())
}

/// Write units off as `damaged`. Returns how many were previously available.
pub fn damage_serials(
    item: &mut InventoryItem,
    serials: &[String],
    now: DateTime<Utc>,
) -> LedgerResult<u64> {
    let indices = transition_targets(item, serials, SerialStatus::Damaged)?;
    let mut were_available = 0;
    for idx in indices {
        let serial = &mut item.serials[idx];
        if serial.status == SerialStatus::Available {
            were_available += 1;
        }
        serial.status = SerialStatus::Damaged;
        serial.updated_at = now;
    }
    item.set_quantity(item.quantity - were_available);
    Ok(were_available)
}

/// Resolve serials and check that each may move to `next`.
fn transition_targets(
    item: &InventoryItem,
    serials: &[String],
    next: SerialStatus,
) -> LedgerResult<Vec<usize>> {
    serials
        .iter()
        .map(|wanted| {
            let idx = item
                .serials
                .iter()
                .position(|s| &s.serial_number == wanted)
                .ok_or_else(|| LedgerError::SerialNotAvailable {
                    serial_number: wanted.clone(),
                    status: "unknown".to_string(),
                })?;
            let current = item.serials[idx].status;
            if !current.can_transition_to(next) {
                return Err(LedgerError::SerialNotAvailable {
                    serial_number: wanted.clone(),
                    status: current.as_str().to_string(),
                });
            }
            Ok(idx)
        })
        .collect()
}

fn newest_batch(item: &InventoryItem) -> Option<&BatchInfo> {
    item.batches.iter().max_by_key(|b| b.received_at)
}

fn checked_increase(item: &InventoryItem, quantity: u64) -> LedgerResult<u64> {
    item.quantity
        .checked_add(quantity)
        .ok_or_else(|| LedgerError::validation(format!("quantity overflow for sku {}", item.sku)))
}

/// How much of `requested` may be removed from `available`.
fn allowed_decrease(
    product_id: ProductId,
    available: u64,
    requested: u64,
    allow_negative: bool,
) -> LedgerResult<u64> {
    if requested <= available {
        Ok(requested)
    } else if allow_negative {
        Ok(available)
    } else {
        Err(LedgerError::InsufficientStock {
            product_id,
            requested,
            available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::NewItem;
    use crate::movement::MovementLineRequest;
    use chrono::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    fn item(tracking_type: TrackingType) -> InventoryItem {
        InventoryItem::register(
            NewItem {
                sku: "SKU-T".to_string(),
                product_id: ProductId::new(),
                min_quantity: 1,
                max_quantity: 100,
                tracking_type,
                cost_price: 100,
                selling_price: 150,
                category: None,
                location: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn ctx(movement_type: MovementType, sub_type: MovementSubType) -> LineContext<'static> {
        LineContext {
            movement_type,
            sub_type,
            order_id: Some("ORD-1"),
            allow_negative: false,
            fallback_batch: "ADJ-20260601-001",
            today: today(),
            now: Utc::now(),
        }
    }

    fn line(
        item: &InventoryItem,
        movement_type: MovementType,
        request: MovementLineRequest,
    ) -> StockMovementItem {
        StockMovementItem::from_request(&request, movement_type, item, None).unwrap()
    }

    fn receive(item: &mut InventoryItem, batch: &str, quantity: u64, expiry_in_days: Option<i64>) {
        receive_batch(
            item,
            batch,
            quantity,
            None,
            expiry_in_days.map(|d| today() + Duration::days(d)),
            Utc::now(),
        )
        .unwrap();
    }

    fn serials(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fifo_consumes_soonest_expiry_first_and_splits() {
        let mut it = item(TrackingType::Batch);
        receive(&mut it, "LATE", 5, Some(90));
        receive(&mut it, "SOON", 3, Some(10));
        receive(&mut it, "UNDATED", 4, None);

        let used = consume_batch(&mut it, 6, None, ExpiredStock::Skip, false, today()).unwrap();

        assert_eq!(
            used.iter().map(|c| (c.batch_number.as_str(), c.quantity)).collect::<Vec<_>>(),
            vec![("SOON", 3), ("LATE", 3)]
        );
        assert_eq!(it.quantity(), 6);
        assert_eq!(it.batch("SOON").unwrap().quantity, 0);
        assert_eq!(it.batch("LATE").unwrap().quantity, 2);
        it.verify_aggregate().unwrap();
    }

    #[test]
    fn same_expiry_falls_back_to_receipt_order() {
        let mut it = item(TrackingType::Batch);
        receive(&mut it, "FIRST", 2, Some(30));
        receive(&mut it, "SECOND", 2, Some(30));

        let used = consume_batch(&mut it, 1, None, ExpiredStock::Skip, false, today()).unwrap();
        assert_eq!(used[0].batch_number, "FIRST");
    }

    #[test]
    fn sales_skip_expired_batches() {
        let mut it = item(TrackingType::Batch);
        receive(&mut it, "OLD", 5, Some(-2));
        receive(&mut it, "FRESH", 2, Some(20));

        let err = consume_batch(&mut it, 3, None, ExpiredStock::Skip, false, today()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                product_id: it.product_id(),
                requested: 3,
                available: 2
            }
        );

        let used = consume_batch(&mut it, 3, None, ExpiredStock::Include, false, today()).unwrap();
        assert_eq!(used[0].batch_number, "OLD");
        assert_eq!(it.quantity(), 4);
    }

    #[test]
    fn requested_batch_must_exist() {
        let mut it = item(TrackingType::Batch);
        receive(&mut it, "L1", 5, None);

        let err = consume_batch(&mut it, 1, Some("NOPE"), ExpiredStock::Skip, false, today()).unwrap_err();
        assert!(matches!(err, LedgerError::BatchNotFound { batch_number } if batch_number == "NOPE"));

        let used = consume_batch(&mut it, 2, Some("L1"), ExpiredStock::Skip, false, today()).unwrap();
        assert_eq!(used.len(), 1);
        assert_eq!(it.quantity(), 3);
    }

    #[test]
    fn receiving_existing_batch_with_other_expiry_is_rejected() {
        let mut it = item(TrackingType::Batch);
        receive(&mut it, "L1", 5, Some(10));
        let err = receive_batch(&mut it, "L1", 1, None, Some(today()), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(it.quantity(), 5);
    }

    #[test]
    fn outbound_serials_flip_to_sold_with_order() {
        let mut it = item(TrackingType::Serial);
        receive_serials(&mut it, &serials(&["A", "B", "C"]), Utc::now()).unwrap();

        let l = line(
            &it,
            MovementType::Outbound,
            MovementLineRequest {
                product_id: it.product_id(),
                quantity: 2,
                serial_numbers: serials(&["A", "C"]),
                ..MovementLineRequest::default()
            },
        );
        let effect = apply_line(&mut it, &l, &ctx(MovementType::Outbound, MovementSubType::Sale)).unwrap();

        assert_eq!((effect.quantity_before, effect.quantity_after), (3, 1));
        let a = it.serial("A").unwrap();
        assert_eq!(a.status, SerialStatus::Sold);
        assert_eq!(a.order_id.as_deref(), Some("ORD-1"));
        assert_eq!(it.serial("B").unwrap().status, SerialStatus::Available);
    }

    #[test]
    fn selling_a_sold_serial_fails() {
        let mut it = item(TrackingType::Serial);
        receive_serials(&mut it, &serials(&["A", "B"]), Utc::now()).unwrap();
        mark_serial_sold(&mut it, &serials(&["A"]), None, Utc::now()).unwrap();

        let err = mark_serial_sold(&mut it, &serials(&["A"]), None, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::SerialNotAvailable { status, .. } if status == "sold"));

        let err = mark_serial_sold(&mut it, &serials(&["Z"]), None, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::SerialNotAvailable { status, .. } if status == "unknown"));
    }

    #[test]
    fn returns_and_damage_follow_serial_lifecycle() {
        let mut it = item(TrackingType::Serial);
        receive_serials(&mut it, &serials(&["A", "B"]), Utc::now()).unwrap();
        mark_serial_sold(&mut it, &serials(&["A"]), None, Utc::now()).unwrap();
        assert_eq!(it.quantity(), 1);

        return_serials(&mut it, &serials(&["A"]), Utc::now()).unwrap();
        assert_eq!(it.serial("A").unwrap().status, SerialStatus::Returned);
        assert_eq!(it.quantity(), 1);

        // returned unit is written off without touching quantity; B was available
        let were_available = damage_serials(&mut it, &serials(&["A", "B"]), Utc::now()).unwrap();
        assert_eq!(were_available, 1);
        assert_eq!(it.quantity(), 0);
        it.verify_aggregate().unwrap();

        // damaged is terminal
        assert!(return_serials(&mut it, &serials(&["A"]), Utc::now()).is_err());
    }

    #[test]
    fn duplicate_serial_receipt_is_a_conflict() {
        let mut it = item(TrackingType::Serial);
        receive_serials(&mut it, &serials(&["A"]), Utc::now()).unwrap();
        let err = receive_serials(&mut it, &serials(&["A"]), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[test]
    fn untracked_outbound_checks_stock() {
        let mut it = item(TrackingType::None);
        it.set_quantity(1);
        let l = line(
            &it,
            MovementType::Outbound,
            MovementLineRequest {
                product_id: it.product_id(),
                quantity: 2,
                ..MovementLineRequest::default()
            },
        );
        let err = apply_line(&mut it, &l, &ctx(MovementType::Outbound, MovementSubType::Sale)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientStock { requested: 2, available: 1, .. }));
    }

    #[test]
    fn negative_override_clamps_corrections_at_zero() {
        let mut it = item(TrackingType::None);
        it.set_quantity(1);
        let l = line(
            &it,
            MovementType::Adjustment,
            MovementLineRequest {
                product_id: it.product_id(),
                quantity: 3,
                direction: Some(LineDirection::Decrease),
                ..MovementLineRequest::default()
            },
        );
        let mut c = ctx(MovementType::Adjustment, MovementSubType::Correction);
        c.allow_negative = true;

        let effect = apply_line(&mut it, &l, &c).unwrap();
        assert_eq!((effect.quantity_before, effect.quantity_after), (1, 0));
    }

    #[test]
    fn increase_without_batch_credits_newest_or_fallback_batch() {
        let mut it = item(TrackingType::Batch);
        let l = line(
            &it,
            MovementType::Adjustment,
            MovementLineRequest {
                product_id: it.product_id(),
                quantity: 2,
                direction: Some(LineDirection::Increase),
                ..MovementLineRequest::default()
            },
        );
        let c = ctx(MovementType::Adjustment, MovementSubType::Correction);

        let effect = apply_line(&mut it, &l, &c).unwrap();
        assert_eq!(effect.credited_batch.as_deref(), Some("ADJ-20260601-001"));

        receive(&mut it, "NEWER", 1, None);
        let effect = apply_line(&mut it, &l, &c).unwrap();
        assert_eq!(effect.credited_batch.as_deref(), Some("NEWER"));
        assert_eq!(it.quantity(), 5);
    }

    #[test]
    fn corrupted_sub_ledger_is_detected() {
        let mut it = item(TrackingType::Batch);
        receive(&mut it, "L1", 5, None);
        // simulate a restored record whose totals disagree
        it.batches[0].quantity = 7;

        let l = line(
            &it,
            MovementType::Inbound,
            MovementLineRequest {
                product_id: it.product_id(),
                quantity: 1,
                batch_number: Some("L1".into()),
                ..MovementLineRequest::default()
            },
        );
        let err = apply_line(&mut it, &l, &ctx(MovementType::Inbound, MovementSubType::Purchase)).unwrap_err();
        assert!(matches!(err, LedgerError::Consistency(_)));
    }
}
