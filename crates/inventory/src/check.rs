//! Physical stock-count sessions.
//!
//! A check snapshots system quantities, collects counts while in progress and
//! only touches real stock once approved (the correction itself is applied by
//! the movement engine from [`StockCheckItem::correction_line`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{CheckId, LedgerError, LedgerResult, MovementId, ProductId, Record, UserId};

use crate::item::{InventoryItem, SerialStatus, TrackingType};
use crate::movement::{LineDirection, MovementLineRequest};

/// Which items a check covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckScope {
    All,
    Category { category: String },
    Location { location: String },
    Skus { skus: Vec<String> },
}

impl CheckScope {
    pub fn matches(&self, item: &InventoryItem) -> bool {
        match self {
            CheckScope::All => true,
            CheckScope::Category { category } => item.category() == Some(category.as_str()),
            CheckScope::Location { location } => item.location() == Some(location.as_str()),
            CheckScope::Skus { skus } => skus.iter().any(|s| s == item.sku()),
        }
    }

    pub fn validate(&self) -> LedgerResult<()> {
        match self {
            CheckScope::Category { category } if category.trim().is_empty() => {
                Err(LedgerError::validation("check category cannot be empty"))
            }
            CheckScope::Location { location } if location.trim().is_empty() => {
                Err(LedgerError::validation("check location cannot be empty"))
            }
            CheckScope::Skus { skus } if skus.is_empty() => {
                Err(LedgerError::validation("check sku list cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Draft,
    Pending,
    InProgress,
    Completed,
    Approved,
}

impl CheckStatus {
    pub fn can_transition_to(self, next: CheckStatus) -> bool {
        use CheckStatus::*;
        matches!(
            (self, next),
            (Draft, Pending) | (Pending, InProgress) | (InProgress, Completed) | (Completed, Approved)
        )
    }
}

/// Operator input for one counted line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountEntry {
    pub sku: String,
    pub actual_quantity: u64,
    /// Serials physically found; required for serial-tracked lines.
    #[serde(default)]
    pub serial_numbers: Vec<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// One SKU of a check: snapshot vs. counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCheckItem {
    pub product_id: ProductId,
    pub sku: String,
    pub product_name: Option<String>,
    pub tracking_type: TrackingType,
    pub cost_price: i64,
    pub system_quantity: u64,
    /// Available serials at snapshot time (serial-tracked lines only).
    pub system_serials: Vec<String>,
    pub actual_quantity: Option<u64>,
    pub counted_serials: Vec<String>,
    pub discrepancy: i64,
    pub discrepancy_value: i64,
    pub checked: bool,
    pub counted_by: Option<UserId>,
    pub counted_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl StockCheckItem {
    pub fn snapshot(item: &InventoryItem, product_name: Option<String>) -> Self {
        let mut system_serials: Vec<String> = item
            .available_serials()
            .map(|s| s.serial_number.clone())
            .collect();
        system_serials.sort();

        Self {
            product_id: item.product_id(),
            sku: item.sku().to_string(),
            product_name,
            tracking_type: item.tracking_type(),
            cost_price: item.cost_price(),
            system_quantity: item.quantity(),
            system_serials,
            actual_quantity: None,
            counted_serials: Vec::new(),
            discrepancy: 0,
            discrepancy_value: 0,
            checked: false,
            counted_by: None,
            counted_at: None,
            note: None,
        }
    }

    /// How far the live quantity moved since the snapshot.
    pub fn drift(&self, live: &InventoryItem) -> i64 {
        live.quantity() as i64 - self.system_quantity as i64
    }

    /// Movement line that applies this line's discrepancy to live stock.
    ///
    /// Returns `None` when there is nothing to correct. Serial lines damage
    /// the missing units that are still available, or receive the extra
    /// units not yet known to the item.
    pub fn correction_line(&self, live: &InventoryItem) -> Option<MovementLineRequest> {
        if self.discrepancy == 0 {
            return None;
        }
        let direction = if self.discrepancy > 0 {
            LineDirection::Increase
        } else {
            LineDirection::Decrease
        };
        let wanted = self.discrepancy.unsigned_abs();

        let serial_numbers: Vec<String> = match (self.tracking_type, direction) {
            (TrackingType::Serial, LineDirection::Decrease) => self
                .system_serials
                .iter()
                .filter(|s| !self.counted_serials.contains(s))
                .filter(|s| live.serial(s).is_some_and(|u| u.status == SerialStatus::Available))
                .take(wanted as usize)
                .cloned()
                .collect(),
            (TrackingType::Serial, LineDirection::Increase) => self
                .counted_serials
                .iter()
                .filter(|s| !self.system_serials.contains(s))
                .filter(|s| live.serial(s).is_none())
                .take(wanted as usize)
                .cloned()
                .collect(),
            _ => Vec::new(),
        };

        let quantity = if self.tracking_type == TrackingType::Serial {
            serial_numbers.len() as u64
        } else {
            wanted
        };
        if quantity == 0 {
            return None;
        }

        Some(MovementLineRequest {
            product_id: self.product_id,
            quantity,
            direction: Some(direction),
            cost_price: Some(self.cost_price),
            serial_numbers,
            ..MovementLineRequest::default()
        })
    }
}

/// Counted serials must be unknown to the item (found units) or available.
pub fn validate_counted_serials(item: &InventoryItem, serials: &[String]) -> LedgerResult<()> {
    for serial in serials {
        if let Some(unit) = item.serial(serial) {
            if unit.status != SerialStatus::Available {
                return Err(LedgerError::SerialNotAvailable {
                    serial_number: serial.clone(),
                    status: unit.status.as_str().to_string(),
                });
            }
        }
    }
    Ok(())
}

/// A physical count session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockCheck {
    id: CheckId,
    check_number: String,
    scope: CheckScope,
    status: CheckStatus,
    items: Vec<StockCheckItem>,
    total_items: u64,
    checked_items: u64,
    discrepancy_items: u64,
    total_discrepancy_value: i64,
    accuracy_rate: Option<f64>,
    created_by: UserId,
    approved_by: Option<UserId>,
    adjustment_movement_id: Option<MovementId>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl StockCheck {
    /// Open a check over the snapshotted lines. The check starts `pending`.
    pub fn open(
        id: CheckId,
        check_number: String,
        scope: CheckScope,
        mut items: Vec<StockCheckItem>,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        scope.validate()?;
        if items.is_empty() {
            return Err(LedgerError::validation("check scope matched no items"));
        }
        items.sort_by(|a, b| a.sku.cmp(&b.sku));

        let mut check = Self {
            id,
            check_number,
            scope,
            status: CheckStatus::Draft,
            total_items: items.len() as u64,
            items,
            checked_items: 0,
            discrepancy_items: 0,
            total_discrepancy_value: 0,
            accuracy_rate: None,
            created_by,
            approved_by: None,
            adjustment_movement_id: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            approved_at: None,
            updated_at: now,
            version: 0,
        };
        check.transition(CheckStatus::Pending, now)?;
        Ok(check)
    }

    pub fn id(&self) -> CheckId {
        self.id
    }

    pub fn check_number(&self) -> &str {
        &self.check_number
    }

    pub fn scope(&self) -> &CheckScope {
        &self.scope
    }

    pub fn status(&self) -> CheckStatus {
        self.status
    }

    pub fn items(&self) -> &[StockCheckItem] {
        &self.items
    }

    pub fn item(&self, sku: &str) -> Option<&StockCheckItem> {
        self.items.iter().find(|l| l.sku == sku)
    }

    pub fn total_items(&self) -> u64 {
        self.total_items
    }

    pub fn checked_items(&self) -> u64 {
        self.checked_items
    }

    pub fn discrepancy_items(&self) -> u64 {
        self.discrepancy_items
    }

    pub fn total_discrepancy_value(&self) -> i64 {
        self.total_discrepancy_value
    }

    /// Share of lines without discrepancy; set on completion.
    pub fn accuracy_rate(&self) -> Option<f64> {
        self.accuracy_rate
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn adjustment_movement_id(&self) -> Option<MovementId> {
        self.adjustment_movement_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn product_ids(&self) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = self.items.iter().map(|l| l.product_id).collect();
        ids.sort();
        ids
    }

    pub fn discrepant_lines(&self) -> impl Iterator<Item = &StockCheckItem> {
        self.items.iter().filter(|l| l.discrepancy != 0)
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> LedgerResult<()> {
        self.transition(CheckStatus::InProgress, now)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Record (or re-record) the count for one line. Never touches stock.
    pub fn record_count(
        &mut self,
        entry: &CountEntry,
        by: UserId,
        now: DateTime<Utc>,
    ) -> LedgerResult<&StockCheckItem> {
        if self.status != CheckStatus::InProgress {
            return Err(LedgerError::invalid_transition(
                "stock check count",
                self.status,
                CheckStatus::InProgress,
            ));
        }

        let check_number = &self.check_number;
        let line = self
            .items
            .iter_mut()
            .find(|l| l.sku == entry.sku)
            .ok_or_else(|| {
                LedgerError::not_found(format!("sku {} is not part of check {check_number}", entry.sku))
            })?;

        let mut counted = entry.serial_numbers.clone();
        counted.sort();
        counted.dedup();
        if counted.len() != entry.serial_numbers.len() {
            return Err(LedgerError::validation("counted serials must be unique"));
        }
        match line.tracking_type {
            TrackingType::Serial if counted.len() as u64 != entry.actual_quantity => {
                return Err(LedgerError::validation(format!(
                    "sku {} is serial-tracked: counted {} units but listed {} serials",
                    line.sku,
                    entry.actual_quantity,
                    counted.len()
                )));
            }
            TrackingType::Serial => {}
            _ if !counted.is_empty() => {
                return Err(LedgerError::validation(format!(
                    "sku {} is not serial-tracked",
                    line.sku
                )));
            }
            _ => {}
        }

        let discrepancy = entry.actual_quantity as i64 - line.system_quantity as i64;
        line.actual_quantity = Some(entry.actual_quantity);
        line.counted_serials = counted;
        line.discrepancy = discrepancy;
        line.discrepancy_value = discrepancy.saturating_mul(line.cost_price);
        line.checked = true;
        line.counted_by = Some(by);
        line.counted_at = Some(now);
        line.note = entry.note.clone();

        self.checked_items = self.items.iter().filter(|l| l.checked).count() as u64;
        self.updated_at = now;

        self.item(&entry.sku)
            .ok_or_else(|| LedgerError::not_found(format!("sku {}", entry.sku)))
    }

    /// Compute rollups and freeze the counts. Stock is not touched.
    pub fn complete(&mut self, now: DateTime<Utc>) -> LedgerResult<()> {
        self.ensure_transition(CheckStatus::Completed)?;
        let uncounted: Vec<&str> = self
            .items
            .iter()
            .filter(|l| !l.checked)
            .map(|l| l.sku.as_str())
            .collect();
        if !uncounted.is_empty() {
            return Err(LedgerError::validation(format!(
                "check {} has uncounted lines: {}",
                self.check_number,
                uncounted.join(", ")
            )));
        }

        self.discrepancy_items = self.discrepant_lines().count() as u64;
        self.total_discrepancy_value = self
            .items
            .iter()
            .fold(0i64, |acc, l| acc.saturating_add(l.discrepancy_value));
        self.accuracy_rate = Some(if self.total_items == 0 {
            1.0
        } else {
            (self.total_items - self.discrepancy_items) as f64 / self.total_items as f64
        });

        self.transition(CheckStatus::Completed, now)?;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Seal approval, recording the correction movement if one was needed.
    pub fn approve(
        &mut self,
        by: UserId,
        adjustment_movement_id: Option<MovementId>,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.transition(CheckStatus::Approved, now)?;
        self.approved_by = Some(by);
        self.approved_at = Some(now);
        self.adjustment_movement_id = adjustment_movement_id;
        Ok(())
    }

    pub fn ensure_transition(&self, to: CheckStatus) -> LedgerResult<()> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(LedgerError::invalid_transition("stock check", self.status, to))
        }
    }

    fn transition(&mut self, to: CheckStatus, now: DateTime<Utc>) -> LedgerResult<()> {
        self.ensure_transition(to)?;
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

impl Record for StockCheck {
    type Key = CheckId;

    const KIND: &'static str = "stock_check";

    fn key(&self) -> CheckId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::NewItem;
    use crate::tracking::receive_serials;

    fn item(sku: &str, quantity: u64, tracking_type: TrackingType) -> InventoryItem {
        let mut item = InventoryItem::register(
            NewItem {
                sku: sku.to_string(),
                product_id: ProductId::new(),
                min_quantity: 2,
                max_quantity: 20,
                tracking_type,
                cost_price: 250,
                selling_price: 400,
                category: Some("dairy".to_string()),
                location: Some("A1".to_string()),
            },
            Utc::now(),
        )
        .unwrap();
        if tracking_type == TrackingType::None {
            item.set_quantity(quantity);
        }
        item
    }

    fn open(items: &[&InventoryItem]) -> StockCheck {
        StockCheck::open(
            CheckId::new(),
            "SC-20260601-001".to_string(),
            CheckScope::All,
            items.iter().map(|i| StockCheckItem::snapshot(i, None)).collect(),
            UserId::new(),
            Utc::now(),
        )
        .unwrap()
    }

    fn count(sku: &str, actual_quantity: u64) -> CountEntry {
        CountEntry {
            sku: sku.to_string(),
            actual_quantity,
            serial_numbers: Vec::new(),
            note: None,
        }
    }

    #[test]
    fn scope_selects_items() {
        let it = item("SKU-001", 1, TrackingType::None);
        assert!(CheckScope::All.matches(&it));
        assert!(CheckScope::Category { category: "dairy".into() }.matches(&it));
        assert!(!CheckScope::Location { location: "B2".into() }.matches(&it));
        assert!(CheckScope::Skus { skus: vec!["SKU-001".into()] }.matches(&it));
        assert!(CheckScope::Skus { skus: vec![] }.validate().is_err());
    }

    #[test]
    fn lifecycle_computes_rollups() {
        let a = item("SKU-001", 1, TrackingType::None);
        let b = item("SKU-002", 5, TrackingType::None);
        let mut check = open(&[&a, &b]);
        assert_eq!(check.status(), CheckStatus::Pending);

        // counting before start is illegal
        let err = check.record_count(&count("SKU-001", 0), UserId::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));

        check.start(Utc::now()).unwrap();
        check.record_count(&count("SKU-001", 3), UserId::new(), Utc::now()).unwrap();
        // last count wins
        let line = check.record_count(&count("SKU-001", 0), UserId::new(), Utc::now()).unwrap();
        assert_eq!(line.discrepancy, -1);
        assert_eq!(line.discrepancy_value, -250);

        let err = check.complete(Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        check.record_count(&count("SKU-002", 5), UserId::new(), Utc::now()).unwrap();
        check.complete(Utc::now()).unwrap();

        assert_eq!(check.status(), CheckStatus::Completed);
        assert_eq!(check.checked_items(), 2);
        assert_eq!(check.discrepancy_items(), 1);
        assert_eq!(check.total_discrepancy_value(), -250);
        assert_eq!(check.accuracy_rate(), Some(0.5));
    }

    #[test]
    fn approve_only_from_completed() {
        let a = item("SKU-001", 1, TrackingType::None);
        let mut check = open(&[&a]);
        let err = check.approve(UserId::new(), None, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));

        check.start(Utc::now()).unwrap();
        check.record_count(&count("SKU-001", 1), UserId::new(), Utc::now()).unwrap();
        check.complete(Utc::now()).unwrap();
        check.approve(UserId::new(), None, Utc::now()).unwrap();
        assert_eq!(check.status(), CheckStatus::Approved);
        assert!(check.approve(UserId::new(), None, Utc::now()).is_err());
    }

    #[test]
    fn unknown_sku_is_not_found() {
        let a = item("SKU-001", 1, TrackingType::None);
        let mut check = open(&[&a]);
        check.start(Utc::now()).unwrap();
        let err = check.record_count(&count("SKU-404", 1), UserId::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn correction_line_uses_live_discrepancy_sign() {
        let a = item("SKU-001", 1, TrackingType::None);
        let mut check = open(&[&a]);
        check.start(Utc::now()).unwrap();
        check.record_count(&count("SKU-001", 0), UserId::new(), Utc::now()).unwrap();

        let line = check.item("SKU-001").unwrap().correction_line(&a).unwrap();
        assert_eq!(line.quantity, 1);
        assert_eq!(line.direction, Some(LineDirection::Decrease));
        assert_eq!(line.cost_price, Some(250));
    }

    #[test]
    fn serial_counts_must_list_units() {
        let mut s = item("SER-1", 0, TrackingType::Serial);
        receive_serials(&mut s, &["A".to_string(), "B".to_string()], Utc::now()).unwrap();

        let mut check = open(&[&s]);
        check.start(Utc::now()).unwrap();
        let err = check.record_count(&count("SER-1", 1), UserId::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let entry = CountEntry {
            serial_numbers: vec!["B".to_string()],
            ..count("SER-1", 1)
        };
        check.record_count(&entry, UserId::new(), Utc::now()).unwrap();

        let line = check.item("SER-1").unwrap().correction_line(&s).unwrap();
        assert_eq!(line.serial_numbers, vec!["A".to_string()]);
        assert_eq!(line.direction, Some(LineDirection::Decrease));
    }

    #[test]
    fn counted_serials_cannot_be_sold_units() {
        let mut s = item("SER-1", 0, TrackingType::Serial);
        receive_serials(&mut s, &["A".to_string()], Utc::now()).unwrap();
        crate::tracking::mark_serial_sold(&mut s, &["A".to_string()], None, Utc::now()).unwrap();

        assert!(validate_counted_serials(&s, &["NEW".to_string()]).is_ok());
        let err = validate_counted_serials(&s, &["A".to_string()]).unwrap_err();
        assert!(matches!(err, LedgerError::SerialNotAvailable { .. }));
    }

    #[test]
    fn empty_scope_is_rejected() {
        let err = StockCheck::open(
            CheckId::new(),
            "SC-20260601-001".to_string(),
            CheckScope::All,
            Vec::new(),
            UserId::new(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
