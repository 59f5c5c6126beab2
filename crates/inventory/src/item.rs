use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{ItemId, LedgerError, LedgerResult, ProductId, Record};

use crate::status::{StockStatus, evaluate_status};

/// How units of an item are tracked below the item level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingType {
    None,
    Batch,
    Serial,
}

/// A dated lot of units sharing manufacture/expiry metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub batch_number: String,
    pub quantity: u64,
    pub manufacture_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub received_at: DateTime<Utc>,
}

impl BatchInfo {
    /// A batch expires at the end of its expiry date.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|d| d < today)
    }

    pub fn days_until_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expiry_date.map(|d| (d - today).num_days())
    }
}

/// Lifecycle of an individually numbered unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialStatus {
    Available,
    Sold,
    Returned,
    Damaged,
}

impl SerialStatus {
    /// Legal transitions: `available -> sold`, `sold -> returned`,
    /// `available | returned -> damaged`.
    pub fn can_transition_to(self, next: SerialStatus) -> bool {
        matches!(
            (self, next),
            (SerialStatus::Available, SerialStatus::Sold)
                | (SerialStatus::Sold, SerialStatus::Returned)
                | (SerialStatus::Available, SerialStatus::Damaged)
                | (SerialStatus::Returned, SerialStatus::Damaged)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SerialStatus::Available => "available",
            SerialStatus::Sold => "sold",
            SerialStatus::Returned => "returned",
            SerialStatus::Damaged => "damaged",
        }
    }
}

/// A uniquely numbered unit of a serial-tracked item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialInfo {
    pub serial_number: String,
    pub status: SerialStatus,
    pub received_at: DateTime<Utc>,
    pub sold_at: Option<DateTime<Utc>>,
    pub order_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Registration data for a new SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub sku: String,
    pub product_id: ProductId,
    pub min_quantity: u64,
    pub max_quantity: u64,
    pub tracking_type: TrackingType,
    /// Minor currency units.
    pub cost_price: i64,
    /// Minor currency units.
    pub selling_price: i64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// One stock row per SKU.
///
/// Quantity and the batch/serial sub-ledgers are only mutated through the
/// tracker (`crate::tracking`), which keeps `status` derived and the
/// aggregate invariant intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub(crate) id: ItemId,
    pub(crate) sku: String,
    pub(crate) product_id: ProductId,
    pub(crate) category: Option<String>,
    pub(crate) location: Option<String>,
    pub(crate) quantity: u64,
    pub(crate) min_quantity: u64,
    pub(crate) max_quantity: u64,
    pub(crate) tracking_type: TrackingType,
    pub(crate) cost_price: i64,
    pub(crate) selling_price: i64,
    pub(crate) status: StockStatus,
    pub(crate) last_movement: Option<DateTime<Utc>>,
    pub(crate) batches: Vec<BatchInfo>,
    pub(crate) serials: Vec<SerialInfo>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) version: u64,
}

impl InventoryItem {
    /// Register a new SKU with zero stock. Stock only arrives through movements.
    pub fn register(new: NewItem, now: DateTime<Utc>) -> LedgerResult<Self> {
        let sku = new.sku.trim();
        if sku.is_empty() {
            return Err(LedgerError::validation("sku cannot be empty"));
        }
        if new.cost_price < 0 || new.selling_price < 0 {
            return Err(LedgerError::validation("prices cannot be negative"));
        }

        Ok(Self {
            id: ItemId::new(),
            sku: sku.to_string(),
            product_id: new.product_id,
            category: new.category,
            location: new.location,
            quantity: 0,
            min_quantity: new.min_quantity,
            max_quantity: new.max_quantity,
            tracking_type: new.tracking_type,
            cost_price: new.cost_price,
            selling_price: new.selling_price,
            status: evaluate_status(0, new.min_quantity, new.max_quantity),
            last_movement: None,
            batches: Vec::new(),
            serials: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn min_quantity(&self) -> u64 {
        self.min_quantity
    }

    pub fn max_quantity(&self) -> u64 {
        self.max_quantity
    }

    pub fn tracking_type(&self) -> TrackingType {
        self.tracking_type
    }

    pub fn cost_price(&self) -> i64 {
        self.cost_price
    }

    pub fn selling_price(&self) -> i64 {
        self.selling_price
    }

    pub fn status(&self) -> StockStatus {
        self.status
    }

    pub fn last_movement(&self) -> Option<DateTime<Utc>> {
        self.last_movement
    }

    pub fn batches(&self) -> &[BatchInfo] {
        &self.batches
    }

    pub fn serials(&self) -> &[SerialInfo] {
        &self.serials
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn batch(&self, batch_number: &str) -> Option<&BatchInfo> {
        self.batches.iter().find(|b| b.batch_number == batch_number)
    }

    pub fn serial(&self, serial_number: &str) -> Option<&SerialInfo> {
        self.serials.iter().find(|s| s.serial_number == serial_number)
    }

    pub fn available_serials(&self) -> impl Iterator<Item = &SerialInfo> {
        self.serials
            .iter()
            .filter(|s| s.status == SerialStatus::Available)
    }

    /// Units that can be shipped today: non-expired batch stock for batch
    /// items, the full quantity otherwise.
    pub fn sellable_quantity(&self, today: NaiveDate) -> u64 {
        match self.tracking_type {
            TrackingType::Batch => self
                .batches
                .iter()
                .filter(|b| !b.is_expired(today))
                .map(|b| b.quantity)
                .sum(),
            _ => self.quantity,
        }
    }

    /// Change thresholds and re-derive status. Returns the previous status.
    pub fn set_thresholds(
        &mut self,
        min_quantity: u64,
        max_quantity: u64,
        now: DateTime<Utc>,
    ) -> StockStatus {
        let previous = self.status;
        self.min_quantity = min_quantity;
        self.max_quantity = max_quantity;
        self.refresh_status();
        self.updated_at = now;
        previous
    }

    /// Aggregate recomputed from the sub-ledger, if the item has one.
    pub fn tracked_quantity(&self) -> Option<u64> {
        match self.tracking_type {
            TrackingType::None => None,
            TrackingType::Batch => Some(self.batches.iter().map(|b| b.quantity).sum()),
            TrackingType::Serial => Some(self.available_serials().count() as u64),
        }
    }

    /// Check `quantity` against the batch/serial sub-ledger.
    ///
    /// A mismatch is an internal consistency failure, not a user error.
    pub fn verify_aggregate(&self) -> LedgerResult<()> {
        match self.tracked_quantity() {
            Some(tracked) if tracked != self.quantity => Err(LedgerError::consistency(format!(
                "sku {}: quantity {} != {:?} aggregate {}",
                self.sku, self.quantity, self.tracking_type, tracked
            ))),
            _ => Ok(()),
        }
    }

    pub(crate) fn set_quantity(&mut self, quantity: u64) {
        self.quantity = quantity;
        self.refresh_status();
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.last_movement = Some(now);
        self.updated_at = now;
    }

    fn refresh_status(&mut self) {
        self.status = evaluate_status(self.quantity, self.min_quantity, self.max_quantity);
    }
}

impl Record for InventoryItem {
    type Key = ProductId;

    const KIND: &'static str = "inventory_item";

    fn key(&self) -> ProductId {
        self.product_id
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

    fn new_item(tracking_type: TrackingType) -> NewItem {
        NewItem {
            sku: "SKU-001".to_string(),
            product_id: ProductId::new(),
            min_quantity: 2,
            max_quantity: 20,
            tracking_type,
            cost_price: 1_000,
            selling_price: 1_500,
            category: Some("beverages".to_string()),
            location: None,
        }
    }

    #[test]
    fn registered_item_starts_out_of_stock() {
        let item = InventoryItem::register(new_item(TrackingType::None), Utc::now()).unwrap();
        assert_eq!(item.quantity(), 0);
        assert_eq!(item.status(), StockStatus::OutOfStock);
        assert_eq!(item.version(), 0);
    }

    #[test]
    fn blank_sku_is_rejected() {
        let mut new = new_item(TrackingType::None);
        new.sku = "   ".to_string();
        let err = InventoryItem::register(new, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn threshold_change_rederives_status() {
        let mut item = InventoryItem::register(new_item(TrackingType::None), Utc::now()).unwrap();
        item.set_quantity(5);
        assert_eq!(item.status(), StockStatus::InStock);

        let previous = item.set_thresholds(10, 50, Utc::now());
        assert_eq!(previous, StockStatus::InStock);
        assert_eq!(item.status(), StockStatus::LowStock);
    }

    #[test]
    fn serial_transitions_are_restricted() {
        use SerialStatus::*;
        assert!(Available.can_transition_to(Sold));
        assert!(Sold.can_transition_to(Returned));
        assert!(Available.can_transition_to(Damaged));
        assert!(Returned.can_transition_to(Damaged));

        assert!(!Sold.can_transition_to(Available));
        assert!(!Returned.can_transition_to(Available));
        assert!(!Damaged.can_transition_to(Available));
        assert!(!Sold.can_transition_to(Damaged));
    }

    #[test]
    fn aggregate_mismatch_is_a_consistency_error() {
        let mut item = InventoryItem::register(new_item(TrackingType::Batch), Utc::now()).unwrap();
        item.quantity = 3;
        let err = item.verify_aggregate().unwrap_err();
        assert!(matches!(err, LedgerError::Consistency(_)));
    }

    #[test]
    fn expiry_is_inclusive_of_the_expiry_date() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let batch = BatchInfo {
            batch_number: "L1".to_string(),
            quantity: 4,
            manufacture_date: None,
            expiry_date: Some(today),
            received_at: Utc::now(),
        };
        assert!(!batch.is_expired(today));
        assert!(batch.is_expired(today.succ_opt().unwrap()));
        assert_eq!(batch.days_until_expiry(today), Some(0));
    }
}
