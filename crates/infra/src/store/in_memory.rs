use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use stockledger_core::{ExpectedVersion, Record};
use stockledger_inventory::{InventoryItem, StockAlert, StockCheck, StockMovement};

use super::r#trait::{ensure_distinct_keys, LedgerStore, RecordTable, StoreError};

/// In-memory record table.
///
/// A single `RwLock` makes every `put_all` batch atomic with respect to
/// readers: nobody observes half of a batch.
#[derive(Debug)]
pub struct InMemoryTable<R: Record> {
    records: RwLock<BTreeMap<R::Key, R>>,
}

impl<R: Record> InMemoryTable<R> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Table pre-filled with records as they were persisted (versions kept).
    pub fn with_records(records: impl IntoIterator<Item = R>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|r| (r.key(), r)).collect()),
        }
    }
}

impl<R: Record> Default for InMemoryTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

type Records<R> = BTreeMap<<R as Record>::Key, R>;

impl<R: Record> InMemoryTable<R> {
    fn read_guard(&self) -> Result<RwLockReadGuard<'_, Records<R>>, StoreError> {
        self.records
            .read()
            .map_err(|_| StoreError::Unavailable(format!("{} table lock poisoned", R::KIND)))
    }

    fn write_guard(&self) -> Result<RwLockWriteGuard<'_, Records<R>>, StoreError> {
        self.records
            .write()
            .map_err(|_| StoreError::Unavailable(format!("{} table lock poisoned", R::KIND)))
    }
}

/// Checks every expectation of a batch against the held table.
fn check_writes<R: Record>(
    records: &Records<R>,
    writes: &[(R, ExpectedVersion)],
) -> Result<(), StoreError> {
    for (record, expected) in writes {
        let current = records.get(&record.key()).map(Record::version).unwrap_or(0);
        if !expected.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "{} {}: expected {expected:?}, found {current}",
                R::KIND,
                record.key()
            )));
        }
    }
    Ok(())
}

/// Writes an already-checked batch, bumping each version by one.
fn apply_writes<R: Record>(records: &mut Records<R>, writes: Vec<(R, ExpectedVersion)>) -> Vec<R> {
    let mut stored = Vec::with_capacity(writes.len());
    for (mut record, _) in writes {
        let current = records.get(&record.key()).map(Record::version).unwrap_or(0);
        record.set_version(current + 1);
        records.insert(record.key(), record.clone());
        stored.push(record);
    }
    stored
}

impl<R: Record> RecordTable<R> for InMemoryTable<R> {
    fn get(&self, key: R::Key) -> Result<Option<R>, StoreError> {
        Ok(self.read_guard()?.get(&key).cloned())
    }

    fn list(&self) -> Result<Vec<R>, StoreError> {
        Ok(self.read_guard()?.values().cloned().collect())
    }

    fn put_all(&self, writes: Vec<(R, ExpectedVersion)>) -> Result<Vec<R>, StoreError> {
        if writes.is_empty() {
            return Ok(vec![]);
        }
        ensure_distinct_keys(&writes)?;

        let mut records = self.write_guard()?;
        check_writes(&records, &writes)?;
        Ok(apply_writes(&mut records, writes))
    }
}

/// In-memory ledger store for tests/dev and the single-node server.
///
/// Durable across restarts through JSON snapshots (see `LedgerSnapshot`).
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    pub(super) items: InMemoryTable<InventoryItem>,
    pub(super) movements: InMemoryTable<StockMovement>,
    pub(super) checks: InMemoryTable<StockCheck>,
    pub(super) alerts: InMemoryTable<StockAlert>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn items(&self) -> &dyn RecordTable<InventoryItem> {
        &self.items
    }

    fn movements(&self) -> &dyn RecordTable<StockMovement> {
        &self.movements
    }

    fn checks(&self) -> &dyn RecordTable<StockCheck> {
        &self.checks
    }

    fn alerts(&self) -> &dyn RecordTable<StockAlert> {
        &self.alerts
    }

    fn commit_movement(
        &self,
        items: Vec<(InventoryItem, ExpectedVersion)>,
        movement: (StockMovement, ExpectedVersion),
    ) -> Result<(Vec<InventoryItem>, StockMovement), StoreError> {
        ensure_distinct_keys(&items)?;

        // Lock order: items, then movements.
        let mut item_records = self.items.write_guard()?;
        let mut movement_records = self.movements.write_guard()?;

        check_writes(&item_records, &items)?;
        let movement = vec![movement];
        check_writes(&movement_records, &movement)?;

        let stored_items = apply_writes(&mut item_records, items);
        let stored_movement = apply_writes(&mut movement_records, movement)
            .pop()
            .ok_or_else(|| StoreError::Unavailable("empty result writing movement".to_string()))?;
        Ok((stored_items, stored_movement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockledger_core::{LedgerError, MovementId, ProductId, UserId};
    use stockledger_inventory::{
        MovementLineRequest, MovementRequest, MovementSubType, MovementType, NewItem,
        StockMovementItem, TrackingType,
    };

    fn item(sku: &str) -> InventoryItem {
        InventoryItem::register(
            NewItem {
                sku: sku.to_string(),
                product_id: ProductId::new(),
                min_quantity: 2,
                max_quantity: 20,
                tracking_type: TrackingType::None,
                cost_price: 100,
                selling_price: 150,
                category: None,
                location: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn put_assigns_versions_and_enforces_cas() {
        let table: InMemoryTable<InventoryItem> = InMemoryTable::new();
        let stored = table.put(item("SKU-1"), ExpectedVersion::ABSENT).unwrap();
        assert_eq!(stored.version(), 1);

        // stale writer
        let err = table.put(stored.clone(), ExpectedVersion::ABSENT).unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
        assert!(matches!(LedgerError::from(err), LedgerError::VersionConflict(_)));

        let again = table.put(stored.clone(), ExpectedVersion::of(&stored)).unwrap();
        assert_eq!(again.version(), 2);
        assert_eq!(table.get(stored.key()).unwrap().unwrap().version(), 2);
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let table: InMemoryTable<InventoryItem> = InMemoryTable::new();
        let a = table.put(item("SKU-A"), ExpectedVersion::ABSENT).unwrap();
        let b = item("SKU-B");

        // second expectation is wrong: nothing may be written
        let err = table
            .put_all(vec![
                (a.clone(), ExpectedVersion::of(&a)),
                (b.clone(), ExpectedVersion::Exact(3)),
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
        assert_eq!(table.get(a.key()).unwrap().unwrap().version(), 1);
        assert!(table.get(b.key()).unwrap().is_none());
    }

    fn received(item: &InventoryItem) -> StockMovement {
        let request = MovementRequest {
            movement_type: MovementType::Inbound,
            sub_type: MovementSubType::Purchase,
            lines: vec![MovementLineRequest {
                product_id: item.product_id(),
                quantity: 3,
                ..MovementLineRequest::default()
            }],
            created_by: UserId::new(),
            order_id: None,
            reference: None,
            discount_amount: 0,
            allow_negative: false,
            note: None,
            submit: false,
        };
        let line = StockMovementItem::from_request(&request.lines[0], request.movement_type, item, None).unwrap();
        StockMovement::create(MovementId::new(), "IN-20260101-001".into(), &request, vec![line], 1_000, Utc::now())
            .unwrap()
    }

    #[test]
    fn commit_movement_writes_items_and_movement_together() {
        let store = InMemoryLedgerStore::new();
        let a = store.items().put(item("SKU-A"), ExpectedVersion::ABSENT).unwrap();
        let movement = received(&a);

        let (items, stored) = store
            .commit_movement(
                vec![(a.clone(), ExpectedVersion::of(&a))],
                (movement.clone(), ExpectedVersion::ABSENT),
            )
            .unwrap();
        assert_eq!(items[0].version(), 2);
        assert_eq!(stored.version(), 1);
        assert!(store.movements().get(movement.key()).unwrap().is_some());
    }

    #[test]
    fn commit_movement_is_all_or_nothing() {
        let store = InMemoryLedgerStore::new();
        let a = store.items().put(item("SKU-A"), ExpectedVersion::ABSENT).unwrap();
        let movement = received(&a);

        // stale movement expectation: the item write must not land either
        let err = store
            .commit_movement(
                vec![(a.clone(), ExpectedVersion::of(&a))],
                (movement.clone(), ExpectedVersion::Exact(4)),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
        assert_eq!(store.items().get(a.key()).unwrap().unwrap().version(), 1);
        assert!(store.movements().get(movement.key()).unwrap().is_none());

        // stale item expectation: the movement must not land
        let err = store
            .commit_movement(
                vec![(a.clone(), ExpectedVersion::Exact(9))],
                (movement.clone(), ExpectedVersion::ABSENT),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
        assert!(store.movements().get(movement.key()).unwrap().is_none());
    }

    #[test]
    fn duplicate_keys_in_batch_are_rejected() {
        let table: InMemoryTable<InventoryItem> = InMemoryTable::new();
        let a = item("SKU-A");
        let err = table
            .put_all(vec![
                (a.clone(), ExpectedVersion::Any),
                (a, ExpectedVersion::Any),
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidWrite(_)));
    }
}
