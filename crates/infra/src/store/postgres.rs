//! Postgres-backed ledger store.
//!
//! Each ledger table is a row per record: `(id, version, record, updated_at)`,
//! with the record itself as JSONB. The `version` column is authoritative; the
//! version inside the JSON document is overwritten on read.
//!
//! ## Compare-and-swap
//!
//! | Expectation | Statement | Mismatch |
//! |-------------|-----------|----------|
//! | `Exact(0)` | `INSERT ... ON CONFLICT DO NOTHING` | no row inserted |
//! | `Exact(n)` | `UPDATE ... WHERE id = $1 AND version = n` | no row updated |
//! | `Any` | upsert, `version = version + 1` | never |
//!
//! A mismatch (or a `23505` unique violation) maps to `StoreError::Concurrency`.
//! Batches (`put_all`, `commit_movement`) run in one transaction; the first
//! mismatch drops the transaction, which rolls it back.
//!
//! ## Runtime
//!
//! `LedgerStore` is synchronous. Operations are driven with `Handle::block_on`
//! on the runtime the store was connected from, so callers inside async code
//! must run the ledger on a blocking thread (`spawn_blocking`).

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{info, instrument};
use uuid::Uuid;

use stockledger_core::{ExpectedVersion, Record};
use stockledger_inventory::{InventoryItem, StockAlert, StockCheck, StockMovement};

use super::r#trait::{ensure_distinct_keys, LedgerStore, RecordTable, StoreError};

const ITEMS_TABLE: &str = "stockledger_items";
const MOVEMENTS_TABLE: &str = "stockledger_movements";
const CHECKS_TABLE: &str = "stockledger_checks";
const ALERTS_TABLE: &str = "stockledger_alerts";

/// One ledger table in Postgres.
#[derive(Debug, Clone)]
pub struct PgTable<R> {
    pool: PgPool,
    runtime: Handle,
    table: &'static str,
    _record: PhantomData<fn() -> R>,
}

impl<R> PgTable<R>
where
    R: Record + Serialize + DeserializeOwned,
    R::Key: Into<Uuid>,
{
    fn new(pool: PgPool, runtime: Handle, table: &'static str) -> Self {
        Self {
            pool,
            runtime,
            table,
            _record: PhantomData,
        }
    }

    #[instrument(skip(self), fields(table = self.table), err)]
    async fn fetch(&self, id: Uuid) -> Result<Option<R>, StoreError> {
        let sql = format!("SELECT version, record FROM {} WHERE id = $1", self.table);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_record", e))?;
        row.as_ref().map(decode_row).transpose()
    }

    #[instrument(skip(self), fields(table = self.table), err)]
    async fn fetch_all(&self) -> Result<Vec<R>, StoreError> {
        let sql = format!("SELECT version, record FROM {} ORDER BY id ASC", self.table);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_records", e))?;
        rows.iter().map(decode_row).collect()
    }

    #[instrument(skip(self, writes), fields(table = self.table, writes = writes.len()), err)]
    async fn write_batch(&self, writes: Vec<(R, ExpectedVersion)>) -> Result<Vec<R>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut stored = Vec::with_capacity(writes.len());
        for (record, expected) in writes {
            stored.push(write_row(&mut tx, self.table, record, expected).await?);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(stored)
    }
}

impl<R> RecordTable<R> for PgTable<R>
where
    R: Record + Serialize + DeserializeOwned,
    R::Key: Into<Uuid>,
{
    fn get(&self, key: R::Key) -> Result<Option<R>, StoreError> {
        self.runtime.block_on(self.fetch(key.into()))
    }

    fn list(&self) -> Result<Vec<R>, StoreError> {
        self.runtime.block_on(self.fetch_all())
    }

    fn put_all(&self, writes: Vec<(R, ExpectedVersion)>) -> Result<Vec<R>, StoreError> {
        if writes.is_empty() {
            return Ok(vec![]);
        }
        ensure_distinct_keys(&writes)?;
        self.runtime.block_on(self.write_batch(writes))
    }
}

/// Ledger store over a Postgres connection pool.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
    runtime: Handle,
    items: PgTable<InventoryItem>,
    movements: PgTable<StockMovement>,
    checks: PgTable<StockCheck>,
    alerts: PgTable<StockAlert>,
}

impl PostgresLedgerStore {
    /// Wrap an existing pool. Must be called from within a tokio runtime.
    pub fn new(pool: PgPool) -> Result<Self, StoreError> {
        let runtime = Handle::try_current().map_err(|_| {
            StoreError::Unavailable("PostgresLedgerStore requires a tokio runtime".to_string())
        })?;
        Ok(Self {
            items: PgTable::new(pool.clone(), runtime.clone(), ITEMS_TABLE),
            movements: PgTable::new(pool.clone(), runtime.clone(), MOVEMENTS_TABLE),
            checks: PgTable::new(pool.clone(), runtime.clone(), CHECKS_TABLE),
            alerts: PgTable::new(pool.clone(), runtime.clone(), ALERTS_TABLE),
            pool,
            runtime,
        })
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Self::new(pool)
    }

    /// Create the ledger tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for table in [ITEMS_TABLE, MOVEMENTS_TABLE, CHECKS_TABLE, ALERTS_TABLE] {
            let sql = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id UUID PRIMARY KEY,
                    version BIGINT NOT NULL CHECK (version > 0),
                    record JSONB NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#
            );
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        info!("ledger tables ready");
        Ok(())
    }

    #[instrument(skip(self, items, movement), fields(items = items.len()), err)]
    async fn commit_movement_tx(
        &self,
        items: Vec<(InventoryItem, ExpectedVersion)>,
        movement: (StockMovement, ExpectedVersion),
    ) -> Result<(Vec<InventoryItem>, StockMovement), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut stored_items = Vec::with_capacity(items.len());
        for (item, expected) in items {
            stored_items.push(write_row(&mut tx, ITEMS_TABLE, item, expected).await?);
        }
        let (movement, expected) = movement;
        let stored_movement = write_row(&mut tx, MOVEMENTS_TABLE, movement, expected).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok((stored_items, stored_movement))
    }
}

impl LedgerStore for PostgresLedgerStore {
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
        self.runtime.block_on(self.commit_movement_tx(items, movement))
    }
}

/// Write one record inside `tx`, enforcing its expectation.
async fn write_row<R>(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    mut record: R,
    expected: ExpectedVersion,
) -> Result<R, StoreError>
where
    R: Record + Serialize,
    R::Key: Into<Uuid>,
{
    let key = record.key();
    let id: Uuid = key.into();
    let mismatch = |expected: ExpectedVersion| {
        StoreError::Concurrency(format!("{} {key}: expected {expected:?}", R::KIND))
    };

    match expected {
        ExpectedVersion::Exact(0) => {
            record.set_version(1);
            let sql = format!(
                r#"
                INSERT INTO {table} (id, version, record, updated_at)
                VALUES ($1, 1, $2, NOW())
                ON CONFLICT (id) DO NOTHING
                "#
            );
            let done = sqlx::query(&sql)
                .bind(id)
                .bind(serde_json::to_value(&record)?)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("insert_record", e))?;
            if done.rows_affected() == 0 {
                return Err(mismatch(expected));
            }
        }
        ExpectedVersion::Exact(current) => {
            record.set_version(current + 1);
            let sql = format!(
                r#"
                UPDATE {table}
                SET version = $3, record = $2, updated_at = NOW()
                WHERE id = $1 AND version = $4
                "#
            );
            let done = sqlx::query(&sql)
                .bind(id)
                .bind(serde_json::to_value(&record)?)
                .bind(to_db_version(current + 1)?)
                .bind(to_db_version(current)?)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("update_record", e))?;
            if done.rows_affected() == 0 {
                return Err(mismatch(expected));
            }
        }
        ExpectedVersion::Any => {
            let sql = format!(
                r#"
                INSERT INTO {table} (id, version, record, updated_at)
                VALUES ($1, 1, $2, NOW())
                ON CONFLICT (id) DO UPDATE SET
                    version = {table}.version + 1,
                    record = EXCLUDED.record,
                    updated_at = NOW()
                RETURNING version
                "#
            );
            let row = sqlx::query(&sql)
                .bind(id)
                .bind(serde_json::to_value(&record)?)
                .fetch_one(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("upsert_record", e))?;
            record.set_version(read_version(&row)?);
        }
    }
    Ok(record)
}

fn decode_row<R>(row: &PgRow) -> Result<R, StoreError>
where
    R: Record + DeserializeOwned,
{
    let document: serde_json::Value = row.try_get("record").map_err(|e| {
        StoreError::Unavailable(format!("failed to read {} record column: {e}", R::KIND))
    })?;
    let mut record: R = serde_json::from_value(document)?;
    record.set_version(read_version(row)?);
    Ok(record)
}

fn read_version(row: &PgRow) -> Result<u64, StoreError> {
    let version: i64 = row
        .try_get("version")
        .map_err(|e| StoreError::Unavailable(format!("failed to read version column: {e}")))?;
    u64::try_from(version)
        .map_err(|_| StoreError::Unavailable(format!("negative record version {version}")))
}

fn to_db_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version)
        .map_err(|_| StoreError::InvalidWrite(format!("version {version} out of range")))
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique violation: a concurrent insert won
                Some("23505") => StoreError::Concurrency(msg),
                Some("23514") => StoreError::InvalidWrite(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}

/// Postgres tests need a live database and are skipped unless
/// `STOCKLEDGER_TEST_DATABASE_URL` is set.
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use stockledger_core::{MovementId, ProductId, UserId};
    use stockledger_inventory::{
        MovementLineRequest, MovementRequest, MovementSubType, MovementType, NewItem,
        StockMovementItem, TrackingType,
    };

    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::config::EngineConfig;
    use crate::ledger::InventoryLedger;
    use crate::notifier::LedgerEnvelope;
    use stockledger_events::InMemorySink;

    const TEST_DATABASE_URL_VAR: &str = "STOCKLEDGER_TEST_DATABASE_URL";

    async fn store() -> Option<Arc<PostgresLedgerStore>> {
        let url = std::env::var(TEST_DATABASE_URL_VAR).ok()?;
        let store = PostgresLedgerStore::connect(&url, 4).await.unwrap();
        store.migrate().await.unwrap();
        Some(Arc::new(store))
    }

    fn new_item(sku: &str) -> NewItem {
        NewItem {
            sku: sku.to_string(),
            product_id: ProductId::new(),
            min_quantity: 0,
            max_quantity: 100,
            tracking_type: TrackingType::None,
            cost_price: 100,
            selling_price: 150,
            category: None,
            location: None,
        }
    }

    fn item(sku: &str) -> InventoryItem {
        InventoryItem::register(new_item(sku), Utc::now()).unwrap()
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

    fn unique_sku(prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::now_v7())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_requires_the_stored_version() {
        let Some(store) = store().await else { return };
        tokio::task::spawn_blocking(move || {
            let stored = store.items().put(item(&unique_sku("PG-CAS")), ExpectedVersion::ABSENT).unwrap();
            assert_eq!(stored.version(), 1);

            let err = store.items().put(stored.clone(), ExpectedVersion::ABSENT).unwrap_err();
            assert!(matches!(err, StoreError::Concurrency(_)));

            let again = store.items().put(stored.clone(), ExpectedVersion::of(&stored)).unwrap();
            assert_eq!(again.version(), 2);

            // stale writer still holds version 1
            let err = store.items().put(stored.clone(), ExpectedVersion::of(&stored)).unwrap_err();
            assert!(matches!(err, StoreError::Concurrency(_)));

            let read = store.items().get(stored.key()).unwrap().unwrap();
            assert_eq!(read.version(), 2);
            assert_eq!(read.sku(), stored.sku());
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_commit_writes_nothing() {
        let Some(store) = store().await else { return };
        tokio::task::spawn_blocking(move || {
            let a = store.items().put(item(&unique_sku("PG-TX")), ExpectedVersion::ABSENT).unwrap();
            let movement = received(&a);

            let err = store
                .commit_movement(
                    vec![(a.clone(), ExpectedVersion::of(&a))],
                    (movement.clone(), ExpectedVersion::Exact(7)),
                )
                .unwrap_err();
            assert!(matches!(err, StoreError::Concurrency(_)));
            assert_eq!(store.items().get(a.key()).unwrap().unwrap().version(), 1);
            assert!(store.movements().get(movement.key()).unwrap().is_none());

            let (items, stored) = store
                .commit_movement(
                    vec![(a.clone(), ExpectedVersion::of(&a))],
                    (movement.clone(), ExpectedVersion::ABSENT),
                )
                .unwrap();
            assert_eq!(items[0].version(), 2);
            assert_eq!(stored.version(), 1);
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ledger_state_survives_a_new_connection() {
        let Some(store) = store().await else { return };
        let sku = unique_sku("PG-LEDGER");
        let pid = {
            let store = store.clone();
            let sku = sku.clone();
            tokio::task::spawn_blocking(move || {
                let sink: Arc<InMemorySink<LedgerEnvelope>> = Arc::new(InMemorySink::new());
                let ledger =
                    InventoryLedger::new(store, Arc::new(InMemoryCatalog::new()), sink, &EngineConfig::default())
                        .unwrap();
                let pid = ledger.register_item(new_item(&sku)).unwrap().product_id();
                ledger
                    .process_movement(MovementRequest {
                        lines: vec![MovementLineRequest {
                            product_id: pid,
                            quantity: 9,
                            ..MovementLineRequest::default()
                        }],
                        ..movement_request(MovementType::Inbound, MovementSubType::Purchase)
                    })
                    .unwrap();
                ledger
                    .process_movement(MovementRequest {
                        lines: vec![MovementLineRequest {
                            product_id: pid,
                            quantity: 4,
                            ..MovementLineRequest::default()
                        }],
                        ..movement_request(MovementType::Outbound, MovementSubType::Sale)
                    })
                    .unwrap();
                pid
            })
            .await
            .unwrap()
        };

        let url = std::env::var(TEST_DATABASE_URL_VAR).unwrap();
        let reopened = PostgresLedgerStore::connect(&url, 2).await.unwrap();
        tokio::task::spawn_blocking(move || {
            let item = reopened.items().get(pid).unwrap().unwrap();
            assert_eq!(item.sku(), sku);
            assert_eq!(item.quantity(), 5);
            let completed = reopened
                .movements()
                .list()
                .unwrap()
                .into_iter()
                .filter(|m| m.product_ids() == vec![pid])
                .count();
            assert_eq!(completed, 2);
        })
        .await
        .unwrap();
    }

    fn movement_request(movement_type: MovementType, sub_type: MovementSubType) -> MovementRequest {
        MovementRequest {
            movement_type,
            sub_type,
            lines: vec![],
            created_by: UserId::new(),
            order_id: None,
            reference: None,
            discount_amount: 0,
            allow_negative: false,
            note: None,
            submit: false,
        }
    }
}
