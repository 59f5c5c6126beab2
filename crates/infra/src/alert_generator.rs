//! Alert generator: turns rule drafts into deduplicated, persisted alerts.
//!
//! At most one open alert exists per `(type, product)`. A repeated trigger
//! refreshes that alert (quantity, severity, timestamp, occurrence count)
//! instead of creating a new one. Everything here runs after the stock change
//! it reacts to has committed; failures are logged, never propagated back into
//! the movement.

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use stockledger_core::{AlertId, ExpectedVersion, LedgerError, LedgerResult, UserId};
use stockledger_inventory::{
    AlertDraft, AlertFilter, Catalog, InventoryItem, LedgerEvent, StockAlert, StockCheck,
    StockStatus, TrackingType, discrepancy_alert, expiring_alert, threshold_alert,
};

use crate::notifier::Notifier;
use crate::store::LedgerStore;

pub struct AlertGenerator<S> {
    store: S,
    notifier: Arc<Notifier>,
    catalog: Arc<dyn Catalog>,
    horizon_days: i64,
    /// Serializes find-or-create and resolve.
    guard: Mutex<()>,
}

impl<S: LedgerStore> AlertGenerator<S> {
    pub fn new(
        store: S,
        notifier: Arc<Notifier>,
        catalog: Arc<dyn Catalog>,
        horizon_days: i64,
    ) -> Self {
        Self {
            store,
            notifier,
            catalog,
            horizon_days,
            guard: Mutex::new(()),
        }
    }

    /// Low/over-stock rule after an item's status may have changed.
    pub fn on_status_change(&self, item: &InventoryItem, previous: StockStatus) -> Option<StockAlert> {
        self.emit(threshold_alert(item, previous)?)
    }

    /// Expiry rule after a batch item was written.
    pub fn on_batch_write(&self, item: &InventoryItem, today: NaiveDate) -> Option<StockAlert> {
        self.emit(expiring_alert(item, today, self.horizon_days)?)
    }

    /// Discrepancy rule for every off line of a completed check.
    pub fn on_check_completed(&self, check: &StockCheck) -> Vec<StockAlert> {
        check
            .discrepant_lines()
            .filter_map(|line| discrepancy_alert(check.id(), check.check_number(), line))
            .filter_map(|draft| self.emit(draft))
            .collect()
    }

    /// Run the expiry rule over every batch-tracked item.
    pub fn scan_expiring(&self, today: NaiveDate) -> LedgerResult<Vec<StockAlert>> {
        let mut raised = Vec::new();
        for item in self.store.items().list()? {
            if item.tracking_type() != TrackingType::Batch {
                continue;
            }
            if let Some(draft) = expiring_alert(&item, today, self.horizon_days) {
                raised.push(self.raise_or_refresh(draft)?);
            }
        }
        info!(alerts = raised.len(), %today, "expiry scan finished");
        Ok(raised)
    }

    /// Best-effort variant of [`Self::raise_or_refresh`].
    pub fn emit(&self, draft: AlertDraft) -> Option<StockAlert> {
        let sku = draft.sku.clone();
        match self.raise_or_refresh(draft) {
            Ok(alert) => Some(alert),
            Err(e) => {
                warn!(%sku, error = %e, "alert generation failed");
                None
            }
        }
    }

    pub fn raise_or_refresh(&self, draft: AlertDraft) -> LedgerResult<StockAlert> {
        let _serialized = self
            .guard
            .lock()
            .map_err(|_| LedgerError::consistency("alert generator poisoned"))?;
        let now = Utc::now();

        let key = (draft.alert_type, draft.product_id);
        let open = self
            .store
            .alerts()
            .list()?
            .into_iter()
            .find(|a| !a.is_resolved() && a.dedup_key() == key);

        match open {
            Some(mut alert) => {
                let expected = ExpectedVersion::of(&alert);
                alert.refresh(draft, now)?;
                let stored = self.store.alerts().put(alert, expected)?;
                self.notifier.publish(LedgerEvent::AlertUpdated {
                    alert: stored.clone(),
                    at: now,
                });
                Ok(stored)
            }
            None => {
                let name = self.catalog.product_meta(draft.product_id).map(|m| m.name);
                let alert = StockAlert::raise(AlertId::new(), draft, name, now);
                let stored = self.store.alerts().put(alert, ExpectedVersion::ABSENT)?;
                info!(
                    alert_id = %stored.id(),
                    sku = stored.sku(),
                    alert_type = ?stored.alert_type(),
                    severity = ?stored.severity(),
                    "alert raised"
                );
                self.notifier.publish(LedgerEvent::AlertRaised {
                    alert: stored.clone(),
                    at: now,
                });
                Ok(stored)
            }
        }
    }

    /// Alerts matching `filter`, most severe first, newest first within a severity.
    pub fn list(&self, filter: &AlertFilter) -> LedgerResult<Vec<StockAlert>> {
        let mut alerts: Vec<StockAlert> = self
            .store
            .alerts()
            .list()?
            .into_iter()
            .filter(|a| filter.matches(a))
            .collect();
        alerts.sort_by(|a, b| {
            b.severity()
                .cmp(&a.severity())
                .then_with(|| b.created_at().cmp(&a.created_at()))
        });
        Ok(alerts)
    }

    pub fn get(&self, id: AlertId) -> LedgerResult<StockAlert> {
        self.store
            .alerts()
            .get(id)?
            .ok_or_else(|| LedgerError::not_found(format!("alert {id}")))
    }

    /// Operator action; the only external mutation of an alert.
    pub fn resolve(&self, id: AlertId, by: UserId, note: Option<String>) -> LedgerResult<StockAlert> {
        let _serialized = self
            .guard
            .lock()
            .map_err(|_| LedgerError::consistency("alert generator poisoned"))?;
        let now = Utc::now();

        let mut alert = self.get(id)?;
        let expected = ExpectedVersion::of(&alert);
        alert.resolve(by, note, now)?;
        let stored = self.store.alerts().put(alert, expected)?;

        info!(alert_id = %id, sku = stored.sku(), "alert resolved");
        self.notifier.publish(LedgerEvent::AlertResolved {
            alert: stored.clone(),
            at: now,
        });
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::store::InMemoryLedgerStore;
    use stockledger_core::ProductId;
    use stockledger_events::InMemorySink;
    use stockledger_inventory::{AlertSeverity, AlertState, AlertType, NewItem};

    use crate::notifier::LedgerEnvelope;

    fn setup() -> (
        AlertGenerator<Arc<InMemoryLedgerStore>>,
        Arc<InMemorySink<LedgerEnvelope>>,
    ) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let sink: Arc<InMemorySink<LedgerEnvelope>> = Arc::new(InMemorySink::new());
        let notifier = Arc::new(Notifier::new(sink.clone()));
        let generator = AlertGenerator::new(store, notifier, Arc::new(InMemoryCatalog::new()), 30);
        (generator, sink)
    }

    fn draft(product_id: ProductId, quantity: u64) -> AlertDraft {
        AlertDraft {
            alert_type: AlertType::LowStock,
            severity: if quantity == 0 {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            },
            product_id,
            sku: "SKU-001".to_string(),
            message: format!("{quantity} left"),
            current_quantity: quantity,
            threshold: Some(2),
            batch_number: None,
            expiry_date: None,
            check_id: None,
        }
    }

    #[test]
    fn repeated_trigger_refreshes_the_open_alert() {
        let (generator, sink) = setup();
        let product_id = ProductId::new();

        let first = generator.raise_or_refresh(draft(product_id, 1)).unwrap();
        let second = generator.raise_or_refresh(draft(product_id, 0)).unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(second.occurrences(), 2);
        assert_eq!(second.current_quantity(), 0);
        assert_eq!(second.severity(), AlertSeverity::Critical);
        assert_eq!(generator.list(&AlertFilter::default()).unwrap().len(), 1);

        let types: Vec<String> = sink.delivered().iter().map(|e| e.event_type().to_string()).collect();
        assert_eq!(types, vec!["inventory.alert.raised", "inventory.alert.updated"]);
    }

    #[test]
    fn resolved_alert_lets_a_new_one_open() {
        let (generator, _sink) = setup();
        let product_id = ProductId::new();

        let first = generator.raise_or_refresh(draft(product_id, 1)).unwrap();
        generator.resolve(first.id(), UserId::new(), None).unwrap();
        let err = generator.resolve(first.id(), UserId::new(), None).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));

        let second = generator.raise_or_refresh(draft(product_id, 1)).unwrap();
        assert_ne!(first.id(), second.id());

        let all = generator
            .list(&AlertFilter {
                state: AlertState::All,
                ..AlertFilter::default()
            })
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn status_change_without_crossing_raises_nothing() {
        let (generator, _sink) = setup();
        let item = InventoryItem::register(
            NewItem {
                sku: "SKU-9".to_string(),
                product_id: ProductId::new(),
                min_quantity: 2,
                max_quantity: 20,
                tracking_type: TrackingType::None,
                cost_price: 1,
                selling_price: 2,
                category: None,
                location: None,
            },
            Utc::now(),
        )
        .unwrap();
        // registered items start out of stock; no crossing, no alert
        assert!(generator.on_status_change(&item, StockStatus::OutOfStock).is_none());
    }
}
