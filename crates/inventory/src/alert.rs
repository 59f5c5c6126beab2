//! Stock alerts and the rules that derive them.
//!
//! Rules are pure: they turn item/check state into an [`AlertDraft`]. The
//! generator in `stockledger-infra` deduplicates drafts against open alerts.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{AlertId, CheckId, LedgerError, LedgerResult, ProductId, Record, UserId};

use crate::check::StockCheckItem;
use crate::item::InventoryItem;
use crate::status::StockStatus;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LowStock,
    Overstock,
    Expiring,
    Discrepancy,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Alert content produced by a rule, before deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDraft {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub product_id: ProductId,
    pub sku: String,
    pub message: String,
    pub current_quantity: u64,
    pub threshold: Option<u64>,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub check_id: Option<CheckId>,
}

/// Low/over-stock alert for a status change, if the new status warrants one.
///
/// Entering `low_stock` or `out_of_stock` raises `low_stock` (critical at
/// zero); entering `overstock` raises `overstock`.
pub fn threshold_alert(item: &InventoryItem, previous: StockStatus) -> Option<AlertDraft> {
    let current = item.status();
    if current == previous {
        return None;
    }

    let (alert_type, severity, threshold, message) = match current {
        StockStatus::OutOfStock => (
            AlertType::LowStock,
            AlertSeverity::Critical,
            item.min_quantity(),
            format!("{} is out of stock", item.sku()),
        ),
        StockStatus::LowStock => (
            AlertType::LowStock,
            AlertSeverity::High,
            item.min_quantity(),
            format!(
                "{} is low on stock: {} left (minimum {})",
                item.sku(),
                item.quantity(),
                item.min_quantity()
            ),
        ),
        StockStatus::Overstock => (
            AlertType::Overstock,
            AlertSeverity::Medium,
            item.max_quantity(),
            format!(
                "{} is overstocked: {} on hand (maximum {})",
                item.sku(),
                item.quantity(),
                item.max_quantity()
            ),
        ),
        StockStatus::InStock => return None,
    };

    Some(AlertDraft {
        alert_type,
        severity,
        product_id: item.product_id(),
        sku: item.sku().to_string(),
        message,
        current_quantity: item.quantity(),
        threshold: Some(threshold),
        batch_number: None,
        expiry_date: None,
        check_id: None,
    })
}

/// Expiring alert for the soonest-expiring non-empty batch within `horizon_days`.
pub fn expiring_alert(
    item: &InventoryItem,
    today: NaiveDate,
    horizon_days: i64,
) -> Option<AlertDraft> {
    let (batch, days) = item
        .batches()
        .iter()
        .filter(|b| b.quantity > 0)
        .filter_map(|b| b.days_until_expiry(today).map(|d| (b, d)))
        .filter(|(_, d)| *d <= horizon_days)
        .min_by_key(|(b, d)| (*d, b.received_at))?;

    let message = if days < 0 {
        format!(
            "{} batch {} expired {} day(s) ago ({} units)",
            item.sku(),
            batch.batch_number,
            -days,
            batch.quantity
        )
    } else {
        format!(
            "{} batch {} expires in {} day(s) ({} units)",
            item.sku(),
            batch.batch_number,
            days,
            batch.quantity
        )
    };

    Some(AlertDraft {
        alert_type: AlertType::Expiring,
        severity: expiry_severity(days),
        product_id: item.product_id(),
        sku: item.sku().to_string(),
        message,
        current_quantity: item.quantity(),
        threshold: None,
        batch_number: Some(batch.batch_number.clone()),
        expiry_date: batch.expiry_date,
        check_id: None,
    })
}

pub fn expiry_severity(days_remaining: i64) -> AlertSeverity {
    match days_remaining {
        d if d <= 0 => AlertSeverity::Critical,
        d if d <= 7 => AlertSeverity::High,
        d if d <= 14 => AlertSeverity::Medium,
        _ => AlertSeverity::Low,
    }
}

/// Discrepancy alert for a counted check line, if it is off.
pub fn discrepancy_alert(check_id: CheckId, check_number: &str, line: &StockCheckItem) -> Option<AlertDraft> {
    if line.discrepancy == 0 {
        return None;
    }
    let actual = line.actual_quantity.unwrap_or(0);

    Some(AlertDraft {
        alert_type: AlertType::Discrepancy,
        severity: discrepancy_severity(line.system_quantity, line.discrepancy),
        product_id: line.product_id,
        sku: line.sku.clone(),
        message: format!(
            "{} counted {} against system {} in check {} ({:+})",
            line.sku, actual, line.system_quantity, check_number, line.discrepancy
        ),
        current_quantity: actual,
        threshold: Some(line.system_quantity),
        batch_number: None,
        expiry_date: None,
        check_id: Some(check_id),
    })
}

/// Severity grows with the relative size of the miss.
pub fn discrepancy_severity(system_quantity: u64, discrepancy: i64) -> AlertSeverity {
    if system_quantity == 0 {
        return AlertSeverity::High;
    }
    let ratio = discrepancy.unsigned_abs() as f64 / system_quantity as f64;
    if ratio >= 0.5 {
        AlertSeverity::High
    } else if ratio >= 0.1 {
        AlertSeverity::Medium
    } else {
        AlertSeverity::Low
    }
}

/// A derived alert. Only `resolve` is an operator action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlert {
    id: AlertId,
    alert_type: AlertType,
    severity: AlertSeverity,
    product_id: ProductId,
    sku: String,
    product_name: Option<String>,
    message: String,
    current_quantity: u64,
    threshold: Option<u64>,
    batch_number: Option<String>,
    expiry_date: Option<NaiveDate>,
    check_id: Option<CheckId>,
    occurrences: u32,
    is_resolved: bool,
    resolved_by: Option<UserId>,
    resolved_at: Option<DateTime<Utc>>,
    resolution_note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl StockAlert {
    pub fn raise(
        id: AlertId,
        draft: AlertDraft,
        product_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            alert_type: draft.alert_type,
            severity: draft.severity,
            product_id: draft.product_id,
            sku: draft.sku,
            product_name,
            message: draft.message,
            current_quantity: draft.current_quantity,
            threshold: draft.threshold,
            batch_number: draft.batch_number,
            expiry_date: draft.expiry_date,
            check_id: draft.check_id,
            occurrences: 1,
            is_resolved: false,
            resolved_by: None,
            resolved_at: None,
            resolution_note: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Fold a repeated draft into this open alert instead of duplicating it.
    pub fn refresh(&mut self, draft: AlertDraft, now: DateTime<Utc>) -> LedgerResult<()> {
        if self.is_resolved {
            return Err(LedgerError::invalid_transition("alert refresh", "resolved", "open"));
        }
        if draft.alert_type != self.alert_type || draft.product_id != self.product_id {
            return Err(LedgerError::consistency(format!(
                "alert {} cannot absorb a {:?} draft for {}",
                self.id, draft.alert_type, draft.sku
            )));
        }

        self.severity = draft.severity;
        self.message = draft.message;
        self.current_quantity = draft.current_quantity;
        self.threshold = draft.threshold;
        self.batch_number = draft.batch_number;
        self.expiry_date = draft.expiry_date;
        self.check_id = draft.check_id.or(self.check_id);
        self.occurrences = self.occurrences.saturating_add(1);
        self.updated_at = now;
        Ok(())
    }

    pub fn resolve(&mut self, by: UserId, note: Option<String>, now: DateTime<Utc>) -> LedgerResult<()> {
        if self.is_resolved {
            return Err(LedgerError::invalid_transition("alert", "resolved", "resolved"));
        }
        self.is_resolved = true;
        self.resolved_by = Some(by);
        self.resolved_at = Some(now);
        self.resolution_note = note;
        self.updated_at = now;
        Ok(())
    }

    pub fn id(&self) -> AlertId {
        self.id
    }

    pub fn alert_type(&self) -> AlertType {
        self.alert_type
    }

    pub fn severity(&self) -> AlertSeverity {
        self.severity
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn product_name(&self) -> Option<&str> {
        self.product_name.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn current_quantity(&self) -> u64 {
        self.current_quantity
    }

    pub fn threshold(&self) -> Option<u64> {
        self.threshold
    }

    pub fn batch_number(&self) -> Option<&str> {
        self.batch_number.as_deref()
    }

    pub fn expiry_date(&self) -> Option<NaiveDate> {
        self.expiry_date
    }

    pub fn check_id(&self) -> Option<CheckId> {
        self.check_id
    }

    pub fn occurrences(&self) -> u32 {
        self.occurrences
    }

    pub fn is_resolved(&self) -> bool {
        self.is_resolved
    }

    pub fn resolved_by(&self) -> Option<UserId> {
        self.resolved_by
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Dedup key among open alerts.
    pub fn dedup_key(&self) -> (AlertType, ProductId) {
        (self.alert_type, self.product_id)
    }
}

impl Record for StockAlert {
    type Key = AlertId;

    const KIND: &'static str = "stock_alert";

    fn key(&self) -> AlertId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Open,
    Resolved,
    All,
}

/// Query filter for `ListAlerts`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlertFilter {
    #[serde(default)]
    pub state: AlertState,
    #[serde(default)]
    pub alert_type: Option<AlertType>,
    #[serde(default)]
    pub min_severity: Option<AlertSeverity>,
    #[serde(default)]
    pub product_id: Option<ProductId>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &StockAlert) -> bool {
        let state_ok = match self.state {
            AlertState::Open => !alert.is_resolved(),
            AlertState::Resolved => alert.is_resolved(),
            AlertState::All => true,
        };
        state_ok
            && self.alert_type.is_none_or(|t| t == alert.alert_type())
            && self.min_severity.is_none_or(|s| alert.severity() >= s)
            && self.product_id.is_none_or(|p| p == alert.product_id())
    }
}
