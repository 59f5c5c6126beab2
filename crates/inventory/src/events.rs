//! Notifications emitted by the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{CheckId, MovementId, ProductId};
use stockledger_events::Event;

use crate::alert::StockAlert;
use crate::movement::{MovementSubType, MovementType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    AlertRaised {
        alert: StockAlert,
        at: DateTime<Utc>,
    },
    /// An open alert absorbed a repeated trigger.
    AlertUpdated {
        alert: StockAlert,
        at: DateTime<Utc>,
    },
    AlertResolved {
        alert: StockAlert,
        at: DateTime<Utc>,
    },
    MovementCompleted {
        movement_id: MovementId,
        receipt_number: String,
        movement_type: MovementType,
        sub_type: MovementSubType,
        order_id: Option<String>,
        product_ids: Vec<ProductId>,
        at: DateTime<Utc>,
    },
    CheckCompleted {
        check_id: CheckId,
        check_number: String,
        discrepancy_items: u64,
        accuracy_rate: f64,
        at: DateTime<Utc>,
    },
    CheckApproved {
        check_id: CheckId,
        check_number: String,
        adjustment_movement_id: Option<MovementId>,
        at: DateTime<Utc>,
    },
    /// Aggregate mismatch; the operation was aborted and needs investigation.
    ConsistencyViolation {
        product_id: Option<ProductId>,
        detail: String,
        at: DateTime<Utc>,
    },
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::AlertRaised { .. } => "inventory.alert.raised",
            LedgerEvent::AlertUpdated { .. } => "inventory.alert.updated",
            LedgerEvent::AlertResolved { .. } => "inventory.alert.resolved",
            LedgerEvent::MovementCompleted { .. } => "inventory.movement.completed",
            LedgerEvent::CheckCompleted { .. } => "inventory.check.completed",
            LedgerEvent::CheckApproved { .. } => "inventory.check.approved",
            LedgerEvent::ConsistencyViolation { .. } => "inventory.consistency.violation",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::AlertRaised { at, .. }
            | LedgerEvent::AlertUpdated { at, .. }
            | LedgerEvent::AlertResolved { at, .. }
            | LedgerEvent::MovementCompleted { at, .. }
            | LedgerEvent::CheckCompleted { at, .. }
            | LedgerEvent::CheckApproved { at, .. }
            | LedgerEvent::ConsistencyViolation { at, .. } => *at,
        }
    }
}
