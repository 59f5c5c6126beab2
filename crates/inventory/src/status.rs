//! Stock status derivation.

use serde::{Deserialize, Serialize};

/// Derived stock level of an item. Never set directly; always recomputed
/// from quantity and thresholds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    OutOfStock,
    LowStock,
    InStock,
    Overstock,
}

/// Map a quantity and its thresholds to a status.
///
/// | quantity            | status         |
/// |---------------------|----------------|
/// | `0`                 | `OutOfStock`   |
/// | `>= max`            | `Overstock`    |
/// | `1..=min`           | `LowStock`     |
/// | otherwise           | `InStock`      |
///
/// `Overstock` is checked before `LowStock` so that a misconfigured item
/// (`min >= max`) reports overstock once `quantity >= max`.
pub fn evaluate_status(quantity: u64, min: u64, max: u64) -> StockStatus {
    if quantity == 0 {
        StockStatus::OutOfStock
    } else if quantity >= max {
        StockStatus::Overstock
    } else if quantity <= min {
        StockStatus::LowStock
    } else {
        StockStatus::InStock
    }
}
