//! Per-day document numbering.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDate;

use stockledger_core::{LedgerError, LedgerResult};
use stockledger_inventory::{format_number, parse_number};

/// Hands out `{PREFIX}-{YYYYMMDD}-{NNN}` numbers, one counter per
/// `(prefix, day)`, guarded by its own lock.
#[derive(Debug, Default)]
pub struct DailySequence {
    counters: Mutex<HashMap<(String, NaiveDate), u32>>,
}

impl DailySequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter seeded past every number already issued (e.g. from a restored store).
    pub fn seeded<'a>(issued: impl IntoIterator<Item = &'a str>) -> Self {
        let sequence = Self::new();
        for number in issued {
            sequence.observe(number);
        }
        sequence
    }

    pub fn next(&self, prefix: &str, date: NaiveDate) -> LedgerResult<String> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| LedgerError::consistency("sequence counters poisoned"))?;
        let counter = counters.entry((prefix.to_string(), date)).or_insert(0);
        *counter += 1;
        Ok(format_number(prefix, date, *counter))
    }

    /// Make sure future numbers for this number's day come after it.
    pub fn observe(&self, number: &str) {
        let Some((prefix, date, seq)) = parse_number(number) else {
            return;
        };
        if let Ok(mut counters) = self.counters.lock() {
            let counter = counters.entry((prefix.to_string(), date)).or_insert(0);
            *counter = (*counter).max(seq);
        }
    }
}
