//! Last-print cache backing "reprint last receipt".

use std::sync::RwLock;

use chrono::{DateTime, FixedOffset};

use crate::models::ReceiptInput;

/// Receipt inputs plus the timestamp they were first printed with, so a
/// reprint compiles to the same document.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedReceipt {
    pub input: ReceiptInput,
    pub printed_at: DateTime<FixedOffset>,
}

/// Single-slot, last-write-wins cache. Lives as long as the process.
#[derive(Debug, Default)]
pub struct PrintJobCache {
    last: RwLock<Option<CachedReceipt>>,
}

impl PrintJobCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached receipt.
    pub fn record(&self, receipt: CachedReceipt) {
        match self.last.write() {
            Ok(mut slot) => *slot = Some(receipt),
            Err(poisoned) => *poisoned.into_inner() = Some(receipt),
        }
    }

    /// The cached receipt, if one with a real order id was recorded.
    pub fn last(&self) -> Option<CachedReceipt> {
        let slot = match self.last.read() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.as_ref().filter(|r| r.input.order_id != 0).cloned()
    }
}
