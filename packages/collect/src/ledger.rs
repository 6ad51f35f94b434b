//! Session-wide duplicate detection.

use std::collections::HashSet;

use shopscout_product_models::{DedupKey, ProductRecord};

/// Identity keys of every record admitted this session.
///
/// Owned by the orchestrator and only touched from its single evaluation
/// step, so admission is serialized without a lock.
#[derive(Debug, Default)]
pub struct DedupLedger {
    seen: HashSet<DedupKey>,
}

impl DedupLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `record`'s key and returns `true` if it was unseen.
    /// Returns `false` for a record already admitted this session.
    pub fn admit(&mut self, record: &ProductRecord) -> bool {
        self.seen.insert(record.dedup_key())
    }
}
