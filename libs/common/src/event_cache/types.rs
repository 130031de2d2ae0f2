//! Cache entry types for the per-session event cache.

use alloc::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ledger::{IndexRange, Transaction};

/// Canonical description of an active history filter set.
///
/// Two filter sets that select the same transactions produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FilterKey(pub String);

impl FilterKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for FilterKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a memoized index window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexRangeKey {
    pub range: IndexRange,
    pub filter: FilterKey,
}

impl IndexRangeKey {
    pub fn new(range: IndexRange, filter: FilterKey) -> Self {
        Self { range, filter }
    }
}

/// Transactions already resolved for one `(range, filter)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRangeEntry {
    pub from_index: u64,
    pub to_index: u64,
    pub filter: FilterKey,
    pub transactions: Arc<Vec<Transaction>>,
}

impl IndexRangeEntry {
    pub fn new(range: IndexRange, filter: FilterKey, transactions: Vec<Transaction>) -> Self {
        Self {
            from_index: range.from,
            to_index: range.to,
            filter,
            transactions: Arc::new(transactions),
        }
    }

    pub fn key(&self) -> IndexRangeKey {
        IndexRangeKey::new(
            IndexRange::new(self.from_index, self.to_index),
            self.filter.clone(),
        )
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Which end of a date range a cached date → index conversion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateBound {
    Start,
    End,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_entry_key_round_trips() {
        let entry = IndexRangeEntry::new(
            IndexRange::new(100, 104),
            FilterKey::new("order=desc"),
            Vec::new(),
        );
        let key = entry.key();
        assert_eq!(key.range, IndexRange::new(100, 104));
        assert_eq!(key.filter.as_str(), "order=desc");
        assert!(entry.is_empty());
    }
}
