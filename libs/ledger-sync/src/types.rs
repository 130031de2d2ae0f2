//! Configuration, filter and result types for the ledger engine.

use std::collections::BTreeSet;

use alloy_primitives::Address;
use common::event_cache::FilterKey;
use common::ledger::{EventKind, IndexRange, Transaction, TransactionKind};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Snapshot aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Balance reads issued concurrently per batch
    pub balance_batch_size: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            balance_batch_size: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl HistoryOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryOrder::NewestFirst => "newest",
            HistoryOrder::OldestFirst => "oldest",
        }
    }
}

/// Windowed history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub default_page_size: usize,
    /// Estimated events per index unit, used to size page windows
    pub events_per_index: f64,
    pub order: HistoryOrder,
    /// Concurrent timestamp lookups per window
    pub timestamp_concurrency: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            events_per_index: 10.0,
            order: HistoryOrder::NewestFirst,
            timestamp_concurrency: 8,
        }
    }
}

impl HistoryConfig {
    /// Index units covered by one page of `page_size` transactions.
    pub fn window_span(&self, page_size: usize) -> u64 {
        let density = if self.events_per_index.is_finite() && self.events_per_index > 0.0 {
            self.events_per_index
        } else {
            1.0
        };
        ((page_size as f64 / density).ceil() as u64).max(1)
    }
}

/// Event query fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventQueryConfig {
    /// Widest index range a single sub-query may cover
    pub max_span: u64,
    /// Sub-queries in flight at once
    pub concurrency: usize,
}

impl Default for EventQueryConfig {
    fn default() -> Self {
        Self {
            max_span: 10_000,
            concurrency: 4,
        }
    }
}

/// Wall-clock bounds in unix seconds. Either side may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl DateRange {
    pub fn new(start: Option<u64>, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start > end => Err(LedgerError::Validation(format!(
                "start date {} is after end date {}",
                start, end
            ))),
            _ => Ok(()),
        }
    }
}

/// Filters for a history page. An empty `kinds` set selects every kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistoryFilters {
    pub address: Option<Address>,
    pub date_range: Option<DateRange>,
    pub kinds: BTreeSet<TransactionKind>,
}

impl HistoryFilters {
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_date_range(mut self, start: Option<u64>, end: Option<u64>) -> Self {
        self.date_range = Some(DateRange::new(start, end));
        self
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = TransactionKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    /// Checks that need no ledger access.
    pub fn validate(&self) -> Result<(), LedgerError> {
        match &self.date_range {
            Some(range) => range.validate(),
            None => Ok(()),
        }
    }

    pub fn selects_kind(&self, kind: TransactionKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        if !self.selects_kind(tx.kind) {
            return false;
        }
        match &self.address {
            Some(address) => tx.involves(address),
            None => true,
        }
    }

    /// Raw event kinds worth querying for these filters.
    ///
    /// Allowlist updates never appear in the history, and address-filtered
    /// queries only need transfers.
    pub fn event_kinds(&self) -> Vec<EventKind> {
        let kinds: BTreeSet<EventKind> = TransactionKind::ALL
            .iter()
            .filter(|k| self.selects_kind(**k))
            .filter(|k| self.address.is_none() || k.is_transfer_family())
            .map(|k| k.event_kind())
            .collect();
        kinds.into_iter().collect()
    }

    /// Canonical cache key. Filters selecting the same rows in the same
    /// order map to the same key.
    pub fn cache_key(&self, order: HistoryOrder) -> FilterKey {
        let address = self
            .address
            .map(|a| format!("{:#x}", a))
            .unwrap_or_else(|| "*".to_string());
        let bound = |v: Option<u64>| v.map(|v| v.to_string()).unwrap_or_else(|| "*".to_string());
        let (start, end) = match &self.date_range {
            Some(range) => (bound(range.start), bound(range.end)),
            None => (bound(None), bound(None)),
        };
        let kinds = if self.kinds.is_empty() || self.kinds.len() == TransactionKind::ALL.len() {
            "*".to_string()
        } else {
            self.kinds
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(",")
        };
        FilterKey::new(format!(
            "address={};start={};end={};kinds={};order={}",
            address,
            start,
            end,
            kinds,
            order.as_str()
        ))
    }
}

/// One page of the derived transaction feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub page_number: usize,
    pub transactions: Vec<Transaction>,
    pub has_more: bool,
    /// Index window that produced this page, if any was queried
    pub range: Option<IndexRange>,
}

impl HistoryPage {
    pub fn empty(page_number: usize) -> Self {
        Self {
            page_number,
            transactions: Vec::new(),
            has_more: false,
            range: None,
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Reported on every binary-search probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchProbe {
    pub mid: u64,
    pub lo: u64,
    pub hi: u64,
}

pub type ProgressCallback<'a> = &'a (dyn Fn(SearchProbe) + Send + Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_span_defaults_to_five_indices() {
        let config = HistoryConfig::default();
        assert_eq!(config.window_span(50), 5);
        assert_eq!(config.window_span(1), 1);
        assert_eq!(config.window_span(51), 6);

        let broken = HistoryConfig {
            events_per_index: 0.0,
            ..Default::default()
        };
        assert_eq!(broken.window_span(3), 3);
    }

    #[test]
    fn test_inverted_date_range_is_rejected() {
        let filters = HistoryFilters::default().with_date_range(Some(200), Some(100));
        assert!(matches!(filters.validate(), Err(LedgerError::Validation(_))));
        assert!(HistoryFilters::default()
            .with_date_range(Some(100), Some(100))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_cache_key_is_canonical() {
        let a = HistoryFilters::default()
            .with_kinds([TransactionKind::Mint, TransactionKind::Burn]);
        let b = HistoryFilters::default()
            .with_kinds([TransactionKind::Burn, TransactionKind::Mint]);
        assert_eq!(
            a.cache_key(HistoryOrder::NewestFirst),
            b.cache_key(HistoryOrder::NewestFirst)
        );
        assert_ne!(
            a.cache_key(HistoryOrder::NewestFirst),
            a.cache_key(HistoryOrder::OldestFirst)
        );

        let all = HistoryFilters::default().with_kinds(TransactionKind::ALL);
        assert_eq!(
            all.cache_key(HistoryOrder::NewestFirst),
            HistoryFilters::default().cache_key(HistoryOrder::NewestFirst)
        );
    }

    #[test]
    fn test_event_kinds_never_include_allowlist() {
        let kinds = HistoryFilters::default().event_kinds();
        assert_eq!(
            kinds,
            vec![EventKind::Transfer, EventKind::Split, EventKind::SymbolChange]
        );

        let mints = HistoryFilters::default().with_kinds([TransactionKind::Mint]);
        assert_eq!(mints.event_kinds(), vec![EventKind::Transfer]);

        let by_address = HistoryFilters::default().with_address(Address::repeat_byte(1));
        assert_eq!(by_address.event_kinds(), vec![EventKind::Transfer]);

        let splits_for_address = HistoryFilters::default()
            .with_address(Address::repeat_byte(1))
            .with_kinds([TransactionKind::Split]);
        assert!(splits_for_address.event_kinds().is_empty());
    }
}
