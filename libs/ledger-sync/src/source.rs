//! The narrow interface consumed from the external ledger.

use alloy_primitives::{Address, U256};
use common::ledger::{EventKind, IndexedRecord, LedgerEvent};

use crate::error::SourceError;

/// State read at a specific index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointQuery {
    BalanceOf(Address),
    TotalSupply,
    Symbol,
    Multiplier,
}

impl PointQuery {
    pub fn name(&self) -> &'static str {
        match self {
            PointQuery::BalanceOf(_) => "balanceOf",
            PointQuery::TotalSupply => "totalSupply",
            PointQuery::Symbol => "symbol",
            PointQuery::Multiplier => "multiplier",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointValue {
    Amount(U256),
    Text(String),
}

impl PointValue {
    pub fn into_amount(self) -> Result<U256, SourceError> {
        match self {
            PointValue::Amount(value) => Ok(value),
            PointValue::Text(text) => Err(SourceError::Decode(format!(
                "expected an amount, got text '{}'",
                text
            ))),
        }
    }

    pub fn into_text(self) -> Result<String, SourceError> {
        match self {
            PointValue::Text(text) => Ok(text),
            PointValue::Amount(value) => Err(SourceError::Decode(format!(
                "expected text, got amount {}",
                value
            ))),
        }
    }
}

/// Read access to one tracked entity (token contract) on an external,
/// append-only ledger.
///
/// Every method is a suspension point and may fail transiently.
/// Implementations are bound to a single entity at construction.
#[async_trait::async_trait]
pub trait LedgerSource: Send + Sync {
    /// Latest index and its timestamp.
    async fn tip(&self) -> Result<IndexedRecord, SourceError>;

    /// Record at `index`. Fails with `MissingRecord` past the tip.
    async fn record_at(&self, index: u64) -> Result<IndexedRecord, SourceError>;

    /// Whether the entity has code/state at `index`.
    async fn entity_exists(&self, index: u64) -> Result<bool, SourceError>;

    /// Point read of entity state at `index`.
    async fn point_state(&self, query: PointQuery, index: u64) -> Result<PointValue, SourceError>;

    /// Events of the given kinds emitted in `[from_index, to_index]`.
    ///
    /// No ordering is guaranteed; callers sort.
    async fn query_events(
        &self,
        kinds: &[EventKind],
        from_index: u64,
        to_index: u64,
    ) -> Result<Vec<LedgerEvent>, SourceError>;
}
