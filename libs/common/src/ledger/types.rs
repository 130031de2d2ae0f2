//! Ledger data model shared by the aggregation engine and its consumers.
//!
//! Raw [`LedgerEvent`]s are immutable facts read from the external ledger.
//! [`Transaction`]s and [`LedgerSnapshot`]s are derived from them on every
//! query and never persisted.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::amount::Percentage;

/// One unit of the append-only log (a block).
///
/// Timestamps are non-decreasing in `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedRecord {
    pub index: u64,
    pub timestamp: u64,
}

/// Inclusive range of log indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    pub from: u64,
    pub to: u64,
}

impl IndexRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }

    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.to - self.from + 1
        }
    }

    pub fn contains(&self, index: u64) -> bool {
        self.from <= index && index <= self.to
    }

    /// Split into consecutive sub-ranges of at most `span` indices.
    pub fn chunks(&self, span: u64) -> Vec<IndexRange> {
        let span = span.max(1);
        let mut out = Vec::new();
        if self.is_empty() {
            return out;
        }
        let mut start = self.from;
        loop {
            let end = start.saturating_add(span - 1).min(self.to);
            out.push(IndexRange::new(start, end));
            if end >= self.to {
                break;
            }
            start = end + 1;
        }
        out
    }
}

impl core::fmt::Display for IndexRange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Raw event kinds emitted by the tracked token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Transfer,
    Split,
    SymbolChange,
    AllowlistUpdate,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Transfer,
        EventKind::Split,
        EventKind::SymbolChange,
        EventKind::AllowlistUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Transfer => "Transfer",
            EventKind::Split => "Split",
            EventKind::SymbolChange => "SymbolChange",
            EventKind::AllowlistUpdate => "AllowlistUpdate",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    Transfer {
        from: Address,
        to: Address,
        amount: U256,
    },
    Split {
        new_multiplier: U256,
    },
    SymbolChange {
        old_symbol: String,
        new_symbol: String,
    },
    AllowlistUpdate {
        account: Address,
        approved: bool,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Transfer { .. } => EventKind::Transfer,
            EventPayload::Split { .. } => EventKind::Split,
            EventPayload::SymbolChange { .. } => EventKind::SymbolChange,
            EventPayload::AllowlistUpdate { .. } => EventKind::AllowlistUpdate,
        }
    }
}

/// A single event as emitted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Groups events produced by one atomic operation (transaction hash)
    pub transaction_id: B256,
    /// Index (block number) the event was emitted at
    pub index: u64,
    /// Position within the index (log index)
    pub position: u64,
    pub payload: EventPayload,
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn ordering_key(&self) -> (u64, u64) {
        (self.index, self.position)
    }

    /// True if `address` is either endpoint of a transfer.
    pub fn involves(&self, address: &Address) -> bool {
        match &self.payload {
            EventPayload::Transfer { from, to, .. } => from == address || to == address,
            _ => false,
        }
    }
}

/// Derived transaction kinds. `Mint` and `Burn` refine `Transfer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    Transfer,
    Mint,
    Burn,
    Split,
    SymbolChange,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 5] = [
        TransactionKind::Transfer,
        TransactionKind::Mint,
        TransactionKind::Burn,
        TransactionKind::Split,
        TransactionKind::SymbolChange,
    ];

    /// Raw event kind this transaction kind is derived from.
    pub fn event_kind(&self) -> EventKind {
        match self {
            TransactionKind::Transfer | TransactionKind::Mint | TransactionKind::Burn => {
                EventKind::Transfer
            }
            TransactionKind::Split => EventKind::Split,
            TransactionKind::SymbolChange => EventKind::SymbolChange,
        }
    }

    pub fn is_transfer_family(&self) -> bool {
        self.event_kind() == EventKind::Transfer
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Transfer => "Transfer",
            TransactionKind::Mint => "Mint",
            TransactionKind::Burn => "Burn",
            TransactionKind::Split => "Split",
            TransactionKind::SymbolChange => "SymbolChange",
        }
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "transfer" => Ok(TransactionKind::Transfer),
            "mint" => Ok(TransactionKind::Mint),
            "burn" => Ok(TransactionKind::Burn),
            "split" => Ok(TransactionKind::Split),
            "symbolchange" | "symbol-change" | "symbol_change" => {
                Ok(TransactionKind::SymbolChange)
            }
            other => Err(format!("unknown transaction kind '{}'", other)),
        }
    }
}

/// Refine a transfer into `Mint`, `Burn` or plain `Transfer`.
///
/// A transfer from the zero address is a mint even if it also targets the
/// zero address, so the three outcomes never overlap.
pub fn classify_transfer(from: &Address, to: &Address) -> TransactionKind {
    if from.is_zero() {
        TransactionKind::Mint
    } else if to.is_zero() {
        TransactionKind::Burn
    } else {
        TransactionKind::Transfer
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionDetails {
    Transfer,
    Split { multiplier: U256 },
    SymbolChange { old_symbol: String, new_symbol: String },
}

/// A typed entry of the derived transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique per event: `<transaction_id>:<position>`
    pub id: String,
    pub transaction_id: B256,
    pub kind: TransactionKind,
    pub index: u64,
    pub position: u64,
    pub timestamp: u64,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub amount: Option<U256>,
    pub details: TransactionDetails,
}

impl Transaction {
    /// Derive a transaction from a raw event.
    ///
    /// Returns `None` for event kinds that are not part of the history
    /// vocabulary (allowlist updates).
    pub fn from_event(event: &LedgerEvent, timestamp: u64) -> Option<Self> {
        let (kind, from, to, amount, details) = match &event.payload {
            EventPayload::Transfer { from, to, amount } => (
                classify_transfer(from, to),
                Some(*from),
                Some(*to),
                Some(*amount),
                TransactionDetails::Transfer,
            ),
            EventPayload::Split { new_multiplier } => (
                TransactionKind::Split,
                None,
                None,
                None,
                TransactionDetails::Split {
                    multiplier: *new_multiplier,
                },
            ),
            EventPayload::SymbolChange {
                old_symbol,
                new_symbol,
            } => (
                TransactionKind::SymbolChange,
                None,
                None,
                None,
                TransactionDetails::SymbolChange {
                    old_symbol: old_symbol.clone(),
                    new_symbol: new_symbol.clone(),
                },
            ),
            EventPayload::AllowlistUpdate { .. } => return None,
        };

        Some(Self {
            id: format!("{:#x}:{}", event.transaction_id, event.position),
            transaction_id: event.transaction_id,
            kind,
            index: event.index,
            position: event.position,
            timestamp,
            from,
            to,
            amount,
            details,
        })
    }

    pub fn involves(&self, address: &Address) -> bool {
        self.from.as_ref() == Some(address) || self.to.as_ref() == Some(address)
    }

    pub fn ordering_key(&self) -> (u64, u64) {
        (self.index, self.position)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderBalance {
    pub address: Address,
    pub balance: U256,
    pub ownership_percentage: Percentage,
}

/// Ownership state at a specific index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub as_of_index: u64,
    pub total_supply: U256,
    pub holders: Vec<HolderBalance>,
}

impl LedgerSnapshot {
    pub fn holder(&self, address: &Address) -> Option<&HolderBalance> {
        self.holders.iter().find(|h| &h.address == address)
    }

    /// Sum of all presented balances. Never exceeds `total_supply`.
    pub fn held_supply(&self) -> U256 {
        self.holders
            .iter()
            .fold(U256::ZERO, |acc, h| acc.saturating_add(h.balance))
    }

    pub fn holder_count(&self) -> usize {
        self.holders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn transfer(from: Address, to: Address) -> LedgerEvent {
        LedgerEvent {
            transaction_id: B256::repeat_byte(0xaa),
            index: 105,
            position: 2,
            payload: EventPayload::Transfer {
                from,
                to,
                amount: U256::from(400u64),
            },
        }
    }

    #[test]
    fn test_classify_transfer_is_exclusive() {
        assert_eq!(classify_transfer(&Address::ZERO, &addr(1)), TransactionKind::Mint);
        assert_eq!(classify_transfer(&addr(1), &Address::ZERO), TransactionKind::Burn);
        assert_eq!(classify_transfer(&addr(1), &addr(2)), TransactionKind::Transfer);
        assert_eq!(
            classify_transfer(&Address::ZERO, &Address::ZERO),
            TransactionKind::Mint
        );
    }

    #[test]
    fn test_transaction_from_transfer_event() {
        let event = transfer(addr(1), addr(2));
        let tx = Transaction::from_event(&event, 1_700_000_000).unwrap();

        assert_eq!(tx.kind, TransactionKind::Transfer);
        assert_eq!(tx.from, Some(addr(1)));
        assert_eq!(tx.to, Some(addr(2)));
        assert_eq!(tx.amount, Some(U256::from(400u64)));
        assert_eq!(tx.timestamp, 1_700_000_000);
        assert!(tx.id.ends_with(":2"));
        assert!(tx.involves(&addr(2)));
        assert!(!tx.involves(&addr(3)));
    }

    #[test]
    fn test_allowlist_update_is_not_a_transaction() {
        let event = LedgerEvent {
            transaction_id: B256::ZERO,
            index: 1,
            position: 0,
            payload: EventPayload::AllowlistUpdate {
                account: addr(1),
                approved: true,
            },
        };
        assert!(Transaction::from_event(&event, 0).is_none());
    }

    #[test]
    fn test_split_has_no_address() {
        let event = LedgerEvent {
            transaction_id: B256::ZERO,
            index: 110,
            position: 0,
            payload: EventPayload::Split {
                new_multiplier: U256::from(7u64),
            },
        };
        let tx = Transaction::from_event(&event, 0).unwrap();
        assert_eq!(tx.kind, TransactionKind::Split);
        assert!(tx.from.is_none() && tx.to.is_none());
        assert_eq!(
            tx.details,
            TransactionDetails::Split {
                multiplier: U256::from(7u64)
            }
        );
    }

    #[test]
    fn test_index_range_chunks() {
        let range = IndexRange::new(100, 110);
        let chunks = range.chunks(4);
        assert_eq!(
            chunks,
            vec![
                IndexRange::new(100, 103),
                IndexRange::new(104, 107),
                IndexRange::new(108, 110),
            ]
        );
        assert_eq!(range.len(), 11);
        assert!(IndexRange::new(5, 4).chunks(10).is_empty());
        assert_eq!(IndexRange::new(7, 7).chunks(0), vec![IndexRange::new(7, 7)]);
    }

    #[test]
    fn test_transaction_kind_parse() {
        assert_eq!("mint".parse::<TransactionKind>().unwrap(), TransactionKind::Mint);
        assert_eq!(
            "symbol-change".parse::<TransactionKind>().unwrap(),
            TransactionKind::SymbolChange
        );
        assert!("approve".parse::<TransactionKind>().is_err());
        assert!(TransactionKind::Burn.is_transfer_family());
        assert!(!TransactionKind::Split.is_transfer_family());
    }
}
