//! Token ledger data model: raw events, derived transactions and snapshots.

pub mod types;

pub use types::{
    classify_transfer, EventKind, EventPayload, HolderBalance, IndexRange, IndexedRecord,
    LedgerEvent, LedgerSnapshot, Transaction, TransactionDetails, TransactionKind,
};
