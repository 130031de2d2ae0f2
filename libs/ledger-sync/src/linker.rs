//! Expands transactions into per-wallet rows and pairs transfer legs.

use alloy_primitives::{Address, B256, U256};
use common::ledger::{Transaction, TransactionKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowRole {
    Sender,
    Recipient,
    /// Token-wide event without an address (split, symbol change)
    System,
}

impl RowRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowRole::Sender => "sender",
            RowRole::Recipient => "recipient",
            RowRole::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRow {
    pub row_id: String,
    /// Id of the transaction this row was expanded from
    pub transaction: String,
    pub transaction_id: B256,
    pub kind: TransactionKind,
    pub role: RowRole,
    pub address: Option<Address>,
    pub amount: Option<U256>,
    pub index: u64,
    pub timestamp: u64,
    /// The other leg of the same transfer, if both legs are wallets
    pub linked_row_id: Option<String>,
}

impl WalletRow {
    fn new(tx: &Transaction, role: RowRole, address: Option<Address>) -> Self {
        Self {
            row_id: format!("{}:{}", tx.id, role.as_str()),
            transaction: tx.id.clone(),
            transaction_id: tx.transaction_id,
            kind: tx.kind,
            role,
            address,
            amount: tx.amount,
            index: tx.index,
            timestamp: tx.timestamp,
            linked_row_id: None,
        }
    }
}

fn wallet(address: Option<Address>) -> Option<Address> {
    address.filter(|a| !a.is_zero())
}

/// One row per wallet touched by each transaction, recipient before sender.
///
/// Both legs of a wallet-to-wallet transfer point at each other through
/// `linked_row_id`. Zero-address legs (mint source, burn target) are not
/// wallets and yield no row. With `address` set, only that wallet's rows
/// are kept; their links still name the dropped counterpart.
pub fn link_transfers(transactions: &[Transaction], address: Option<&Address>) -> Vec<WalletRow> {
    let mut rows = Vec::with_capacity(transactions.len() * 2);

    for tx in transactions {
        if !tx.kind.is_transfer_family() {
            rows.push(WalletRow::new(tx, RowRole::System, None));
            continue;
        }

        let recipient = wallet(tx.to).map(|a| WalletRow::new(tx, RowRole::Recipient, Some(a)));
        let sender = wallet(tx.from).map(|a| WalletRow::new(tx, RowRole::Sender, Some(a)));

        match (recipient, sender) {
            (Some(mut recipient), Some(mut sender)) => {
                recipient.linked_row_id = Some(sender.row_id.clone());
                sender.linked_row_id = Some(recipient.row_id.clone());
                rows.push(recipient);
                rows.push(sender);
            }
            (Some(row), None) | (None, Some(row)) => rows.push(row),
            (None, None) => {
                tracing::debug!(transaction = %tx.id, "Transfer without wallet legs skipped");
            }
        }
    }

    if let Some(address) = address {
        rows.retain(|row| row.address.as_ref() == Some(address));
    }
    rows
}
