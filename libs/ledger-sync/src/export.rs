//! CSV and JSON renderings of snapshots, transactions and wallet rows.
//!
//! Amounts are written as decimal strings of the raw integer value.

use common::ledger::{LedgerSnapshot, Transaction, TransactionDetails};
use serde::Serialize;

use crate::linker::WalletRow;

#[derive(Debug)]
pub enum ExportError {
    Csv(String),
    Json(serde_json::Error),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Csv(msg) => write!(f, "CSV export failed: {}", msg),
            ExportError::Json(err) => write!(f, "JSON export failed: {}", err),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Csv(err.to_string())
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Json(err)
    }
}

#[derive(Debug, Serialize)]
pub struct HolderRecord {
    pub address: String,
    pub balance: String,
    pub ownership_percentage: String,
}

#[derive(Debug, Serialize)]
pub struct SnapshotRecord {
    pub as_of_index: u64,
    pub total_supply: String,
    pub holders: Vec<HolderRecord>,
}

#[derive(Debug, Serialize)]
pub struct TransactionRecord {
    pub id: String,
    pub kind: String,
    pub index: u64,
    pub timestamp: u64,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct WalletRowRecord {
    pub row_id: String,
    pub transaction: String,
    pub kind: String,
    pub role: String,
    pub address: String,
    pub amount: String,
    pub index: u64,
    pub timestamp: u64,
    pub linked_row_id: String,
}

fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn opt_hex<T: std::fmt::LowerHex>(value: Option<T>) -> String {
    value.map(|v| format!("{:#x}", v)).unwrap_or_default()
}

impl From<&LedgerSnapshot> for SnapshotRecord {
    fn from(snapshot: &LedgerSnapshot) -> Self {
        Self {
            as_of_index: snapshot.as_of_index,
            total_supply: snapshot.total_supply.to_string(),
            holders: snapshot
                .holders
                .iter()
                .map(|h| HolderRecord {
                    address: format!("{:#x}", h.address),
                    balance: h.balance.to_string(),
                    ownership_percentage: h.ownership_percentage.to_string(),
                })
                .collect(),
        }
    }
}

impl From<&Transaction> for TransactionRecord {
    fn from(tx: &Transaction) -> Self {
        let details = match &tx.details {
            TransactionDetails::Transfer => String::new(),
            TransactionDetails::Split { multiplier } => format!("multiplier={}", multiplier),
            TransactionDetails::SymbolChange {
                old_symbol,
                new_symbol,
            } => format!("{} -> {}", old_symbol, new_symbol),
        };
        Self {
            id: tx.id.clone(),
            kind: tx.kind.to_string(),
            index: tx.index,
            timestamp: tx.timestamp,
            from: opt_hex(tx.from),
            to: opt_hex(tx.to),
            amount: opt(tx.amount),
            details,
        }
    }
}

impl From<&WalletRow> for WalletRowRecord {
    fn from(row: &WalletRow) -> Self {
        Self {
            row_id: row.row_id.clone(),
            transaction: row.transaction.clone(),
            kind: row.kind.to_string(),
            role: row.role.as_str().to_string(),
            address: opt_hex(row.address),
            amount: opt(row.amount),
            index: row.index,
            timestamp: row.timestamp,
            linked_row_id: row.linked_row_id.clone().unwrap_or_default(),
        }
    }
}

fn write_csv<R: Serialize>(records: impl IntoIterator<Item = R>) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ExportError::Csv(e.to_string()))
}

/// One row per holder: `address,balance,ownership_percentage`.
pub fn snapshot_to_csv(snapshot: &LedgerSnapshot) -> Result<String, ExportError> {
    write_csv(SnapshotRecord::from(snapshot).holders)
}

pub fn snapshot_to_json(snapshot: &LedgerSnapshot) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(&SnapshotRecord::from(snapshot))?)
}

pub fn transactions_to_csv(transactions: &[Transaction]) -> Result<String, ExportError> {
    write_csv(transactions.iter().map(TransactionRecord::from))
}

pub fn transactions_to_json(transactions: &[Transaction]) -> Result<String, ExportError> {
    let records: Vec<TransactionRecord> = transactions.iter().map(TransactionRecord::from).collect();
    Ok(serde_json::to_string_pretty(&records)?)
}

pub fn wallet_rows_to_csv(rows: &[WalletRow]) -> Result<String, ExportError> {
    write_csv(rows.iter().map(WalletRowRecord::from))
}

pub fn wallet_rows_to_json(rows: &[WalletRow]) -> Result<String, ExportError> {
    let records: Vec<WalletRowRecord> = rows.iter().map(WalletRowRecord::from).collect();
    Ok(serde_json::to_string_pretty(&records)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, U256};
    use common::amount::Percentage;
    use common::ledger::{EventPayload, HolderBalance, LedgerEvent};

    fn snapshot() -> LedgerSnapshot {
        let supply = U256::from(7_000u64);
        let holder = |byte: u8, balance: u64| HolderBalance {
            address: Address::repeat_byte(byte),
            balance: U256::from(balance),
            ownership_percentage: Percentage::of(U256::from(balance), supply),
        };
        LedgerSnapshot {
            as_of_index: 110,
            total_supply: supply,
            holders: vec![holder(0xa1, 4_200), holder(0xb2, 2_800)],
        }
    }

    #[test]
    fn test_snapshot_csv() {
        let csv = snapshot_to_csv(&snapshot()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "address,balance,ownership_percentage");
        assert_eq!(
            lines[1],
            format!("{:#x},4200,60.000000", Address::repeat_byte(0xa1))
        );
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_snapshot_json_uses_decimal_strings() {
        let json = snapshot_to_json(&snapshot()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["total_supply"], "7000");
        assert_eq!(value["holders"][1]["balance"], "2800");
        assert_eq!(value["holders"][1]["ownership_percentage"], "40.000000");
    }

    #[test]
    fn test_transaction_csv_leaves_absent_fields_empty() {
        let event = LedgerEvent {
            transaction_id: B256::repeat_byte(1),
            index: 110,
            position: 0,
            payload: EventPayload::Split {
                new_multiplier: U256::from(7u64),
            },
        };
        let tx = Transaction::from_event(&event, 1_700_001_320).unwrap();
        let csv = transactions_to_csv(&[tx]).unwrap();
        let row = csv.lines().nth(1).unwrap();
        assert!(row.ends_with(",Split,110,1700001320,,,,multiplier=7"));
    }
}
