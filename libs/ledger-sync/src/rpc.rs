//! `LedgerSource` over an EVM JSON-RPC endpoint.

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log};
use alloy_sol_types::SolEvent;
use alloy_primitives::{Address, B256};
use common::ledger::{EventKind, EventPayload, IndexedRecord, LedgerEvent};

use crate::error::SourceError;
use crate::source::{LedgerSource, PointQuery, PointValue};

alloy::sol! {
    #[sol(rpc)]
    interface ILedgerToken {
        function balanceOf(address account) external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function symbol() external view returns (string memory);
        function splitMultiplier() external view returns (uint256);

        event Transfer(address indexed from, address indexed to, uint256 value);
        event StockSplit(uint256 newMultiplier);
        event SymbolChanged(string oldSymbol, string newSymbol);
        event AllowListUpdated(address indexed account, bool approved);
    }
}

fn rpc_error(err: impl std::fmt::Display) -> SourceError {
    SourceError::from_rpc_message(err.to_string())
}

fn signature(kind: EventKind) -> B256 {
    match kind {
        EventKind::Transfer => ILedgerToken::Transfer::SIGNATURE_HASH,
        EventKind::Split => ILedgerToken::StockSplit::SIGNATURE_HASH,
        EventKind::SymbolChange => ILedgerToken::SymbolChanged::SIGNATURE_HASH,
        EventKind::AllowlistUpdate => ILedgerToken::AllowListUpdated::SIGNATURE_HASH,
    }
}

/// Token contract read through an alloy provider. Historical reads need an
/// archive node.
pub struct RpcLedgerSource<P: Provider + Clone> {
    provider: P,
    token: Address,
}

impl<P> RpcLedgerSource<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    pub fn new(provider: P, token: Address) -> Self {
        Self { provider, token }
    }

    pub fn token(&self) -> Address {
        self.token
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn decode_log(&self, log: &Log) -> Result<LedgerEvent, SourceError> {
        let index = log
            .block_number
            .ok_or_else(|| SourceError::Decode("log without block number".to_string()))?;
        let position = log
            .log_index
            .ok_or_else(|| SourceError::Decode("log without log index".to_string()))?;
        let transaction_id = log
            .transaction_hash
            .ok_or_else(|| SourceError::Decode("log without transaction hash".to_string()))?;
        let topic = log
            .topic0()
            .copied()
            .ok_or_else(|| SourceError::Decode("anonymous log".to_string()))?;

        let decode_err = |e: alloy_sol_types::Error| SourceError::Decode(e.to_string());
        let payload = if topic == ILedgerToken::Transfer::SIGNATURE_HASH {
            let decoded = log.log_decode::<ILedgerToken::Transfer>().map_err(decode_err)?;
            EventPayload::Transfer {
                from: decoded.inner.from,
                to: decoded.inner.to,
                amount: decoded.inner.value,
            }
        } else if topic == ILedgerToken::StockSplit::SIGNATURE_HASH {
            let decoded = log.log_decode::<ILedgerToken::StockSplit>().map_err(decode_err)?;
            EventPayload::Split {
                new_multiplier: decoded.inner.newMultiplier,
            }
        } else if topic == ILedgerToken::SymbolChanged::SIGNATURE_HASH {
            let decoded = log.log_decode::<ILedgerToken::SymbolChanged>().map_err(decode_err)?;
            EventPayload::SymbolChange {
                old_symbol: decoded.inner.oldSymbol.clone(),
                new_symbol: decoded.inner.newSymbol.clone(),
            }
        } else if topic == ILedgerToken::AllowListUpdated::SIGNATURE_HASH {
            let decoded = log.log_decode::<ILedgerToken::AllowListUpdated>().map_err(decode_err)?;
            EventPayload::AllowlistUpdate {
                account: decoded.inner.account,
                approved: decoded.inner.approved,
            }
        } else {
            return Err(SourceError::Decode(format!("unexpected topic {}", topic)));
        };

        Ok(LedgerEvent {
            transaction_id,
            index,
            position,
            payload,
        })
    }
}

#[async_trait::async_trait]
impl<P> LedgerSource for RpcLedgerSource<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    async fn tip(&self) -> Result<IndexedRecord, SourceError> {
        let index = self.provider.get_block_number().await.map_err(rpc_error)?;
        self.record_at(index).await
    }

    async fn record_at(&self, index: u64) -> Result<IndexedRecord, SourceError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(index))
            .await
            .map_err(rpc_error)?
            .ok_or(SourceError::MissingRecord { index })?;
        Ok(IndexedRecord {
            index,
            timestamp: block.header.timestamp,
        })
    }

    async fn entity_exists(&self, index: u64) -> Result<bool, SourceError> {
        let code = self
            .provider
            .get_code_at(self.token)
            .block_id(BlockId::number(index))
            .await
            .map_err(rpc_error)?;
        Ok(!code.is_empty())
    }

    async fn point_state(&self, query: PointQuery, index: u64) -> Result<PointValue, SourceError> {
        let token = ILedgerToken::new(self.token, &self.provider);
        let block = BlockId::number(index);

        let value = match query {
            PointQuery::BalanceOf(account) => PointValue::Amount(
                token
                    .balanceOf(account)
                    .block(block)
                    .call()
                    .await
                    .map_err(rpc_error)?,
            ),
            PointQuery::TotalSupply => PointValue::Amount(
                token.totalSupply().block(block).call().await.map_err(rpc_error)?,
            ),
            PointQuery::Symbol => {
                PointValue::Text(token.symbol().block(block).call().await.map_err(rpc_error)?)
            }
            PointQuery::Multiplier => PointValue::Amount(
                token
                    .splitMultiplier()
                    .block(block)
                    .call()
                    .await
                    .map_err(rpc_error)?,
            ),
        };
        Ok(value)
    }

    async fn query_events(
        &self,
        kinds: &[EventKind],
        from_index: u64,
        to_index: u64,
    ) -> Result<Vec<LedgerEvent>, SourceError> {
        let signatures: Vec<B256> = kinds.iter().map(|k| signature(*k)).collect();
        let filter = Filter::new()
            .address(self.token)
            .event_signature(signatures)
            .from_block(from_index)
            .to_block(to_index);

        let logs = self.provider.get_logs(&filter).await.map_err(rpc_error)?;
        logs.iter().map(|log| self.decode_log(log)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{LogData, U256};

    fn rpc_log(data: LogData, block: u64, position: u64) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0x70),
                data,
            },
            block_number: Some(block),
            log_index: Some(position),
            transaction_hash: Some(B256::repeat_byte(0xee)),
            ..Default::default()
        }
    }

    fn source() -> RpcLedgerSource<alloy::providers::RootProvider> {
        let url = "http://localhost:8545".parse().unwrap();
        RpcLedgerSource::new(
            alloy::providers::RootProvider::new_http(url),
            Address::repeat_byte(0x70),
        )
    }

    #[test]
    fn test_signatures_are_distinct() {
        let mut all: Vec<B256> = EventKind::ALL.iter().map(|k| signature(*k)).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 4);
        assert_eq!(
            signature(EventKind::Transfer),
            alloy_primitives::keccak256("Transfer(address,address,uint256)")
        );
    }

    #[test]
    fn test_decodes_transfer_log() {
        let event = ILedgerToken::Transfer {
            from: Address::repeat_byte(1),
            to: Address::repeat_byte(2),
            value: U256::from(400u64),
        };
        let decoded = source()
            .decode_log(&rpc_log(event.encode_log_data(), 105, 3))
            .unwrap();

        assert_eq!(decoded.index, 105);
        assert_eq!(decoded.position, 3);
        assert_eq!(
            decoded.payload,
            EventPayload::Transfer {
                from: Address::repeat_byte(1),
                to: Address::repeat_byte(2),
                amount: U256::from(400u64),
            }
        );
    }

    #[test]
    fn test_decodes_symbol_change_log() {
        let event = ILedgerToken::SymbolChanged {
            oldSymbol: "OLD".to_string(),
            newSymbol: "NEW".to_string(),
        };
        let decoded = source()
            .decode_log(&rpc_log(event.encode_log_data(), 9, 0))
            .unwrap();
        assert_eq!(
            decoded.payload,
            EventPayload::SymbolChange {
                old_symbol: "OLD".to_string(),
                new_symbol: "NEW".to_string(),
            }
        );
    }

    #[test]
    fn test_pending_log_is_rejected() {
        let event = ILedgerToken::StockSplit {
            newMultiplier: U256::from(2u64),
        };
        let mut log = rpc_log(event.encode_log_data(), 1, 0);
        log.block_number = None;
        assert!(matches!(
            source().decode_log(&log),
            Err(SourceError::Decode(_))
        ));
    }
}
