//! Event-sourced token ledger reconstruction.
//!
//! Provides a unified interface for:
//! - Resolving wall-clock timestamps to ledger indices
//! - Computing cap table snapshots at any historical index
//! - Paging through the typed transaction history
//! - Pairing transfer legs into per-wallet rows

pub mod aggregator;
pub mod error;
pub mod events;
pub mod export;
pub mod history;
pub mod linker;
pub mod resolver;
pub mod retry;
pub mod rpc;
pub mod simulated;
pub mod source;
mod types;

pub use aggregator::LedgerAggregator;
pub use error::{ErrorCategory, LedgerError, RequestedPoint, SourceError};
pub use events::EventSourceAdapter;
pub use history::TransactionHistory;
pub use linker::{link_transfers, RowRole, WalletRow};
pub use resolver::IndexResolver;
pub use retry::{with_retry, RetryFailure, RetryPolicy};
pub use rpc::RpcLedgerSource;
pub use simulated::SimulatedLedger;
pub use source::{LedgerSource, PointQuery, PointValue};
pub use types::*;

use std::sync::Arc;

use alloy_primitives::Address;
use common::event_cache::SessionCache;
use common::ledger::{IndexedRecord, LedgerSnapshot, Transaction};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Every tunable of the engine in one place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    pub events: EventQueryConfig,
    pub snapshot: SnapshotConfig,
    pub history: HistoryConfig,
}

/// Facade over the resolver, aggregator and history pager for one tracked
/// token, sharing a single session cache.
///
/// Create one per session. Dropping it drops every cached timestamp and
/// window.
pub struct LedgerService {
    resolver: Arc<IndexResolver>,
    aggregator: LedgerAggregator,
    history: TransactionHistory,
}

impl LedgerService {
    pub fn new(source: Arc<dyn LedgerSource>, config: EngineConfig) -> Self {
        Self::with_cache(source, config, SessionCache::new())
    }

    /// Build on an existing session cache, e.g. one shared with another
    /// service for the same token.
    pub fn with_cache(source: Arc<dyn LedgerSource>, config: EngineConfig, cache: SessionCache) -> Self {
        let resolver = Arc::new(IndexResolver::new(Arc::clone(&source), cache));
        let events = Arc::new(EventSourceAdapter::new(
            Arc::clone(&source),
            config.retry.clone(),
            config.events,
        ));
        let aggregator = LedgerAggregator::new(
            source,
            Arc::clone(&resolver),
            Arc::clone(&events),
            config.retry,
            config.snapshot,
        );
        let history = TransactionHistory::new(Arc::clone(&resolver), events, config.history);

        Self {
            resolver,
            aggregator,
            history,
        }
    }

    pub fn cache(&self) -> &SessionCache {
        self.resolver.cache()
    }

    pub fn history_config(&self) -> &HistoryConfig {
        self.history.config()
    }

    pub async fn tip(&self) -> Result<IndexedRecord, LedgerError> {
        self.resolver.tip().await
    }

    pub async fn deployment_index(&self) -> Result<u64, LedgerError> {
        self.resolver.deployment_index(None).await
    }

    /// Last index at or before `timestamp`, reporting each search probe.
    pub async fn resolve_index_for_timestamp(
        &self,
        timestamp: u64,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<IndexedRecord, LedgerError> {
        self.resolver
            .find_index_at_or_before(timestamp, progress)
            .await
    }

    pub async fn get_snapshot(&self, as_of: Option<u64>) -> Result<LedgerSnapshot, LedgerError> {
        self.aggregator.compute_snapshot(as_of).await
    }

    pub async fn get_snapshot_with(
        &self,
        as_of: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<LedgerSnapshot, LedgerError> {
        self.aggregator.compute_snapshot_with(as_of, cancel).await
    }

    /// Snapshot at the last index at or before `timestamp`.
    pub async fn snapshot_at_timestamp(&self, timestamp: u64) -> Result<LedgerSnapshot, LedgerError> {
        let record = self.resolve_index_for_timestamp(timestamp, None).await?;
        self.get_snapshot(Some(record.index)).await
    }

    pub async fn get_history_page(
        &self,
        page_number: usize,
        page_size: usize,
        filters: &HistoryFilters,
    ) -> Result<HistoryPage, LedgerError> {
        self.history.page(page_number, page_size, filters).await
    }

    pub async fn load_more(&self) -> Result<HistoryPage, LedgerError> {
        self.history.load_more().await
    }

    pub fn link_transfers(&self, transactions: &[Transaction], address: Option<&Address>) -> Vec<WalletRow> {
        link_transfers(transactions, address)
    }
}
