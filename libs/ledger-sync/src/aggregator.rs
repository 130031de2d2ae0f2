//! Cap table reconstruction at a given index.
//!
//! Balances and total supply come from point reads pinned to the target
//! index. Transfer replay is only used to discover which addresses to ask
//! about, since the ledger has no "list holders" primitive.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use common::amount::Percentage;
use common::ledger::{EventKind, EventPayload, HolderBalance, IndexRange, LedgerSnapshot};
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::error::{LedgerError, RequestedPoint};
use crate::events::EventSourceAdapter;
use crate::resolver::IndexResolver;
use crate::retry::{with_retry, RetryPolicy};
use crate::source::{LedgerSource, PointQuery};
use crate::types::SnapshotConfig;

pub struct LedgerAggregator {
    source: Arc<dyn LedgerSource>,
    resolver: Arc<IndexResolver>,
    events: Arc<EventSourceAdapter>,
    retry: RetryPolicy,
    config: SnapshotConfig,
}

impl LedgerAggregator {
    pub fn new(
        source: Arc<dyn LedgerSource>,
        resolver: Arc<IndexResolver>,
        events: Arc<EventSourceAdapter>,
        retry: RetryPolicy,
        config: SnapshotConfig,
    ) -> Self {
        Self {
            source,
            resolver,
            events,
            retry,
            config,
        }
    }

    /// Snapshot at `as_of`, or at the current tip when `None`.
    pub async fn compute_snapshot(&self, as_of: Option<u64>) -> Result<LedgerSnapshot, LedgerError> {
        self.compute_snapshot_with(as_of, &CancellationToken::new())
            .await
    }

    /// Like [`compute_snapshot`](Self::compute_snapshot), abandoning the
    /// remaining work as soon as `cancel` fires.
    pub async fn compute_snapshot_with(
        &self,
        as_of: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<LedgerSnapshot, LedgerError> {
        let origin = or_cancel(cancel, self.resolver.deployment_index(None)).await?;
        let tip = or_cancel(cancel, self.resolver.tip()).await?;

        let as_of = match as_of {
            Some(requested) if requested > tip.index => {
                return Err(LedgerError::FutureIndex {
                    requested,
                    tip: tip.index,
                })
            }
            Some(requested) if requested < origin => {
                return Err(LedgerError::BeforeOrigin {
                    requested: RequestedPoint::Index(requested),
                    origin,
                })
            }
            Some(requested) => requested,
            None => tip.index,
        };

        let total_supply = or_cancel(cancel, self.total_supply_at(as_of)).await?;

        let transfers = or_cancel(
            cancel,
            self.events
                .query_events(&[EventKind::Transfer], IndexRange::new(origin, as_of), None),
        )
        .await?;

        let candidates: BTreeSet<Address> = transfers
            .iter()
            .flat_map(|event| match &event.payload {
                EventPayload::Transfer { from, to, .. } => vec![*from, *to],
                _ => Vec::new(),
            })
            .filter(|address| !address.is_zero())
            .collect();
        let candidates: Vec<Address> = candidates.into_iter().collect();

        tracing::debug!(
            as_of,
            transfers = transfers.len(),
            candidates = candidates.len(),
            "Collected candidate holders"
        );

        let mut holders = Vec::with_capacity(candidates.len());
        for batch in candidates.chunks(self.config.balance_batch_size.max(1)) {
            let balances = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LedgerError::Cancelled),
                balances = join_all(batch.iter().map(|address| self.balance_at(*address, as_of))) => balances,
            };

            for (address, balance) in batch.iter().zip(balances) {
                if balance.is_zero() {
                    continue;
                }
                holders.push(HolderBalance {
                    address: *address,
                    balance,
                    ownership_percentage: Percentage::of(balance, total_supply),
                });
            }
        }

        holders.sort_by(|a, b| b.balance.cmp(&a.balance).then(a.address.cmp(&b.address)));

        tracing::info!(
            as_of,
            %total_supply,
            holders = holders.len(),
            "Computed snapshot"
        );

        Ok(LedgerSnapshot {
            as_of_index: as_of,
            total_supply,
            holders,
        })
    }

    async fn total_supply_at(&self, index: u64) -> Result<U256, LedgerError> {
        let query = PointQuery::TotalSupply;
        with_retry(&self.retry, query.name(), |_| async move {
            self.source.point_state(query, index).await?.into_amount()
        })
        .await
        .map_err(|failure| LedgerError::SourceUnavailable {
            what: query.name().to_string(),
            range: IndexRange::new(index, index),
            attempts: failure.attempts,
            source: failure.error,
        })
    }

    /// Balance of `address` at `index`. A read that still fails after its
    /// retries is reported as zero and logged.
    async fn balance_at(&self, address: Address, index: u64) -> U256 {
        let query = PointQuery::BalanceOf(address);
        let result = with_retry(&self.retry, query.name(), |_| async move {
            self.source.point_state(query, index).await?.into_amount()
        })
        .await;

        match result {
            Ok(balance) => balance,
            Err(failure) => {
                tracing::warn!(
                    %address,
                    index,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Balance read failed, reporting zero balance"
                );
                U256::ZERO
            }
        }
    }
}

async fn or_cancel<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T, LedgerError>>,
) -> Result<T, LedgerError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LedgerError::Cancelled),
        result = work => result,
    }
}
