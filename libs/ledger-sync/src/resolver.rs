//! Timestamp → index resolution by binary search.
//!
//! Both searches rely on a monotone function of the index: timestamps are
//! non-decreasing and entity existence flips from false to true once.
//! Probe failures are returned unmodified; retry is the caller's call.

use std::future::Future;
use std::sync::Arc;

use common::event_cache::SessionCache;
use common::ledger::IndexedRecord;

use crate::error::{LedgerError, RequestedPoint};
use crate::retry::{with_retry, RetryFailure, RetryPolicy};
use crate::source::LedgerSource;
use crate::types::{ProgressCallback, SearchProbe};

/// Last index in `[lo, hi]` whose timestamp is `<= target`.
///
/// With equal timestamps across neighbours this returns the largest such
/// index. `None` if even `lo` is after the target.
pub async fn search_last_at_or_before<F, Fut, E>(
    mut lo: u64,
    mut hi: u64,
    target: u64,
    mut timestamp_of: F,
    progress: Option<ProgressCallback<'_>>,
) -> Result<Option<u64>, E>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<u64, E>>,
{
    let mut best = None;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        if let Some(report) = progress {
            report(SearchProbe { mid, lo, hi });
        }
        if timestamp_of(mid).await? <= target {
            best = Some(mid);
            lo = mid + 1;
        } else if mid == 0 {
            break;
        } else {
            hi = mid - 1;
        }
    }
    Ok(best)
}

/// Smallest index in `[lo, hi]` where `predicate` holds.
pub async fn search_first_true<F, Fut, E>(
    mut lo: u64,
    mut hi: u64,
    mut predicate: F,
    progress: Option<ProgressCallback<'_>>,
) -> Result<Option<u64>, E>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let mut found = None;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        if let Some(report) = progress {
            report(SearchProbe { mid, lo, hi });
        }
        if predicate(mid).await? {
            found = Some(mid);
            if mid == 0 {
                break;
            }
            hi = mid - 1;
        } else {
            lo = mid + 1;
        }
    }
    Ok(found)
}

/// Resolves wall-clock timestamps and the deployment index of the tracked
/// entity, caching both in the session.
pub struct IndexResolver {
    source: Arc<dyn LedgerSource>,
    cache: SessionCache,
}

impl IndexResolver {
    pub fn new(source: Arc<dyn LedgerSource>, cache: SessionCache) -> Self {
        Self { source, cache }
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Current tip. Never cached since the ledger keeps growing.
    pub async fn tip(&self) -> Result<IndexedRecord, LedgerError> {
        let tip = self.source.tip().await?;
        self.cache.record_timestamp(tip.index, tip.timestamp);
        Ok(tip)
    }

    pub async fn timestamp_at(&self, index: u64) -> Result<u64, LedgerError> {
        if let Some(timestamp) = self.cache.timestamp(index) {
            return Ok(timestamp);
        }
        let record = self.source.record_at(index).await?;
        self.cache.record_timestamp(record.index, record.timestamp);
        Ok(record.timestamp)
    }

    /// Like [`timestamp_at`](Self::timestamp_at), with source failures
    /// retried under `policy`.
    pub async fn timestamp_at_retrying(
        &self,
        index: u64,
        policy: &RetryPolicy,
    ) -> Result<u64, RetryFailure> {
        if let Some(timestamp) = self.cache.timestamp(index) {
            return Ok(timestamp);
        }
        let record = with_retry(policy, "timestamp", |_| self.source.record_at(index)).await?;
        self.cache.record_timestamp(record.index, record.timestamp);
        Ok(record.timestamp)
    }

    /// Smallest index at which the entity exists. Searched once per session.
    pub async fn deployment_index(
        &self,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<u64, LedgerError> {
        if let Some(index) = self.cache.deployment_index() {
            return Ok(index);
        }

        let tip = self.tip().await?;
        let origin = self
            .find_origin_index(tip.index, |index| self.source.entity_exists(index), progress)
            .await?;

        self.cache.set_deployment_index(origin);
        tracing::info!(deployment_index = origin, tip = tip.index, "Resolved deployment index");
        Ok(origin)
    }

    /// Binary search over `[0, tip]` for the first index where `exists`
    /// holds. Fails with `OriginNotFound` if it never does.
    pub async fn find_origin_index<F, Fut, E>(
        &self,
        tip: u64,
        exists: F,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<u64, LedgerError>
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        LedgerError: From<E>,
    {
        search_first_true(0, tip, exists, progress)
            .await?
            .ok_or(LedgerError::OriginNotFound { tip })
    }

    /// Last index whose timestamp is at or before `target`.
    pub async fn find_index_at_or_before(
        &self,
        target: u64,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<IndexedRecord, LedgerError> {
        let tip = self.tip().await?;
        if target > tip.timestamp {
            return Err(LedgerError::FutureTimestamp { target, tip });
        }

        let origin = self.deployment_index(progress).await?;
        let before_origin = LedgerError::BeforeOrigin {
            requested: RequestedPoint::Timestamp(target),
            origin,
        };
        if target < self.timestamp_at(origin).await? {
            return Err(before_origin);
        }

        let index = search_last_at_or_before(
            origin,
            tip.index,
            target,
            |index| self.timestamp_at(index),
            progress,
        )
        .await?
        .ok_or(before_origin)?;

        let timestamp = self.timestamp_at(index).await?;
        tracing::debug!(target, index, timestamp, "Resolved timestamp to index");
        Ok(IndexedRecord { index, timestamp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::simulated::{SimulatedLedger, GENESIS_TIMESTAMP};
    use parking_lot::Mutex;
    use std::convert::Infallible;

    async fn last_at_or_before(timestamps: &[u64], target: u64) -> Option<u64> {
        let hi = timestamps.len() as u64 - 1;
        search_last_at_or_before(
            0,
            hi,
            target,
            |i| async move { Ok::<_, Infallible>(timestamps[i as usize]) },
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_strictly_increasing_timestamps() {
        let timestamps: Vec<u64> = (0..100).map(|i| 1_000 + i * 12).collect();
        for (i, ts) in timestamps.iter().enumerate() {
            assert_eq!(last_at_or_before(&timestamps, *ts).await, Some(i as u64));
            assert_eq!(last_at_or_before(&timestamps, *ts + 11).await, Some(i as u64));
        }
        assert_eq!(last_at_or_before(&timestamps, 999).await, None);
        assert_eq!(last_at_or_before(&timestamps, u64::MAX).await, Some(99));
    }

    #[tokio::test]
    async fn test_duplicate_timestamps_return_largest_index() {
        let timestamps = vec![10, 20, 20, 20, 30, 30, 40];
        assert_eq!(last_at_or_before(&timestamps, 20).await, Some(3));
        assert_eq!(last_at_or_before(&timestamps, 35).await, Some(5));
        assert_eq!(last_at_or_before(&timestamps, 10).await, Some(0));
    }

    #[tokio::test]
    async fn test_first_true_finds_boundary() {
        for boundary in [0u64, 1, 37, 63] {
            let found = search_first_true(
                0,
                63,
                |i| async move { Ok::<_, Infallible>(i >= boundary) },
                None,
            )
            .await
            .unwrap();
            assert_eq!(found, Some(boundary));
        }
        let never = search_first_true(0, 63, |_| async { Ok::<_, Infallible>(false) }, None)
            .await
            .unwrap();
        assert_eq!(never, None);
    }

    #[tokio::test]
    async fn test_progress_reports_every_probe() {
        let probes = Mutex::new(Vec::new());
        let report = |probe: SearchProbe| probes.lock().push(probe);
        let timestamps: Vec<u64> = (0..1024).collect();

        search_last_at_or_before(
            0,
            1023,
            700,
            |i| {
                let ts = timestamps[i as usize];
                async move { Ok::<_, Infallible>(ts) }
            },
            Some(&report),
        )
        .await
        .unwrap();

        let probes = probes.into_inner();
        assert!(!probes.is_empty());
        assert!(probes.len() <= 11);
        assert_eq!(probes[0], SearchProbe { mid: 511, lo: 0, hi: 1023 });
        assert!(probes.iter().all(|p| p.lo <= p.mid && p.mid <= p.hi));
    }

    fn resolver(ledger: SimulatedLedger) -> (Arc<SimulatedLedger>, IndexResolver) {
        let ledger = Arc::new(ledger);
        let resolver = IndexResolver::new(ledger.clone(), SessionCache::new());
        (ledger, resolver)
    }

    fn ts(index: u64) -> u64 {
        GENESIS_TIMESTAMP + index * 12
    }

    #[tokio::test]
    async fn test_resolves_between_records() {
        let (_, resolver) = resolver(SimulatedLedger::new(200).deployed_at(100));
        let record = resolver.find_index_at_or_before(ts(105) + 5, None).await.unwrap();
        assert_eq!(record.index, 105);
        assert_eq!(record.timestamp, ts(105));

        let exact = resolver.find_index_at_or_before(ts(150), None).await.unwrap();
        assert_eq!(exact.index, 150);

        let tip = resolver.find_index_at_or_before(ts(200), None).await.unwrap();
        assert_eq!(tip.index, 200);
    }

    #[tokio::test]
    async fn test_future_and_before_origin() {
        let (ledger, resolver) = resolver(SimulatedLedger::new(200).deployed_at(100));

        let err = resolver.find_index_at_or_before(ts(200) + 1, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::FutureTimestamp { target, tip } if target == ts(200) + 1 && tip.index == 200));
        // future check happens before the origin search
        assert_eq!(ledger.existence_check_count(), 0);

        let err = resolver.find_index_at_or_before(ts(100) - 1, None).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::BeforeOrigin {
                requested: RequestedPoint::Timestamp(ts(100) - 1),
                origin: 100
            }
        );

        let origin = resolver.find_index_at_or_before(ts(100), None).await.unwrap();
        assert_eq!(origin.index, 100);
    }

    #[tokio::test]
    async fn test_deployment_index_is_searched_once() {
        let (ledger, resolver) = resolver(SimulatedLedger::new(1_000).deployed_at(377));
        assert_eq!(resolver.deployment_index(None).await.unwrap(), 377);
        let probes = ledger.existence_check_count();
        assert!(probes <= 11);

        assert_eq!(resolver.deployment_index(None).await.unwrap(), 377);
        assert_eq!(ledger.existence_check_count(), probes);
        assert_eq!(resolver.cache().deployment_index(), Some(377));
    }

    #[tokio::test]
    async fn test_origin_not_found() {
        let (_, resolver) = resolver(SimulatedLedger::new(50));
        let err = resolver
            .find_origin_index(50, |_| async { Ok::<_, SourceError>(false) }, None)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::OriginNotFound { tip: 50 });
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_timestamps_are_cached() {
        let (ledger, resolver) = resolver(SimulatedLedger::new(200).deployed_at(10));
        resolver.find_index_at_or_before(ts(120), None).await.unwrap();
        let reads = ledger.record_read_count();
        resolver.find_index_at_or_before(ts(120), None).await.unwrap();
        // only the tip is read again
        assert_eq!(ledger.record_read_count(), reads + 1);
    }

    #[tokio::test]
    async fn test_probe_errors_propagate_unmodified() {
        let (ledger, resolver) = resolver(SimulatedLedger::new(200));
        ledger.fail_records(Some(SourceError::Transport("socket closed".into())));
        let err = resolver.find_index_at_or_before(ts(5), None).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::Source(SourceError::Transport("socket closed".into()))
        );
    }
}
