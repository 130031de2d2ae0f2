//! Retrying, range-chunking wrapper around `LedgerSource::query_events`.

use std::sync::Arc;

use alloy_primitives::Address;
use common::ledger::{EventKind, IndexRange, LedgerEvent};
use futures_util::{stream, StreamExt, TryStreamExt};

use crate::error::LedgerError;
use crate::retry::{with_retry, RetryPolicy};
use crate::source::LedgerSource;
use crate::types::EventQueryConfig;

pub struct EventSourceAdapter {
    source: Arc<dyn LedgerSource>,
    retry: RetryPolicy,
    config: EventQueryConfig,
}

impl EventSourceAdapter {
    pub fn new(source: Arc<dyn LedgerSource>, retry: RetryPolicy, config: EventQueryConfig) -> Self {
        Self {
            source,
            retry,
            config,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// All events of `kinds` in `range`, ordered by `(index, position)`.
    ///
    /// The range is split per kind and per `max_span` chunk. If any
    /// sub-query still fails after its retries the whole call fails; no
    /// partial result is returned. `address` keeps only transfers with the
    /// address on either side, matched client-side.
    pub async fn query_events(
        &self,
        kinds: &[EventKind],
        range: IndexRange,
        address: Option<&Address>,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        let mut kinds = kinds.to_vec();
        kinds.sort();
        kinds.dedup();
        if kinds.is_empty() || range.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = range.chunks(self.config.max_span);
        let sub_queries: Vec<(EventKind, IndexRange)> = kinds
            .iter()
            .flat_map(|kind| chunks.iter().map(move |chunk| (*kind, *chunk)))
            .collect();

        tracing::debug!(
            %range,
            kinds = ?kinds,
            sub_queries = sub_queries.len(),
            "Querying events"
        );

        let batches: Vec<Vec<LedgerEvent>> = stream::iter(sub_queries)
            .map(|(kind, chunk)| self.query_chunk(kind, chunk))
            .buffer_unordered(self.config.concurrency.max(1))
            .try_collect()
            .await?;

        let mut events: Vec<LedgerEvent> = batches.into_iter().flatten().collect();
        if let Some(address) = address {
            events.retain(|event| event.involves(address));
        }
        events.sort_by_key(|event| event.ordering_key());

        tracing::debug!(%range, count = events.len(), "Events loaded");
        Ok(events)
    }

    async fn query_chunk(
        &self,
        kind: EventKind,
        chunk: IndexRange,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        let operation = format!("events[{}]", kind);
        let kinds = [kind];

        with_retry(&self.retry, &operation, |_| {
            self.source.query_events(&kinds, chunk.from, chunk.to)
        })
        .await
        .map_err(|failure| {
            tracing::warn!(
                operation = %operation,
                range = %chunk,
                attempts = failure.attempts,
                error = %failure.error,
                "Event query exhausted retries"
            );
            LedgerError::SourceUnavailable {
                what: operation.clone(),
                range: chunk,
                attempts: failure.attempts,
                source: failure.error,
            }
        })
    }
}
