//! Paged transaction feed over index windows.
//!
//! Without an address filter a page maps to a fixed-width index window,
//! walked back from the tip (or forward from the origin). Window contents
//! are memoized per `(range, filter)` in the session cache. With an
//! address filter the whole eligible range is loaded once, since matches
//! are too sparse to page by index.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use common::event_cache::{
    DateBound, FilterKey, IndexRangeEntry, IndexRangeKey, SessionCache,
};
use common::ledger::{IndexRange, IndexedRecord, LedgerEvent, Transaction};
use futures_util::{stream, StreamExt, TryStreamExt};
use parking_lot::Mutex;

use crate::error::{LedgerError, RequestedPoint, SourceError};
use crate::events::EventSourceAdapter;
use crate::resolver::IndexResolver;
use crate::types::{HistoryConfig, HistoryFilters, HistoryOrder, HistoryPage};

/// Position of the last served page, for `load_more`. `eligible` is the
/// range resolved when the feed was opened; the tip may have moved since.
#[derive(Debug, Clone)]
struct Cursor {
    filters: HistoryFilters,
    page_size: usize,
    eligible: IndexRange,
    next_page: usize,
    has_more: bool,
}

pub struct TransactionHistory {
    resolver: Arc<IndexResolver>,
    events: Arc<EventSourceAdapter>,
    cache: SessionCache,
    config: HistoryConfig,
    cursor: Mutex<Option<Cursor>>,
}

impl TransactionHistory {
    pub fn new(
        resolver: Arc<IndexResolver>,
        events: Arc<EventSourceAdapter>,
        config: HistoryConfig,
    ) -> Self {
        let cache = resolver.cache().clone();
        Self {
            resolver,
            events,
            cache,
            config,
            cursor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Page `page_number` (1-based) of the feed selected by `filters`,
    /// anchored at the current tip.
    ///
    /// Fails with `Superseded` if another request switched the active
    /// filter while this one was loading.
    pub async fn page(
        &self,
        page_number: usize,
        page_size: usize,
        filters: &HistoryFilters,
    ) -> Result<HistoryPage, LedgerError> {
        self.serve(page_number, page_size, filters, None).await
    }

    /// The page after the last one served, with the same filters and
    /// within the same eligible range, so indices mined since the first
    /// page neither shift nor repeat the feed.
    pub async fn load_more(&self) -> Result<HistoryPage, LedgerError> {
        let cursor = self.cursor.lock().clone().ok_or_else(|| {
            LedgerError::Validation("no page has been loaded yet".to_string())
        })?;
        if !cursor.has_more {
            return Ok(HistoryPage::empty(cursor.next_page));
        }
        self.serve(
            cursor.next_page,
            cursor.page_size,
            &cursor.filters,
            Some(cursor.eligible),
        )
        .await
    }

    async fn serve(
        &self,
        page_number: usize,
        page_size: usize,
        filters: &HistoryFilters,
        pinned: Option<IndexRange>,
    ) -> Result<HistoryPage, LedgerError> {
        if page_number == 0 {
            return Err(LedgerError::Validation("page numbers start at 1".to_string()));
        }
        if page_size == 0 {
            return Err(LedgerError::Validation("page size must be positive".to_string()));
        }
        filters.validate()?;

        let filter_key = filters.cache_key(self.config.order);
        if self.cache.activate_filter(&filter_key) {
            tracing::debug!(filter = %filter_key, "Filter changed, window cache cleared");
        }
        let generation = self.cache.generation();

        let eligible = match pinned {
            Some(range) => range,
            None => self.eligible_range(filters).await?,
        };
        let page = if filters.address.is_some() {
            self.address_page(page_number, eligible, filters, &filter_key, generation)
                .await?
        } else {
            self.window_page(page_number, page_size, eligible, filters, &filter_key, generation)
                .await?
        };

        if self.cache.generation() != generation {
            return Err(LedgerError::Superseded);
        }

        *self.cursor.lock() = Some(Cursor {
            filters: filters.clone(),
            page_size,
            eligible,
            next_page: page_number + 1,
            has_more: page.has_more,
        });

        tracing::info!(
            page = page_number,
            count = page.len(),
            has_more = page.has_more,
            range = ?page.range,
            "Loaded history page"
        );
        Ok(page)
    }

    /// `[max(origin, start), min(tip, end)]` for the filter's date range.
    async fn eligible_range(&self, filters: &HistoryFilters) -> Result<IndexRange, LedgerError> {
        let tip = self.resolver.tip().await?;
        let origin = self.resolver.deployment_index(None).await?;
        let dates = filters.date_range.unwrap_or_default();

        let start = match dates.start {
            Some(ts) => self.start_index(ts, origin, tip).await?,
            None => origin,
        };
        let end = match dates.end {
            Some(ts) => self.end_index(ts, origin, tip).await?,
            None => tip.index,
        };

        let range = IndexRange::new(start.max(origin), end.min(tip.index));
        if range.is_empty() {
            return Err(LedgerError::Validation(format!(
                "date range selects no indices ({} to {})",
                start, end
            )));
        }
        Ok(range)
    }

    /// First index at or after `ts`.
    async fn start_index(&self, ts: u64, origin: u64, tip: IndexedRecord) -> Result<u64, LedgerError> {
        if let Some(index) = self.cache.date_index(DateBound::Start, ts) {
            return Ok(index);
        }
        if ts > tip.timestamp {
            return Err(LedgerError::FutureTimestamp { target: ts, tip });
        }
        if ts <= self.resolver.timestamp_at(origin).await? {
            return Ok(origin);
        }

        let before = self.resolver.find_index_at_or_before(ts - 1, None).await?;
        let index = before.index + 1;
        self.cache.record_date_index(DateBound::Start, ts, index);
        Ok(index)
    }

    /// Last index at or before `ts`.
    async fn end_index(&self, ts: u64, origin: u64, tip: IndexedRecord) -> Result<u64, LedgerError> {
        if let Some(index) = self.cache.date_index(DateBound::End, ts) {
            return Ok(index);
        }
        if ts >= tip.timestamp {
            return Ok(tip.index);
        }
        if ts < self.resolver.timestamp_at(origin).await? {
            return Err(LedgerError::BeforeOrigin {
                requested: RequestedPoint::Timestamp(ts),
                origin,
            });
        }

        let index = self.resolver.find_index_at_or_before(ts, None).await?.index;
        self.cache.record_date_index(DateBound::End, ts, index);
        Ok(index)
    }

    async fn address_page(
        &self,
        page_number: usize,
        eligible: IndexRange,
        filters: &HistoryFilters,
        filter_key: &FilterKey,
        generation: u64,
    ) -> Result<HistoryPage, LedgerError> {
        if page_number > 1 {
            return Ok(HistoryPage {
                range: Some(eligible),
                ..HistoryPage::empty(page_number)
            });
        }

        let entry = self
            .load_range(eligible, filters, filter_key, generation)
            .await?;
        Ok(HistoryPage {
            page_number,
            transactions: entry.transactions.to_vec(),
            has_more: false,
            range: Some(eligible),
        })
    }

    async fn window_page(
        &self,
        page_number: usize,
        page_size: usize,
        eligible: IndexRange,
        filters: &HistoryFilters,
        filter_key: &FilterKey,
        generation: u64,
    ) -> Result<HistoryPage, LedgerError> {
        let span = self.config.window_span(page_size);
        let order = self.config.order;

        let Some(window) = page_window(eligible, span, page_number - 1, order) else {
            return Ok(HistoryPage::empty(page_number));
        };

        let entry = self.load_range(window, filters, filter_key, generation).await?;
        Ok(HistoryPage {
            page_number,
            transactions: entry.transactions.to_vec(),
            has_more: page_window(eligible, span, page_number, order).is_some(),
            range: Some(window),
        })
    }

    async fn load_range(
        &self,
        range: IndexRange,
        filters: &HistoryFilters,
        filter_key: &FilterKey,
        generation: u64,
    ) -> Result<Arc<IndexRangeEntry>, LedgerError> {
        let key = IndexRangeKey::new(range, filter_key.clone());
        if let Some(entry) = self.cache.range(&key) {
            tracing::debug!(%range, "Window cache hit");
            return Ok(entry);
        }

        let kinds = filters.event_kinds();
        let events = self
            .events
            .query_events(&kinds, range, filters.address.as_ref())
            .await?;
        let transactions = self.materialize(events, range, filters).await?;

        self.cache
            .store_range(
                IndexRangeEntry::new(range, filter_key.clone(), transactions),
                generation,
            )
            .ok_or(LedgerError::Superseded)
    }

    /// Classify, order and timestamp the raw events of `range`.
    async fn materialize(
        &self,
        mut events: Vec<LedgerEvent>,
        range: IndexRange,
        filters: &HistoryFilters,
    ) -> Result<Vec<Transaction>, LedgerError> {
        events.sort_by_key(|event| event.ordering_key());

        let retry = self.events.retry_policy();
        let indices: BTreeSet<u64> = events.iter().map(|event| event.index).collect();
        let timestamps: HashMap<u64, u64> = stream::iter(indices)
            .map(|index| async move {
                self.resolver
                    .timestamp_at_retrying(index, retry)
                    .await
                    .map(|timestamp| (index, timestamp))
            })
            .buffer_unordered(self.config.timestamp_concurrency.max(1))
            .try_collect()
            .await
            .map_err(|failure| {
                tracing::warn!(
                    %range,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Timestamp reads exhausted retries"
                );
                LedgerError::SourceUnavailable {
                    what: "timestamp".to_string(),
                    range,
                    attempts: failure.attempts,
                    source: failure.error,
                }
            })?;

        let mut transactions = Vec::with_capacity(events.len());
        for event in &events {
            let timestamp = timestamps
                .get(&event.index)
                .copied()
                .ok_or(SourceError::MissingRecord { index: event.index })?;
            if let Some(tx) = Transaction::from_event(event, timestamp) {
                if filters.matches(&tx) {
                    transactions.push(tx);
                }
            }
        }

        if self.config.order == HistoryOrder::NewestFirst {
            transactions.reverse();
        }
        Ok(transactions)
    }
}

/// Index window of zero-based page `page` within `eligible`, or `None`
/// once the walk has left the range.
pub fn page_window(
    eligible: IndexRange,
    span: u64,
    page: usize,
    order: HistoryOrder,
) -> Option<IndexRange> {
    let span = span.max(1);
    let offset = (page as u64).checked_mul(span)?;
    if offset >= eligible.len() {
        return None;
    }
    Some(match order {
        HistoryOrder::NewestFirst => {
            let to = eligible.to - offset;
            let from = to.saturating_sub(span - 1).max(eligible.from);
            IndexRange::new(from, to)
        }
        HistoryOrder::OldestFirst => {
            let from = eligible.from + offset;
            let to = from.saturating_add(span - 1).min(eligible.to);
            IndexRange::new(from, to)
        }
    })
}
