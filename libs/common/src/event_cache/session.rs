//! Session-scoped cache shared by the index resolver and the history pager.
//!
//! One [`SessionCache`] is created per browsing session (or per client) and
//! handed to every component that needs it. Clones share the same storage.
//! Every write is idempotent: the same key always maps to the same value,
//! so concurrent writers cannot corrupt each other.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::HashMap;

use parking_lot::RwLock;

use super::types::{DateBound, FilterKey, IndexRangeEntry, IndexRangeKey};

#[derive(Debug, Default)]
struct SessionState {
    deployment_index: RwLock<Option<u64>>,
    timestamps: RwLock<HashMap<u64, u64>>,
    date_indices: RwLock<HashMap<(DateBound, u64), u64>>,
    ranges: RwLock<HashMap<IndexRangeKey, Arc<IndexRangeEntry>>>,
    active_filter: RwLock<Option<FilterKey>>,
    generation: AtomicU64,
}

/// Explicit, bounded-lifetime cache object. Drop it to end the session.
#[derive(Debug, Clone, Default)]
pub struct SessionCache {
    inner: Arc<SessionState>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deployment index of the tracked entity, once discovered.
    pub fn deployment_index(&self) -> Option<u64> {
        *self.inner.deployment_index.read()
    }

    pub fn set_deployment_index(&self, index: u64) {
        *self.inner.deployment_index.write() = Some(index);
    }

    /// Timestamp of an index. Timestamps are immutable once produced, so
    /// entries never expire within a session.
    pub fn timestamp(&self, index: u64) -> Option<u64> {
        self.inner.timestamps.read().get(&index).copied()
    }

    pub fn record_timestamp(&self, index: u64, timestamp: u64) {
        self.inner.timestamps.write().insert(index, timestamp);
    }

    pub fn timestamp_count(&self) -> usize {
        self.inner.timestamps.read().len()
    }

    pub fn date_index(&self, bound: DateBound, timestamp: u64) -> Option<u64> {
        self.inner
            .date_indices
            .read()
            .get(&(bound, timestamp))
            .copied()
    }

    pub fn record_date_index(&self, bound: DateBound, timestamp: u64, index: u64) {
        self.inner
            .date_indices
            .write()
            .insert((bound, timestamp), index);
    }

    /// Current cache generation. Bumped whenever the active filter changes.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    pub fn active_filter(&self) -> Option<FilterKey> {
        self.inner.active_filter.read().clone()
    }

    /// Make `filter` the active filter set.
    ///
    /// Switching to a different filter drops every memoized index window
    /// and bumps the generation, so in-flight work started under the old
    /// filter can detect that it has been superseded. Returns `true` if
    /// the filter changed.
    pub fn activate_filter(&self, filter: &FilterKey) -> bool {
        let mut active = self.inner.active_filter.write();
        if active.as_ref() == Some(filter) {
            return false;
        }
        *active = Some(filter.clone());
        self.invalidate_ranges();
        true
    }

    pub fn range(&self, key: &IndexRangeKey) -> Option<Arc<IndexRangeEntry>> {
        self.inner.ranges.read().get(key).cloned()
    }

    /// Memoize a resolved window, unless the cache moved on to a newer
    /// generation since `generation` was observed.
    pub fn store_range(&self, entry: IndexRangeEntry, generation: u64) -> Option<Arc<IndexRangeEntry>> {
        let mut ranges = self.inner.ranges.write();
        if self.generation() != generation {
            return None;
        }
        let entry = Arc::new(entry);
        ranges.insert(entry.key(), Arc::clone(&entry));
        Some(entry)
    }

    pub fn range_count(&self) -> usize {
        self.inner.ranges.read().len()
    }

    /// Drop all memoized windows and bump the generation.
    pub fn invalidate_ranges(&self) {
        let mut ranges = self.inner.ranges.write();
        ranges.clear();
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
    }
}
