//! Session cache for immutable ledger lookups.
//!
//! This module provides:
//! - The deployment index of the tracked entity
//! - Timestamp-by-index and date-to-index conversions
//! - Memoized transaction windows keyed by `(range, filter)`
//!
//! # Architecture
//!
//! Everything cached here is derived from immutable history, so entries only
//! need invalidating when the caller changes what it is looking at (the
//! active filter set). The cache is an explicit object created per session
//! and passed to the components that use it; there is no global instance.
//!
//! # Usage
//!
//! ```ignore
//! use common::event_cache::{FilterKey, SessionCache};
//!
//! let cache = SessionCache::new();
//! cache.activate_filter(&FilterKey::new("order=desc"));
//! let generation = cache.generation();
//! ```

pub mod session;
pub mod types;

pub use session::SessionCache;
pub use types::{DateBound, FilterKey, IndexRangeEntry, IndexRangeKey};
