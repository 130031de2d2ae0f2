extern crate alloc;

pub mod amount;
pub mod event_cache;
pub mod ledger;
