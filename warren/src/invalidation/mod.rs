//! Table invalidation tracking.
//!
//! Observers register interest in tracked tables through the
//! [`InvalidationTracker`] and are called back after transactions that
//! changed those tables have committed.

mod observed_tables;
mod observer;
mod tracker;

pub use observer::*;
pub use tracker::*;
