//! Transaction coordination over the single native connection.
//!
//! All access to the connection is serialised through a re-entrant lock.
//! Writes run inside [`Transaction`] guards handed out by the
//! [`TransactionCoordinator`], which also drives the invalidation tracker at
//! transaction boundaries.

mod connection_lock;
mod coordinator;

pub(crate) use connection_lock::*;
pub use coordinator::*;
