use crate::errors::{ErrorKind, WarrenError, WarrenResult};
use crate::store::SqlConnection;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::sync::Arc;

/// Per-connection transaction bookkeeping, only touched while the lock is held.
#[derive(Debug, Default)]
pub(crate) struct TransactionStack {
    /// Number of open `begin` calls on the owning thread.
    pub(crate) depth: usize,
    /// Set once any level ended without being marked successful.
    pub(crate) poisoned: bool,
    /// Id of the outermost transaction.
    pub(crate) id: Option<String>,
}

pub(crate) type ConnectionGuard<'a> = ReentrantMutexGuard<'a, RefCell<TransactionStack>>;

/// Exclusive, re-entrant access to the single native connection.
///
/// The owning thread may acquire it again (nested transactions, observer
/// callbacks running inline), every other thread waits until it is released.
pub(crate) struct ConnectionLock {
    connection: Arc<dyn SqlConnection>,
    state: ReentrantMutex<RefCell<TransactionStack>>,
}

impl ConnectionLock {
    pub(crate) fn new(connection: Arc<dyn SqlConnection>) -> Self {
        ConnectionLock {
            connection,
            state: ReentrantMutex::new(RefCell::new(TransactionStack::default())),
        }
    }

    pub(crate) fn acquire(&self) -> ConnectionGuard<'_> {
        self.state.lock()
    }

    pub(crate) fn connection(&self) -> &dyn SqlConnection {
        self.connection.as_ref()
    }

    /// True when the calling thread has a transaction open.
    pub(crate) fn in_transaction(&self) -> bool {
        // another thread holding the lock means this one has no transaction
        match self.state.try_lock() {
            Some(guard) => guard.borrow().depth > 0,
            None => false,
        }
    }

    pub(crate) fn ensure_open(&self) -> WarrenResult<()> {
        if !self.connection.is_open() {
            log::error!("Database is already closed");
            return Err(WarrenError::new(
                "Database is already closed",
                ErrorKind::DatabaseClosed,
            ));
        }
        Ok(())
    }
}
