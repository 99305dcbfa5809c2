use super::connection_lock::{ConnectionGuard, ConnectionLock};
use crate::affinity::ThreadAffinityGuard;
use crate::errors::{ErrorKind, WarrenError, WarrenResult};
use crate::invalidation::InvalidationTracker;
use crate::store::{QueryResult, SqlConnection, SqlValue};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Created, `begin` not yet run
    NotStarted,
    /// Open and accepting statements
    Active,
    /// Open, and will commit when the outermost level ends
    MarkedSuccessful,
    /// Finished; the guard no longer controls the connection
    Ended,
}

/// What ending a transaction did to the native connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
    /// A nested level ended; the outermost level decides.
    Deferred,
}

/// Pairs every write with native begin/commit/rollback and keeps the
/// invalidation tracker in step with transaction boundaries.
///
/// Before the outermost `begin` the tracker's triggers are synchronised, and
/// after the outermost `end` a version refresh is requested, whatever the
/// outcome. A thread that begins again while it already has a transaction
/// open joins the outer one; if any inner level ends without being marked
/// successful the whole chain rolls back.
#[derive(Clone)]
pub struct TransactionCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    lock: Arc<ConnectionLock>,
    tracker: InvalidationTracker,
    affinity: ThreadAffinityGuard,
}

impl TransactionCoordinator {
    pub(crate) fn new(
        lock: Arc<ConnectionLock>,
        tracker: InvalidationTracker,
        affinity: ThreadAffinityGuard,
    ) -> Self {
        TransactionCoordinator {
            inner: Arc::new(CoordinatorInner {
                lock,
                tracker,
                affinity,
            }),
        }
    }

    /// Begins a transaction, or joins the one the calling thread already has
    /// open. The returned guard rolls back when dropped without `end`.
    pub fn begin_transaction(&self) -> WarrenResult<Transaction<'_>> {
        let mut transaction = Transaction::new(self);
        transaction.begin()?;
        Ok(transaction)
    }

    /// Runs `op` inside a transaction, committing when it returns `Ok` and
    /// rolling back when it returns `Err`.
    pub fn run_in_transaction<R, F>(&self, op: F) -> WarrenResult<R>
    where
        F: FnOnce(&Transaction<'_>) -> WarrenResult<R>,
    {
        let mut transaction = self.begin_transaction()?;
        match op(&transaction) {
            Ok(value) => {
                transaction.set_successful()?;
                transaction.end()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(end_error) = transaction.end() {
                    log::error!("Failed to end transaction after error: {}", end_error);
                }
                Err(e)
            }
        }
    }

    /// True when the calling thread has a transaction open.
    pub fn in_transaction(&self) -> bool {
        self.inner.lock.in_transaction()
    }

    /// Runs `op` with exclusive access to the connection, outside of any
    /// explicit transaction bookkeeping.
    pub(crate) fn with_connection<R, F>(&self, op: F) -> WarrenResult<R>
    where
        F: FnOnce(&dyn SqlConnection) -> WarrenResult<R>,
    {
        self.inner.affinity.assert_allowed_context()?;
        let _guard = self.inner.lock.acquire();
        self.inner.lock.ensure_open()?;
        op(self.inner.lock.connection())
    }

    /// Waits for in-flight work on the connection, then closes it.
    pub(crate) fn close(&self) -> WarrenResult<()> {
        let guard = self.inner.lock.acquire();
        if guard.borrow().depth > 0 {
            log::error!("Cannot close the database while a transaction is open");
            return Err(WarrenError::new(
                "Cannot close the database while a transaction is open",
                ErrorKind::TransactionError,
            ));
        }
        self.inner.lock.connection().close()
    }
}

/// Scoped handle of one `begin`/`end` pair.
///
/// Ends automatically on drop; a guard dropped without being marked
/// successful rolls the transaction back.
pub struct Transaction<'a> {
    id: String,
    coordinator: &'a TransactionCoordinator,
    guard: Option<ConnectionGuard<'a>>,
    state: TransactionState,
    nested: bool,
}

impl<'a> Transaction<'a> {
    fn new(coordinator: &'a TransactionCoordinator) -> Self {
        Transaction {
            id: Uuid::new_v4().to_string(),
            coordinator,
            guard: None,
            state: TransactionState::NotStarted,
            nested: false,
        }
    }

    fn begin(&mut self) -> WarrenResult<()> {
        if self.state != TransactionState::NotStarted {
            log::error!("Transaction {} has already been started", self.id);
            return Err(WarrenError::new(
                "Transaction has already been started",
                ErrorKind::TransactionError,
            ));
        }

        let coordinator: &'a TransactionCoordinator = self.coordinator;
        let inner: &'a CoordinatorInner = &coordinator.inner;
        inner.affinity.assert_allowed_context()?;

        let guard = inner.lock.acquire();
        inner.lock.ensure_open()?;

        let depth = guard.borrow().depth;
        if depth == 0 {
            // triggers must be in place before the first write of the transaction
            inner.tracker.sync_triggers();
            inner.lock.connection().begin()?;

            let mut stack = guard.borrow_mut();
            stack.depth = 1;
            stack.poisoned = false;
            stack.id = Some(self.id.clone());
            log::debug!("Transaction {} started", self.id);
        } else {
            let mut stack = guard.borrow_mut();
            stack.depth += 1;
            self.nested = true;
            log::debug!(
                "Transaction {} joined {:?} at depth {}",
                self.id,
                stack.id,
                stack.depth
            );
        }

        self.guard = Some(guard);
        self.state = TransactionState::Active;
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// True when this guard joined a transaction the thread already had open.
    pub fn is_nested(&self) -> bool {
        self.nested
    }

    /// Marks this level successful. Without it, ending rolls back.
    pub fn set_successful(&mut self) -> WarrenResult<()> {
        match self.state {
            TransactionState::Active => {
                self.state = TransactionState::MarkedSuccessful;
                Ok(())
            }
            state => {
                log::error!(
                    "Cannot mark transaction {} successful in state {:?}",
                    self.id,
                    state
                );
                Err(WarrenError::new(
                    &format!("Cannot mark transaction successful in state {:?}", state),
                    ErrorKind::TransactionError,
                ))
            }
        }
    }

    /// Ends this level. The outermost level commits when every level was
    /// marked successful and rolls back otherwise.
    pub fn end(mut self) -> WarrenResult<TransactionOutcome> {
        self.finish()
    }

    pub fn connection(&self) -> &dyn SqlConnection {
        self.coordinator.inner.lock.connection()
    }

    pub fn execute(&self, sql: &str, args: &[SqlValue]) -> WarrenResult<usize> {
        self.connection().execute(sql, args)
    }

    pub fn execute_batch(&self, sql: &str) -> WarrenResult<()> {
        self.connection().execute_batch(sql)
    }

    pub fn query(&self, sql: &str, args: &[SqlValue]) -> WarrenResult<QueryResult> {
        self.connection().query(sql, args)
    }

    fn finish(&mut self) -> WarrenResult<TransactionOutcome> {
        let successful = match self.state {
            TransactionState::Active => false,
            TransactionState::MarkedSuccessful => true,
            state => {
                log::error!("Cannot end transaction {} in state {:?}", self.id, state);
                return Err(WarrenError::new(
                    &format!("Cannot end transaction in state {:?}", state),
                    ErrorKind::TransactionError,
                ));
            }
        };
        self.state = TransactionState::Ended;

        let guard = match self.guard.as_ref() {
            Some(guard) => guard,
            None => {
                log::error!("Transaction {} lost its connection guard", self.id);
                return Err(WarrenError::new(
                    "Transaction lost its connection guard",
                    ErrorKind::InternalError,
                ));
            }
        };

        let commit = {
            let mut stack = guard.borrow_mut();
            if !successful {
                stack.poisoned = true;
            }
            stack.depth = stack.depth.saturating_sub(1);
            if stack.depth == 0 {
                let commit = !stack.poisoned;
                stack.poisoned = false;
                stack.id = None;
                Some(commit)
            } else {
                None
            }
        };

        let connection = self.connection();
        let result = match commit {
            None => Ok(TransactionOutcome::Deferred),
            Some(true) => match connection.commit() {
                Ok(_) => {
                    log::debug!("Transaction {} committed", self.id);
                    Ok(TransactionOutcome::Committed)
                }
                Err(e) => {
                    log::error!("Failed to commit transaction {}: {}", self.id, e);
                    if let Err(rollback_error) = connection.rollback() {
                        log::error!("Rollback after failed commit failed: {}", rollback_error);
                    }
                    Err(WarrenError::new_with_cause(
                        "Failed to commit transaction",
                        ErrorKind::TransactionError,
                        e,
                    ))
                }
            },
            Some(false) => match connection.rollback() {
                Ok(_) => {
                    log::debug!("Transaction {} rolled back", self.id);
                    Ok(TransactionOutcome::RolledBack)
                }
                Err(e) => {
                    log::error!("Failed to roll back transaction {}: {}", self.id, e);
                    Err(WarrenError::new_with_cause(
                        "Failed to roll back transaction",
                        ErrorKind::TransactionError,
                        e,
                    ))
                }
            },
        };

        // observers learn about committed writes; nested ends are no-ops there
        self.coordinator.inner.tracker.refresh_versions_async();
        result
    }
}

impl Debug for Transaction<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("nested", &self.nested)
            .finish()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if matches!(
            self.state,
            TransactionState::Active | TransactionState::MarkedSuccessful
        ) {
            if let Err(e) = self.finish() {
                log::error!("Failed to end transaction {} on drop: {}", self.id, e);
            }
        }
    }
}
