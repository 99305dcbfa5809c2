use crate::affinity::ThreadAffinityGuard;
use crate::errors::{ErrorKind, WarrenError, WarrenResult};
use crate::invalidation::{InvalidationInfo, InvalidationTracker, ObserverHandle};
use crate::migration::{MigrationManager, MigrationOverride, MigrationPath, MigrationReport};
use crate::store::{QueryResult, SqlValue};
use crate::transaction::{ConnectionLock, Transaction, TransactionCoordinator};
use crate::warren_builder::WarrenBuilder;
use crate::warren_config::WarrenConfig;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An open Warren database.
///
/// Wraps one native connection and layers schema migrations, coordinated
/// transactions, main-thread protection and table invalidation on top of it.
/// Cloning is cheap and every clone refers to the same database.
///
/// # Examples
///
/// ```rust,ignore
/// use warren::warren::Warren;
///
/// let db = Warren::builder()
///     .in_memory()
///     .tracked_tables(&["users"])
///     .build()?;
///
/// let handle = db.register_observer(&["users"], |info| {
///     println!("changed: {:?}", info.tables());
///     Ok(())
/// })?;
///
/// db.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
/// db.execute("INSERT INTO users (name) VALUES (?)", &["alice".into()])?;
/// db.unregister_observer(&handle)?;
/// db.close()?;
/// ```
#[derive(Clone)]
pub struct Warren {
    inner: Arc<WarrenInner>,
}

impl Warren {
    /// Builder that yields a plain `Warren`.
    pub fn builder() -> WarrenBuilder<Warren> {
        WarrenBuilder::new().database_factory(|warren| warren)
    }

    pub(crate) fn open(config: WarrenConfig) -> WarrenResult<Warren> {
        let inner = WarrenInner::open(config)?;
        Ok(Warren {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &WarrenConfig {
        &self.inner.config
    }

    /// Migrations passed to the builder that replaced an earlier one.
    pub fn migration_overrides(&self) -> &[MigrationOverride] {
        self.inner.config.migration_overrides()
    }

    /// Runs a read query. Must not be called from the main thread unless the
    /// database allows it.
    pub fn query(&self, sql: &str, args: &[SqlValue]) -> WarrenResult<QueryResult> {
        self.inner.check_opened()?;
        self.inner
            .coordinator
            .with_connection(|conn| conn.query(sql, args))
    }

    /// Runs a write inside an implicit transaction so observers hear about it.
    pub fn execute(&self, sql: &str, args: &[SqlValue]) -> WarrenResult<usize> {
        self.inner.check_opened()?;
        self.inner
            .coordinator
            .run_in_transaction(|txn| txn.execute(sql, args))
    }

    /// Runs `;` separated statements inside one implicit transaction.
    pub fn execute_batch(&self, sql: &str) -> WarrenResult<()> {
        self.inner.check_opened()?;
        self.inner
            .coordinator
            .run_in_transaction(|txn| txn.execute_batch(sql))
    }

    pub fn begin_transaction(&self) -> WarrenResult<Transaction<'_>> {
        self.inner.check_opened()?;
        self.inner.coordinator.begin_transaction()
    }

    pub fn run_in_transaction<R, F>(&self, op: F) -> WarrenResult<R>
    where
        F: FnOnce(&Transaction<'_>) -> WarrenResult<R>,
    {
        self.inner.check_opened()?;
        self.inner.coordinator.run_in_transaction(op)
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.coordinator.in_transaction()
    }

    pub fn invalidation_tracker(&self) -> &InvalidationTracker {
        &self.inner.tracker
    }

    pub fn register_observer<F>(&self, tables: &[&str], on_invalidated: F) -> WarrenResult<ObserverHandle>
    where
        F: Fn(InvalidationInfo) -> WarrenResult<()> + Send + Sync + 'static,
    {
        self.inner.check_opened()?;
        self.inner.tracker.register_observer(tables, on_invalidated)
    }

    pub fn unregister_observer(&self, handle: &ObserverHandle) -> WarrenResult<bool> {
        self.inner.tracker.unregister_observer(handle)
    }

    /// Migrates the schema to `target` with the registered migrations.
    ///
    /// Fails with [`ErrorKind::UnreachableMigration`] when no chain leads
    /// there; what to do next (fail, or recreate the schema) is up to the
    /// caller.
    pub fn migrate(&self, target: u32) -> WarrenResult<MigrationReport> {
        self.inner.check_opened()?;
        self.inner.migration_manager.migrate(target)
    }

    /// The chain `migrate` would apply between two versions.
    pub fn migration_path(&self, start: u32, end: u32) -> WarrenResult<MigrationPath> {
        self.inner.migration_manager.migration_path(start, end)
    }

    /// The persisted schema version.
    pub fn version(&self) -> WarrenResult<u32> {
        self.inner.check_opened()?;
        self.inner.migration_manager.current_version()
    }

    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst) && self.inner.lock.connection().is_open()
    }

    /// Closes the database. Calls after this fail with
    /// [`ErrorKind::DatabaseClosed`].
    pub fn close(&self) -> WarrenResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.inner.coordinator.close() {
            self.inner.closed.store(false, Ordering::SeqCst);
            return Err(e);
        }
        self.inner.tracker.close()?;
        log::debug!("Database closed");
        Ok(())
    }
}

impl Debug for Warren {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Warren")
            .field("config", &self.inner.config)
            .field("open", &self.is_open())
            .finish()
    }
}

struct WarrenInner {
    config: WarrenConfig,
    lock: Arc<ConnectionLock>,
    coordinator: TransactionCoordinator,
    tracker: InvalidationTracker,
    migration_manager: MigrationManager,
    closed: AtomicBool,
}

impl WarrenInner {
    fn open(config: WarrenConfig) -> WarrenResult<WarrenInner> {
        let connection = config.open_helper_factory().open(&config.open_config())?;
        let lock = Arc::new(ConnectionLock::new(connection));

        let tracker = InvalidationTracker::new(
            lock.clone(),
            config.task_executor().clone(),
            config.tracked_tables().to_vec(),
            config.observer_delivery(),
        );
        if let Err(e) = tracker.initialize() {
            log::error!("Failed to initialize invalidation tracking: {}", e);
            if let Err(close_error) = lock.connection().close() {
                log::error!("Failed to close connection: {}", close_error);
            }
            return Err(e);
        }

        let affinity = ThreadAffinityGuard::new(
            config.task_executor().clone(),
            config.allow_main_thread_queries(),
        );
        let coordinator = TransactionCoordinator::new(lock.clone(), tracker.clone(), affinity);
        let migration_manager = MigrationManager::new(coordinator.clone(), config.migrations().clone());

        log::debug!("Database opened with config {:?}", config);
        Ok(WarrenInner {
            config,
            lock,
            coordinator,
            tracker,
            migration_manager,
            closed: AtomicBool::new(false),
        })
    }

    fn check_opened(&self) -> WarrenResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            log::error!("Database is already closed");
            return Err(WarrenError::new(
                "Database is already closed",
                ErrorKind::DatabaseClosed,
            ));
        }
        Ok(())
    }
}
