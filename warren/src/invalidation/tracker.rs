use super::observed_tables::{ObservedTableTracker, TriggerAction};
use super::{InvalidationInfo, ObserverDelivery, ObserverHandle, ObserverListener};
use crate::common::{
    atomic, Atomic, SubscriberRef, TaskExecutor, WarrenEventBus, WriteExecutor,
    MODIFICATION_LOG_TABLE, TRIGGER_NAME_PREFIX, TRIGGER_OPERATIONS,
};
use crate::errors::{ErrorKind, WarrenError, WarrenResult};
use crate::store::{QueryResult, SqlConnection};
use crate::transaction::ConnectionLock;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct ObserverEntry {
    table_ids: Vec<usize>,
    subscriber: SubscriberRef,
}

/// Notifies observers when committed writes change the tables they watch.
///
/// Every tracked table gets a row in a temporary modification log. While a
/// table has observers, `AFTER INSERT/UPDATE/DELETE` triggers bump its row's
/// version, so the counters move together with the transaction that wrote
/// them: a rollback leaves them untouched. After each outermost transaction a
/// refresh pass compares the log with the last known versions and publishes
/// one [`InvalidationInfo`] with every table that moved.
///
/// Refresh requests coalesce: while a pass is pending, further requests are
/// dropped, and the pending pass sees all of their writes.
#[derive(Clone)]
pub struct InvalidationTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    lock: Arc<ConnectionLock>,
    executor: Arc<dyn TaskExecutor>,
    delivery: ObserverDelivery,
    tables: Vec<String>,
    table_ids: HashMap<String, usize>,
    observed: Mutex<ObservedTableTracker>,
    observers: DashMap<String, ObserverEntry>,
    event_bus: WarrenEventBus<InvalidationInfo, ObserverListener>,
    versions: Atomic<Vec<i64>>,
    pending_refresh: AtomicBool,
}

impl InvalidationTracker {
    pub(crate) fn new(
        lock: Arc<ConnectionLock>,
        executor: Arc<dyn TaskExecutor>,
        tables: Vec<String>,
        delivery: ObserverDelivery,
    ) -> Self {
        let table_ids = tables
            .iter()
            .enumerate()
            .map(|(id, name)| (name.to_lowercase(), id))
            .collect();
        let table_count = tables.len();

        InvalidationTracker {
            inner: Arc::new(TrackerInner {
                lock,
                executor,
                delivery,
                tables,
                table_ids,
                observed: Mutex::new(ObservedTableTracker::new(table_count)),
                observers: DashMap::new(),
                event_bus: WarrenEventBus::new(),
                versions: atomic(vec![0; table_count]),
                pending_refresh: AtomicBool::new(false),
            }),
        }
    }

    /// Creates the modification log and seeds one row per tracked table.
    pub(crate) fn initialize(&self) -> WarrenResult<()> {
        let _guard = self.inner.lock.acquire();
        self.inner.lock.ensure_open()?;
        let conn = self.inner.lock.connection();

        conn.execute_batch(&format!(
            "CREATE TEMP TABLE IF NOT EXISTS {} \
             (table_id INTEGER PRIMARY KEY, version INTEGER NOT NULL DEFAULT 0)",
            MODIFICATION_LOG_TABLE
        ))?;
        let insert = format!(
            "INSERT OR IGNORE INTO {} (table_id, version) VALUES (?, 0)",
            MODIFICATION_LOG_TABLE
        );
        for id in 0..self.inner.tables.len() {
            conn.execute(&insert, &[(id as i64).into()])?;
        }

        // start from whatever the log holds so nothing fires for old writes
        let current = self.read_versions(conn)?;
        self.inner.versions.write_with(|known| {
            for (id, version) in current {
                if let Some(slot) = known.get_mut(id) {
                    *slot = version;
                }
            }
        });

        log::debug!(
            "Invalidation tracker initialized for {} table(s)",
            self.inner.tables.len()
        );
        Ok(())
    }

    /// Names of the tracked tables, in table id order.
    pub fn tracked_tables(&self) -> &[String] {
        &self.inner.tables
    }

    /// Registers `on_invalidated` for changes to any of `tables`.
    ///
    /// Table names are matched case-insensitively against the tracked tables.
    /// Triggers for newly observed tables are installed when the next
    /// transaction begins.
    pub fn register_observer<F>(&self, tables: &[&str], on_invalidated: F) -> WarrenResult<ObserverHandle>
    where
        F: Fn(InvalidationInfo) -> WarrenResult<()> + Send + Sync + 'static,
    {
        if tables.is_empty() {
            log::error!("An observer must watch at least one table");
            return Err(WarrenError::new(
                "An observer must watch at least one table",
                ErrorKind::ValidationError,
            ));
        }

        let mut table_ids = Vec::with_capacity(tables.len());
        for table in tables {
            match self.table_id(table) {
                Some(id) => table_ids.push(id),
                None => {
                    log::error!("There is no tracked table with name {}", table);
                    return Err(WarrenError::new(
                        &format!("There is no tracked table with name {}", table),
                        ErrorKind::ValidationError,
                    ));
                }
            }
        }
        table_ids.sort_unstable();
        table_ids.dedup();

        let names: BTreeSet<String> = table_ids
            .iter()
            .map(|id| self.inner.tables[*id].clone())
            .collect();
        let listener = ObserverListener::from_callback(names, Arc::new(on_invalidated));
        let subscriber = self.inner.event_bus.register(listener)?;

        let handle = ObserverHandle::new();
        self.inner.observed.lock().on_added(&table_ids);
        self.inner.observers.insert(
            handle.id().to_string(),
            ObserverEntry {
                table_ids,
                subscriber,
            },
        );

        log::debug!("Observer {} registered for {:?}", handle.id(), tables);
        Ok(handle)
    }

    /// Removes an observer. Returns false when the handle is unknown.
    pub fn unregister_observer(&self, handle: &ObserverHandle) -> WarrenResult<bool> {
        match self.inner.observers.remove(handle.id()) {
            Some((_, entry)) => {
                self.inner.observed.lock().on_removed(&entry.table_ids);
                self.inner.event_bus.deregister(entry.subscriber)?;
                log::debug!("Observer {} unregistered", handle.id());
                Ok(true)
            }
            None => {
                log::debug!("Observer {} is not registered", handle.id());
                Ok(false)
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// True when at least one observer watches `table`.
    pub fn is_observed(&self, table: &str) -> bool {
        match self.table_id(table) {
            Some(id) => self.inner.observed.lock().observer_count(id) > 0,
            None => false,
        }
    }

    /// Installs triggers for newly observed tables and drops them for tables
    /// nobody observes any more.
    ///
    /// Triggers the schema lost since the last sync, for example because a
    /// migration dropped and recreated their table, are installed again.
    /// Never runs while the calling thread has a transaction open. Failures
    /// are logged and retried on the next sync.
    pub fn sync_triggers(&self) {
        let guard = self.inner.lock.acquire();
        if guard.borrow().depth > 0 {
            return;
        }

        let conn = self.inner.lock.connection();
        if !conn.is_open() {
            return;
        }

        if let Err(e) = self.forget_lost_triggers(conn) {
            log::warn!("Failed to check installed triggers: {}", e);
        }

        let plan = self.inner.observed.lock().sync_plan();
        for (table_id, action) in plan {
            let result = match action {
                TriggerAction::Install => self.install_triggers(conn, table_id),
                TriggerAction::Remove => self.remove_triggers(conn, table_id),
            };

            match result {
                Ok(_) => self.inner.observed.lock().acknowledge(table_id, action),
                Err(e) => log::warn!(
                    "Failed to {:?} triggers for table {}, retrying on next sync: {}",
                    action,
                    self.inner.tables[table_id],
                    e
                ),
            }
        }
    }

    /// Schedules a refresh pass on the disk I/O executor unless one is
    /// already pending.
    pub fn refresh_versions_async(&self) {
        if self
            .inner
            .pending_refresh
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let tracker = self.clone();
            let scheduled = self.inner.executor.execute_on_disk_io(Box::new(move || {
                if let Err(e) = tracker.refresh_versions() {
                    log::warn!("Invalidation refresh failed: {}", e);
                }
            }));

            if let Err(e) = scheduled {
                // nothing will clear the flag for us
                self.inner.pending_refresh.store(false, Ordering::SeqCst);
                log::warn!("Invalidation refresh could not be scheduled: {}", e);
            }
        }
    }

    /// Runs a refresh pass on the calling thread.
    pub fn refresh_versions_sync(&self) -> WarrenResult<()> {
        self.inner.pending_refresh.store(true, Ordering::SeqCst);
        self.refresh_versions()
    }

    pub(crate) fn close(&self) -> WarrenResult<()> {
        self.inner.observers.clear();
        self.inner.event_bus.close()
    }

    fn refresh_versions(&self) -> WarrenResult<()> {
        let invalidated = {
            let guard = self.inner.lock.acquire();
            // requests from here on need a pass of their own
            self.inner.pending_refresh.store(false, Ordering::SeqCst);

            if guard.borrow().depth > 0 {
                // the outermost end requests another pass
                log::debug!("Refresh skipped, transaction in progress");
                return Ok(());
            }

            let conn = self.inner.lock.connection();
            if !conn.is_open() {
                return Ok(());
            }

            let current = self.read_versions(conn)?;
            self.advance_versions(current)
        };

        if !invalidated.is_empty() {
            log::debug!("Tables invalidated: {:?}", invalidated);
            self.deliver(InvalidationInfo::new(invalidated));
        }
        Ok(())
    }

    fn read_versions(&self, conn: &dyn SqlConnection) -> WarrenResult<Vec<(usize, i64)>> {
        let result: QueryResult = conn.query(
            &format!("SELECT table_id, version FROM {}", MODIFICATION_LOG_TABLE),
            &[],
        )?;

        Ok(result
            .rows()
            .iter()
            .filter_map(|row| {
                let table_id = row.first()?.as_i64()?;
                let version = row.get(1)?.as_i64()?;
                usize::try_from(table_id).ok().map(|id| (id, version))
            })
            .collect())
    }

    /// Moves the known versions forward and returns the tables that moved.
    fn advance_versions(&self, current: Vec<(usize, i64)>) -> BTreeSet<String> {
        self.inner.versions.write_with(|known| {
            let mut invalidated = BTreeSet::new();
            for (table_id, version) in current {
                if let Some(slot) = known.get_mut(table_id) {
                    if version > *slot {
                        *slot = version;
                        invalidated.insert(self.inner.tables[table_id].clone());
                    }
                }
            }
            invalidated
        })
    }

    fn deliver(&self, info: InvalidationInfo) {
        match self.inner.delivery {
            ObserverDelivery::Background => publish(&self.inner.event_bus, info),
            ObserverDelivery::MainThread => {
                let event_bus = self.inner.event_bus.clone();
                self.inner
                    .executor
                    .post_to_main_thread(Box::new(move || publish(&event_bus, info)));
            }
        }
    }

    /// Marks tables as uninstalled when any of their triggers is missing.
    fn forget_lost_triggers(&self, conn: &dyn SqlConnection) -> WarrenResult<()> {
        let installed = self.inner.observed.lock().installed_tables();
        if installed.is_empty() {
            return Ok(());
        }

        let present: HashSet<String> = conn
            .query("SELECT name FROM sqlite_temp_master WHERE type = 'trigger'", &[])?
            .rows()
            .iter()
            .filter_map(|row| row.first()?.as_str().map(str::to_string))
            .collect();

        let mut observed = self.inner.observed.lock();
        for table_id in installed {
            let table = &self.inner.tables[table_id];
            let lost = TRIGGER_OPERATIONS
                .iter()
                .any(|operation| !present.contains(&trigger_name(table, operation)));
            if lost {
                log::debug!("Triggers for table {} are gone, reinstalling", table);
                observed.mark_lost(table_id);
            }
        }
        Ok(())
    }

    fn install_triggers(&self, conn: &dyn SqlConnection, table_id: usize) -> WarrenResult<()> {
        let table = &self.inner.tables[table_id];
        for operation in TRIGGER_OPERATIONS {
            conn.execute_batch(&format!(
                "CREATE TEMP TRIGGER IF NOT EXISTS {} AFTER {} ON {} BEGIN \
                 UPDATE {} SET version = version + 1 WHERE table_id = {}; END",
                quote(&trigger_name(table, operation)),
                operation,
                quote(table),
                MODIFICATION_LOG_TABLE,
                table_id
            ))?;
        }
        log::debug!("Triggers installed for table {}", table);
        Ok(())
    }

    fn remove_triggers(&self, conn: &dyn SqlConnection, table_id: usize) -> WarrenResult<()> {
        let table = &self.inner.tables[table_id];
        for operation in TRIGGER_OPERATIONS {
            conn.execute_batch(&format!(
                "DROP TRIGGER IF EXISTS {}",
                quote(&trigger_name(table, operation))
            ))?;
        }
        log::debug!("Triggers removed for table {}", table);
        Ok(())
    }

    fn table_id(&self, table: &str) -> Option<usize> {
        self.inner.table_ids.get(&table.to_lowercase()).copied()
    }

    #[cfg(test)]
    fn known_version(&self, table: &str) -> Option<i64> {
        use crate::common::ReadExecutor;
        let id = self.table_id(table)?;
        self.inner.versions.read_with(|known| known.get(id).copied())
    }
}

fn publish(event_bus: &WarrenEventBus<InvalidationInfo, ObserverListener>, info: InvalidationInfo) {
    if let Err(e) = event_bus.publish(info) {
        log::warn!("Failed to deliver invalidation: {}", e);
    }
}

fn trigger_name(table: &str, operation: &str) -> String {
    format!("{}_{}_{}", TRIGGER_NAME_PREFIX, table, operation)
}

fn quote(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}
