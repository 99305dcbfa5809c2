use super::{MigrationPath, MigrationPathResolver, MigrationRegistry};
use crate::errors::{ErrorKind, WarrenError, WarrenResult};
use crate::transaction::TransactionCoordinator;
use std::sync::Arc;

/// Outcome of a successful [`MigrationManager::migrate`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    from_version: u32,
    to_version: u32,
    applied: Vec<(u32, u32)>,
}

impl MigrationReport {
    fn new(from_version: u32, to_version: u32, applied: Vec<(u32, u32)>) -> Self {
        MigrationReport {
            from_version,
            to_version,
            applied,
        }
    }

    pub fn from_version(&self) -> u32 {
        self.from_version
    }

    pub fn to_version(&self) -> u32 {
        self.to_version
    }

    /// `(from, to)` pairs of the applied steps, in order.
    pub fn applied(&self) -> &[(u32, u32)] {
        &self.applied
    }

    /// True when the database already was at the requested version.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Moves the persisted schema version to a target version by applying the
/// chain of registered migrations inside one transaction.
#[derive(Clone)]
pub struct MigrationManager {
    coordinator: TransactionCoordinator,
    registry: Arc<MigrationRegistry>,
}

impl MigrationManager {
    pub fn new(coordinator: TransactionCoordinator, registry: Arc<MigrationRegistry>) -> Self {
        MigrationManager {
            coordinator,
            registry,
        }
    }

    pub fn current_version(&self) -> WarrenResult<u32> {
        self.coordinator.with_connection(|conn| conn.user_version())
    }

    /// Resolves the chain from `start` to `end` without applying it.
    pub fn migration_path(&self, start: u32, end: u32) -> WarrenResult<MigrationPath> {
        MigrationPathResolver::resolve(&self.registry, start, end).map_err(WarrenError::from)
    }

    /// Migrates the database to `target`.
    ///
    /// An unreachable target fails before any transaction is opened. A failing
    /// step rolls back every step applied before it and leaves the persisted
    /// version untouched.
    pub fn migrate(&self, target: u32) -> WarrenResult<MigrationReport> {
        let current = self.current_version()?;
        if current == target {
            log::debug!("Schema already at version {}, nothing to migrate", target);
            return Ok(MigrationReport::new(current, target, Vec::new()));
        }

        let path = self.migration_path(current, target).inspect_err(|e| {
            log::error!("{}", e);
        })?;

        self.coordinator.run_in_transaction(|txn| {
            let observed = txn.connection().user_version()?;
            if observed != current {
                log::error!(
                    "Schema version changed from {} to {} while preparing the migration",
                    current,
                    observed
                );
                return Err(WarrenError::new(
                    &format!(
                        "Schema version changed from {} to {} while preparing the migration",
                        current, observed
                    ),
                    ErrorKind::TransactionError,
                ));
            }

            for step in path.iter() {
                let (from, to) = (step.from_version(), step.to_version());
                log::info!("Applying migration {} -> {}", from, to);
                step.apply(txn.connection()).map_err(|cause| {
                    log::error!("Migration {} -> {} failed: {}", from, to, cause);
                    WarrenError::new_with_cause(
                        &format!("Migration {} -> {} failed", from, to),
                        ErrorKind::MigrationFailed { from, to },
                        cause,
                    )
                })?;
            }

            txn.connection().set_user_version(target)?;
            Ok(())
        })?;

        log::info!("Schema migrated from version {} to {}", current, target);
        Ok(MigrationReport::new(current, target, path.hops()))
    }
}
