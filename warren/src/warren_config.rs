//! Configuration of a built Warren database.

use crate::common::TaskExecutor;
use crate::invalidation::ObserverDelivery;
use crate::migration::{MigrationOverride, MigrationRegistry};
use crate::store::{OpenConfig, OpenHelperFactory};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Immutable settings a [`Warren`](crate::warren::Warren) was built with.
///
/// Produced by [`WarrenBuilder`](crate::warren_builder::WarrenBuilder). Cloning
/// is cheap; clones share the same settings.
#[derive(Clone)]
pub struct WarrenConfig {
    inner: Arc<WarrenConfigInner>,
}

pub(crate) struct WarrenConfigInner {
    pub(crate) name: Option<String>,
    pub(crate) in_memory: bool,
    pub(crate) allow_main_thread_queries: bool,
    pub(crate) migrations: Arc<MigrationRegistry>,
    pub(crate) migration_overrides: Vec<MigrationOverride>,
    pub(crate) open_helper_factory: Arc<dyn OpenHelperFactory>,
    pub(crate) task_executor: Arc<dyn TaskExecutor>,
    pub(crate) tracked_tables: Vec<String>,
    pub(crate) observer_delivery: ObserverDelivery,
}

impl WarrenConfig {
    pub(crate) fn new(inner: WarrenConfigInner) -> Self {
        WarrenConfig {
            inner: Arc::new(inner),
        }
    }

    /// Database file path; `None` for in-memory databases.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn in_memory(&self) -> bool {
        self.inner.in_memory
    }

    pub fn allow_main_thread_queries(&self) -> bool {
        self.inner.allow_main_thread_queries
    }

    pub fn migrations(&self) -> &Arc<MigrationRegistry> {
        &self.inner.migrations
    }

    /// Migrations that replaced an earlier one with the same versions.
    pub fn migration_overrides(&self) -> &[MigrationOverride] {
        &self.inner.migration_overrides
    }

    pub fn open_helper_factory(&self) -> &Arc<dyn OpenHelperFactory> {
        &self.inner.open_helper_factory
    }

    pub fn task_executor(&self) -> &Arc<dyn TaskExecutor> {
        &self.inner.task_executor
    }

    pub fn tracked_tables(&self) -> &[String] {
        &self.inner.tracked_tables
    }

    pub fn observer_delivery(&self) -> ObserverDelivery {
        self.inner.observer_delivery
    }

    pub(crate) fn open_config(&self) -> OpenConfig {
        if self.inner.in_memory {
            OpenConfig::new(None, true)
        } else {
            OpenConfig::new(self.inner.name.clone(), false)
        }
    }
}

impl Debug for WarrenConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarrenConfig")
            .field("name", &self.inner.name)
            .field("in_memory", &self.inner.in_memory)
            .field("allow_main_thread_queries", &self.inner.allow_main_thread_queries)
            .field("migrations", &self.inner.migrations.len())
            .field("tracked_tables", &self.inner.tracked_tables)
            .field("observer_delivery", &self.inner.observer_delivery)
            .finish()
    }
}
