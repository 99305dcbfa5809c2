use crate::common::{DefaultTaskExecutor, TaskExecutor};
use crate::errors::{ErrorKind, WarrenError, WarrenResult};
use crate::invalidation::ObserverDelivery;
use crate::migration::{Migration, MigrationOverride, MigrationRegistry};
use crate::store::{OpenHelperFactory, SqliteOpenHelperFactory};
use crate::warren::Warren;
use crate::warren_config::{WarrenConfig, WarrenConfigInner};
use std::collections::HashSet;
use std::sync::Arc;

/// Builder for a Warren database.
///
/// Options are collected fluently; the first invalid one is remembered and
/// returned from [`build`](WarrenBuilder::build), which is also where the
/// database is opened. `T` is what the database factory turns the opened
/// [`Warren`] into, usually an application type wrapping it.
///
/// # Examples
///
/// ```rust,ignore
/// use warren::warren_builder::WarrenBuilder;
///
/// struct AppDatabase {
///     warren: Warren,
/// }
///
/// let db: AppDatabase = WarrenBuilder::new()
///     .name("/data/app.db")
///     .add_migrations(vec![migration_1_2, migration_2_3])
///     .tracked_tables(&["users", "orders"])
///     .database_factory(|warren| AppDatabase { warren })
///     .build()?;
/// ```
pub struct WarrenBuilder<T> {
    error: Option<WarrenError>,
    name: Option<String>,
    in_memory: bool,
    allow_main_thread_queries: bool,
    migrations: MigrationRegistry,
    migration_overrides: Vec<MigrationOverride>,
    open_helper_factory: Option<Arc<dyn OpenHelperFactory>>,
    task_executor: Option<Arc<dyn TaskExecutor>>,
    tracked_tables: Vec<String>,
    observer_delivery: ObserverDelivery,
    database_factory: Option<Box<dyn FnOnce(Warren) -> T>>,
}

impl<T> Default for WarrenBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WarrenBuilder<T> {
    pub fn new() -> Self {
        WarrenBuilder {
            error: None,
            name: None,
            in_memory: false,
            allow_main_thread_queries: false,
            migrations: MigrationRegistry::new(),
            migration_overrides: Vec::new(),
            open_helper_factory: None,
            task_executor: None,
            tracked_tables: Vec::new(),
            observer_delivery: ObserverDelivery::default(),
            database_factory: None,
        }
    }

    /// Path of the database file.
    pub fn name(mut self, name: &str) -> Self {
        if self.error.is_none() && name.trim().is_empty() {
            self.error = Some(configuration_error("Database name cannot be empty"));
        }
        self.name = Some(name.to_string());
        self
    }

    /// Keeps the database in memory; it disappears when closed.
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    pub fn allow_main_thread_queries(mut self) -> Self {
        self.allow_main_thread_queries = true;
        self
    }

    /// Turns the opened [`Warren`] into the value `build` returns.
    pub fn database_factory<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(Warren) -> T + 'static,
    {
        self.database_factory = Some(Box::new(factory));
        self
    }

    pub fn add_migration(mut self, migration: Migration) -> Self {
        if self.error.is_none() {
            if migration.from_version() == migration.to_version() {
                self.error = Some(configuration_error(&format!(
                    "Migration {} -> {} does not change the version",
                    migration.from_version(),
                    migration.to_version()
                )));
                return self;
            }

            if let Some(replaced) = self.migrations.add_migration(migration) {
                log::warn!(
                    "Overriding migration {} -> {} with a newer one",
                    replaced.from_version,
                    replaced.to_version
                );
                self.migration_overrides.push(replaced);
            }
        }
        self
    }

    /// Adds migrations in order; a later migration with the same versions
    /// replaces an earlier one.
    pub fn add_migrations(self, migrations: Vec<Migration>) -> Self {
        migrations
            .into_iter()
            .fold(self, |builder, migration| builder.add_migration(migration))
    }

    pub fn open_helper_factory(mut self, factory: Arc<dyn OpenHelperFactory>) -> Self {
        self.open_helper_factory = Some(factory);
        self
    }

    pub fn task_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.task_executor = Some(executor);
        self
    }

    /// Tables observers may watch. A table's position is its id in the
    /// modification log.
    pub fn tracked_tables(mut self, tables: &[&str]) -> Self {
        if self.error.is_none() {
            let mut seen: HashSet<String> = self
                .tracked_tables
                .iter()
                .map(|t| t.to_lowercase())
                .collect();

            for table in tables {
                if table.trim().is_empty() {
                    self.error = Some(configuration_error("Tracked table name cannot be empty"));
                    return self;
                }
                if !seen.insert(table.to_lowercase()) {
                    self.error = Some(configuration_error(&format!(
                        "Table {} is tracked more than once",
                        table
                    )));
                    return self;
                }
                self.tracked_tables.push(table.to_string());
            }
        }
        self
    }

    pub fn observer_delivery(mut self, delivery: ObserverDelivery) -> Self {
        self.observer_delivery = delivery;
        self
    }

    /// Validates the options, opens the database and hands it to the
    /// database factory.
    pub fn build(self) -> WarrenResult<T> {
        if let Some(error) = self.error {
            return Err(error);
        }

        if self.name.is_none() && !self.in_memory {
            return Err(configuration_error(
                "Cannot build a database without a name, use in_memory() for a temporary one",
            ));
        }

        let database_factory = match self.database_factory {
            Some(factory) => factory,
            None => {
                return Err(configuration_error(
                    "Cannot build a database without a database factory",
                ))
            }
        };

        let task_executor: Arc<dyn TaskExecutor> = match self.task_executor {
            Some(executor) => executor,
            None => Arc::new(DefaultTaskExecutor::new()?),
        };
        let open_helper_factory = self
            .open_helper_factory
            .unwrap_or_else(|| Arc::new(SqliteOpenHelperFactory));

        let config = WarrenConfig::new(WarrenConfigInner {
            name: if self.in_memory { None } else { self.name },
            in_memory: self.in_memory,
            allow_main_thread_queries: self.allow_main_thread_queries,
            migrations: Arc::new(self.migrations),
            migration_overrides: self.migration_overrides,
            open_helper_factory,
            task_executor,
            tracked_tables: self.tracked_tables,
            observer_delivery: self.observer_delivery,
        });

        let warren = Warren::open(config)?;
        Ok(database_factory(warren))
    }
}

fn configuration_error(message: &str) -> WarrenError {
    log::error!("{}", message);
    WarrenError::new(message, ErrorKind::ConfigurationError)
}
