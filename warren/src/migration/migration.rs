use crate::errors::WarrenResult;
use crate::store::SqlConnection;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Signature of a migration body.
pub trait MigrationFn: Fn(&dyn SqlConnection) -> WarrenResult<()> + Send + Sync {}

impl<F> MigrationFn for F where F: Fn(&dyn SqlConnection) -> WarrenResult<()> + Send + Sync {}

/// One executable schema step from `from_version` to `to_version`.
///
/// A migration may span several versions (3 -> 5) and may point backwards
/// (5 -> 3). Its body receives the native connection while the database holds
/// the migration transaction open, so every statement it runs commits or rolls
/// back together with the rest of the chain.
///
/// Cloning is cheap; clones share the same body.
///
/// # Examples
///
/// ```rust,ignore
/// use warren::migration::Migration;
///
/// let migration = Migration::new(1, 2, |conn| {
///     conn.execute_batch("ALTER TABLE users ADD COLUMN email TEXT")
/// });
/// ```
#[derive(Clone)]
pub struct Migration {
    inner: Arc<MigrationInner>,
}

struct MigrationInner {
    from_version: u32,
    to_version: u32,
    apply: Box<dyn MigrationFn>,
}

impl Migration {
    pub fn new<F>(from_version: u32, to_version: u32, apply: F) -> Self
    where
        F: Fn(&dyn SqlConnection) -> WarrenResult<()> + Send + Sync + 'static,
    {
        Migration {
            inner: Arc::new(MigrationInner {
                from_version,
                to_version,
                apply: Box::new(apply),
            }),
        }
    }

    pub fn from_version(&self) -> u32 {
        self.inner.from_version
    }

    pub fn to_version(&self) -> u32 {
        self.inner.to_version
    }

    /// Runs the migration body against `connection`.
    pub fn apply(&self, connection: &dyn SqlConnection) -> WarrenResult<()> {
        (self.inner.apply)(connection)
    }

    /// Returns true when both handles share the same body.
    pub fn same_as(&self, other: &Migration) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for Migration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("from_version", &self.inner.from_version)
            .field("to_version", &self.inner.to_version)
            .finish()
    }
}
