//! Schema migrations.
//!
//! A [`Migration`] moves the schema from one version to another. The
//! [`MigrationRegistry`] indexes them, the [`MigrationPathResolver`] picks a
//! chain between two versions and the [`MigrationManager`] applies that chain
//! atomically.

mod manager;
#[allow(clippy::module_inception)]
mod migration;
mod registry;
mod resolver;

pub use manager::*;
pub use migration::*;
pub use registry::*;
pub use resolver::*;
