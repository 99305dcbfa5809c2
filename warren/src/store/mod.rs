//! Boundary to the native SQL engine.
//!
//! The core talks to storage only through [`SqlConnection`], obtained from an
//! [`OpenHelperFactory`]. [`SqliteOpenHelperFactory`] is the default engine.

mod connection;
mod sqlite;

pub use connection::*;
pub use sqlite::{SqliteConnection, SqliteOpenHelperFactory};
