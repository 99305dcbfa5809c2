//! # Warren - Embedded SQL Persistence Core
//!
//! Warren wraps a single native SQL connection and adds the plumbing an
//! application database needs around it:
//!
//! - **Migrations**: a sparse graph of versioned migrations, walked greedily
//!   from the persisted version to the requested one and applied atomically
//! - **Transactions**: re-entrant, nesting-aware transaction guards over the
//!   one connection
//! - **Main-thread protection**: storage access from the restricted context
//!   fails fast unless explicitly allowed
//! - **Invalidation**: observers are told which tables changed after the
//!   transactions that changed them commit
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use warren::migration::Migration;
//! use warren::warren::Warren;
//!
//! let db = Warren::builder()
//!     .name("/data/app.db")
//!     .tracked_tables(&["users"])
//!     .add_migrations(vec![Migration::new(0, 1, |conn| {
//!         conn.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")
//!     })])
//!     .build()?;
//!
//! db.migrate(1)?;
//! db.register_observer(&["users"], |info| {
//!     println!("invalidated: {:?}", info.tables());
//!     Ok(())
//! })?;
//! db.execute("INSERT INTO users (name) VALUES (?)", &["alice".into()])?;
//! ```
//!
//! ## Module Organization
//!
//! - [`affinity`] - Main-thread access guard
//! - [`common`] - Event bus, task executors, constants and shared utilities
//! - [`errors`] - Error types and result definitions
//! - [`invalidation`] - Table invalidation tracking and observers
//! - [`migration`] - Migrations, path resolution and application
//! - [`store`] - Native connection boundary and the SQLite engine
//! - [`transaction`] - Transaction coordination
//! - [`warren`] - Core database interface
//! - [`warren_builder`] - Database builder
//! - [`warren_config`] - Database configuration

use crate::common::*;

pub mod affinity;
pub mod common;
pub mod errors;
pub mod invalidation;
pub mod migration;
pub mod store;
pub mod transaction;
pub mod warren;
pub mod warren_builder;
pub mod warren_config;
