use crate::errors::WarrenResult;
use basu::error::BasuError;
use basu::event::Event;
use basu::Handle;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Tables whose committed contents changed since the previous refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationInfo {
    tables: BTreeSet<String>,
}

impl InvalidationInfo {
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InvalidationInfo {
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tables(&self) -> &BTreeSet<String> {
        &self.tables
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Where observer callbacks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObserverDelivery {
    /// On the worker that ran the refresh pass
    #[default]
    Background,
    /// Posted to the executor's main thread
    MainThread,
}

/// Identifies a registered observer; pass it back to unregister.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObserverHandle {
    id: String,
}

impl ObserverHandle {
    pub(crate) fn new() -> Self {
        ObserverHandle {
            id: Uuid::new_v4().to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Callback invoked with the observed tables that changed.
pub trait InvalidationCallback: Fn(InvalidationInfo) -> WarrenResult<()> + Send + Sync {}

impl<F> InvalidationCallback for F where F: Fn(InvalidationInfo) -> WarrenResult<()> + Send + Sync {}

/// Event bus listener wrapping one observer's callback.
///
/// Every refresh pass publishes a single [`InvalidationInfo`] to all
/// listeners. A listener narrows it down to its own tables and stays silent
/// when none of them changed.
#[derive(Clone)]
pub struct ObserverListener {
    tables: Arc<BTreeSet<String>>,
    on_invalidated: Arc<dyn InvalidationCallback>,
}

impl ObserverListener {
    pub fn new<F>(tables: BTreeSet<String>, on_invalidated: F) -> Self
    where
        F: Fn(InvalidationInfo) -> WarrenResult<()> + Send + Sync + 'static,
    {
        ObserverListener {
            tables: Arc::new(tables),
            on_invalidated: Arc::new(on_invalidated),
        }
    }

    pub(crate) fn from_callback(
        tables: BTreeSet<String>,
        on_invalidated: Arc<dyn InvalidationCallback>,
    ) -> Self {
        ObserverListener {
            tables: Arc::new(tables),
            on_invalidated,
        }
    }

    /// The observed subset of `info`, if any.
    fn relevant(&self, info: &InvalidationInfo) -> Option<InvalidationInfo> {
        let tables: BTreeSet<String> = info.tables.intersection(&self.tables).cloned().collect();
        if tables.is_empty() {
            None
        } else {
            Some(InvalidationInfo { tables })
        }
    }
}

impl Handle<InvalidationInfo> for ObserverListener {
    fn handle(&self, event: &Event<InvalidationInfo>) -> Result<(), BasuError> {
        if let Some(info) = self.relevant(&event.data) {
            // the remaining listeners still run
            if let Err(e) = (self.on_invalidated)(info) {
                log::error!("Invalidation observer failed: {}", e);
            }
        }
        Ok(())
    }
}

impl Debug for ObserverListener {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverListener")
            .field("tables", &self.tables)
            .finish()
    }
}
