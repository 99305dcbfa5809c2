use crate::common::TaskExecutor;
use crate::errors::{ErrorKind, WarrenError, WarrenResult};
use std::sync::Arc;

const MAIN_THREAD_ACCESS_MESSAGE: &str = "Cannot access database on the main thread since it may \
     potentially lock the UI for a long period of time.";

/// Rejects storage access from the restricted execution context.
///
/// Asks the task executor whether the caller is on its main thread, unless
/// the database was built with `allow_main_thread_queries`.
#[derive(Clone)]
pub struct ThreadAffinityGuard {
    executor: Arc<dyn TaskExecutor>,
    allow_main_thread_queries: bool,
}

impl ThreadAffinityGuard {
    pub fn new(executor: Arc<dyn TaskExecutor>, allow_main_thread_queries: bool) -> Self {
        ThreadAffinityGuard {
            executor,
            allow_main_thread_queries,
        }
    }

    pub fn assert_allowed_context(&self) -> WarrenResult<()> {
        if self.allow_main_thread_queries {
            return Ok(());
        }

        if self.executor.is_main_thread() {
            log::error!("{}", MAIN_THREAD_ACCESS_MESSAGE);
            return Err(WarrenError::new(
                MAIN_THREAD_ACCESS_MESSAGE,
                ErrorKind::IllegalContext,
            ));
        }
        Ok(())
    }

    pub fn allows_main_thread_queries(&self) -> bool {
        self.allow_main_thread_queries
    }
}
