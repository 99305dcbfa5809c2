use crate::errors::WarrenResult;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// A unit of work handed to a [`TaskExecutor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Dispatch capability consumed by the database.
///
/// The database never spawns threads on its own. Background refreshes go
/// through [`execute_on_disk_io`](TaskExecutor::execute_on_disk_io), main-thread
/// observer delivery through
/// [`post_to_main_thread`](TaskExecutor::post_to_main_thread), and the
/// thread-affinity guard asks [`is_main_thread`](TaskExecutor::is_main_thread)
/// whether the caller sits on the restricted context.
///
/// Applications with their own UI loop implement this trait; tests inject
/// [`InstantTaskExecutor`].
pub trait TaskExecutor: Send + Sync {
    /// Runs `task` on a context where blocking storage I/O is allowed.
    ///
    /// Fails when the task could not be scheduled; it will never run then.
    fn execute_on_disk_io(&self, task: Task) -> WarrenResult<()>;

    /// Runs `task` on the restricted context.
    fn post_to_main_thread(&self, task: Task);

    /// Returns true when the calling thread is the restricted context.
    fn is_main_thread(&self) -> bool;
}

/// Spawns a named worker thread for `op`.
pub fn async_task<OP>(name: &str, op: OP) -> WarrenResult<()>
where
    OP: FnOnce() + Send + 'static,
{
    match thread::Builder::new().name(name.to_string()).spawn(op) {
        Ok(_) => Ok(()),
        Err(e) => {
            log::error!("Failed to spawn {} thread: {}", name, e);
            Err(e.into())
        }
    }
}

/// Executor used when the builder is not given one.
///
/// Disk I/O work runs on short-lived worker threads. A dedicated delivery
/// thread plays the restricted "main" context: tasks posted to it run there
/// in order, and [`is_main_thread`](TaskExecutor::is_main_thread) is true only
/// on it.
pub struct DefaultTaskExecutor {
    main_sender: Mutex<Sender<Task>>,
    main_thread_id: ThreadId,
}

impl DefaultTaskExecutor {
    pub fn new() -> WarrenResult<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let handle = thread::Builder::new()
            .name("warren-main".to_string())
            .spawn(move || {
                // exits once every sender is dropped
                for task in receiver {
                    task();
                }
            })?;

        Ok(DefaultTaskExecutor {
            main_sender: Mutex::new(sender),
            main_thread_id: handle.thread().id(),
        })
    }
}

impl TaskExecutor for DefaultTaskExecutor {
    fn execute_on_disk_io(&self, task: Task) -> WarrenResult<()> {
        async_task("warren-io", task)
    }

    fn post_to_main_thread(&self, task: Task) {
        if self.main_sender.lock().send(task).is_err() {
            log::error!("Main thread loop has stopped, dropping posted task");
        }
    }

    fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread_id
    }
}

/// Deterministic executor that runs every task inline on the caller.
///
/// Whether the caller counts as the restricted context is a switch, so tests
/// can exercise the thread-affinity guard without a real UI thread.
#[derive(Clone, Default)]
pub struct InstantTaskExecutor {
    main_thread: Arc<AtomicBool>,
}

impl InstantTaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent caller look like the restricted context.
    pub fn set_main_thread(&self, main_thread: bool) {
        self.main_thread.store(main_thread, Ordering::SeqCst);
    }
}

impl TaskExecutor for InstantTaskExecutor {
    fn execute_on_disk_io(&self, task: Task) -> WarrenResult<()> {
        task();
        Ok(())
    }

    fn post_to_main_thread(&self, task: Task) {
        task();
    }

    fn is_main_thread(&self) -> bool {
        self.main_thread.load(Ordering::SeqCst)
    }
}
