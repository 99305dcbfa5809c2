use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use warren::common::{Task, TaskExecutor};
use warren::errors::{ErrorKind, WarrenError, WarrenResult};
use warren::invalidation::{InvalidationInfo, ObserverDelivery};
use warren_int_test::test_util::{
    cleanup, create_instant_test_context, create_test_context, random_path, run_test,
    test_builder, TestContext,
};

type Seen = Arc<Mutex<Vec<InvalidationInfo>>>;

fn recorder(seen: &Seen) -> impl Fn(InvalidationInfo) -> WarrenResult<()> + Send + Sync + 'static {
    let seen = seen.clone();
    move |info| {
        seen.lock().unwrap().push(info);
        Ok(())
    }
}

/// Holds disk I/O tasks until the test runs them.
#[derive(Default)]
struct QueuedTaskExecutor {
    queue: Mutex<Vec<Task>>,
}

impl QueuedTaskExecutor {
    fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn run_queued(&self) {
        let tasks: Vec<Task> = self.queue.lock().unwrap().drain(..).collect();
        for task in tasks {
            task();
        }
    }
}

impl TaskExecutor for QueuedTaskExecutor {
    fn execute_on_disk_io(&self, task: Task) -> WarrenResult<()> {
        self.queue.lock().unwrap().push(task);
        Ok(())
    }

    fn post_to_main_thread(&self, task: Task) {
        task();
    }

    fn is_main_thread(&self) -> bool {
        false
    }
}

fn queued_context(executor: Arc<QueuedTaskExecutor>) -> WarrenResult<TestContext> {
    let path = random_path();
    let db = test_builder(&path).task_executor(executor.clone()).build()?;
    db.migrate(1)?;
    // the refresh requested by the migration
    executor.run_queued();
    Ok(TestContext::new(path, db))
}

fn main_thread_context() -> WarrenResult<TestContext> {
    let path = random_path();
    let db = test_builder(&path)
        .observer_delivery(ObserverDelivery::MainThread)
        .build()?;
    db.migrate(1)?;
    Ok(TestContext::new(path, db))
}

#[test]
fn test_committed_write_notifies_observer() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let seen: Seen = Arc::new(Mutex::new(Vec::new()));
            db.register_observer(&["users"], recorder(&seen))?;

            db.execute("INSERT INTO users (name) VALUES ('alice')", &[])?;

            awaitility::at_most(Duration::from_secs(5)).until(|| !seen.lock().unwrap().is_empty());
            let first = seen.lock().unwrap()[0].clone();
            assert!(first.contains("users"));
            assert!(!first.contains("orders"));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_quick_commits_coalesce() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let seen: Seen = Arc::new(Mutex::new(Vec::new()));
            db.register_observer(&["users"], recorder(&seen))?;

            db.execute("INSERT INTO users (name) VALUES ('alice')", &[])?;
            db.execute("INSERT INTO users (name) VALUES ('bob')", &[])?;

            awaitility::at_most(Duration::from_secs(5)).until(|| !seen.lock().unwrap().is_empty());
            // give a second pass the chance to land
            thread::sleep(Duration::from_millis(200));

            let seen = seen.lock().unwrap();
            assert!(!seen.is_empty() && seen.len() <= 2);
            assert!(seen.iter().all(|info| info.contains("users")));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_pending_refresh_serves_every_commit_before_it_runs() {
    let executor = AssertUnwindSafe(Arc::new(QueuedTaskExecutor::default()));
    run_test(
        || queued_context(executor.0.clone()),
        |ctx| {
            let db = ctx.db();
            let seen: Seen = Arc::new(Mutex::new(Vec::new()));
            db.register_observer(&["users", "orders"], recorder(&seen))?;

            db.execute("INSERT INTO users (name) VALUES ('alice')", &[])?;
            db.execute("INSERT INTO orders (user_id, total) VALUES (1, 9.5)", &[])?;
            assert_eq!(executor.queued(), 1);
            assert!(seen.lock().unwrap().is_empty());

            executor.run_queued();
            {
                let seen = seen.lock().unwrap();
                assert_eq!(seen.len(), 1);
                assert!(seen[0].contains("users") && seen[0].contains("orders"));
            }

            // the pass is done, the next commit schedules a new one
            db.execute("INSERT INTO users (name) VALUES ('bob')", &[])?;
            assert_eq!(executor.queued(), 1);
            executor.run_queued();
            assert_eq!(seen.lock().unwrap().len(), 2);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_rolled_back_write_is_not_reported() {
    run_test(
        create_instant_test_context,
        |ctx| {
            let db = ctx.db();
            let users: Seen = Arc::new(Mutex::new(Vec::new()));
            let orders: Seen = Arc::new(Mutex::new(Vec::new()));
            db.register_observer(&["users"], recorder(&users))?;
            db.register_observer(&["orders"], recorder(&orders))?;

            {
                let txn = db.begin_transaction()?;
                txn.execute("INSERT INTO users (name) VALUES ('alice')", &[])?;
            }
            // sentinel write, delivered inline by the instant executor
            db.execute("INSERT INTO orders (user_id, total) VALUES (1, 3.0)", &[])?;

            assert_eq!(orders.lock().unwrap().len(), 1);
            assert!(users.lock().unwrap().is_empty());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_one_transaction_reports_all_written_tables_once() {
    run_test(
        create_instant_test_context,
        |ctx| {
            let db = ctx.db();
            let seen: Seen = Arc::new(Mutex::new(Vec::new()));
            db.register_observer(&["users", "orders", "items"], recorder(&seen))?;

            db.run_in_transaction(|txn| {
                txn.execute("INSERT INTO users (name) VALUES ('alice')", &[])?;
                txn.execute("INSERT INTO orders (user_id, total) VALUES (1, 12.0)", &[])?;
                txn.execute("UPDATE users SET name = 'alicia' WHERE id = 1", &[])?;
                Ok(())
            })?;

            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 1);
            let tables: Vec<&str> = seen[0].tables().iter().map(String::as_str).collect();
            assert_eq!(tables, vec!["orders", "users"]);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_observer_sees_only_its_tables() {
    run_test(
        create_instant_test_context,
        |ctx| {
            let db = ctx.db();
            let items: Seen = Arc::new(Mutex::new(Vec::new()));
            db.register_observer(&["items"], recorder(&items))?;

            db.execute("INSERT INTO users (name) VALUES ('alice')", &[])?;
            assert!(items.lock().unwrap().is_empty());

            db.execute("DELETE FROM items", &[])?;
            // no rows matched, so no trigger fired
            assert!(items.lock().unwrap().is_empty());

            db.execute("INSERT INTO items (order_id, sku) VALUES (1, 'A-1')", &[])?;
            assert_eq!(items.lock().unwrap().len(), 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_main_thread_delivery_runs_on_main_thread() {
    run_test(
        main_thread_context,
        |ctx| {
            let db = ctx.db();
            let threads: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
            let recorded = threads.clone();
            db.register_observer(&["users"], move |_| {
                let name = thread::current().name().map(str::to_string);
                recorded.lock().unwrap().push(name);
                Ok(())
            })?;

            db.execute("INSERT INTO users (name) VALUES ('alice')", &[])?;

            awaitility::at_most(Duration::from_secs(5)).until(|| !threads.lock().unwrap().is_empty());
            assert_eq!(threads.lock().unwrap()[0].as_deref(), Some("warren-main"));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_unregistered_observer_is_silent() {
    run_test(
        create_instant_test_context,
        |ctx| {
            let db = ctx.db();
            let seen: Seen = Arc::new(Mutex::new(Vec::new()));
            let handle = db.register_observer(&["users"], recorder(&seen))?;

            db.execute("INSERT INTO users (name) VALUES ('alice')", &[])?;
            assert_eq!(seen.lock().unwrap().len(), 1);

            assert!(db.unregister_observer(&handle)?);
            assert!(!db.unregister_observer(&handle)?);

            db.execute("INSERT INTO users (name) VALUES ('bob')", &[])?;
            assert_eq!(seen.lock().unwrap().len(), 1);
            assert_eq!(db.invalidation_tracker().observer_count(), 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_failing_observer_does_not_block_others() {
    run_test(
        create_instant_test_context,
        |ctx| {
            let db = ctx.db();
            let seen: Seen = Arc::new(Mutex::new(Vec::new()));
            db.register_observer(&["users"], |_| {
                Err(WarrenError::new("observer gave up", ErrorKind::InternalError))
            })?;
            db.register_observer(&["users"], recorder(&seen))?;

            db.execute("INSERT INTO users (name) VALUES ('alice')", &[])?;

            assert_eq!(seen.lock().unwrap().len(), 1);
            Ok(())
        },
        cleanup,
    )
}
