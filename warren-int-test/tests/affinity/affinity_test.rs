use std::panic::AssertUnwindSafe;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use warren::common::{DefaultTaskExecutor, TaskExecutor};
use warren::errors::{ErrorKind, WarrenResult};
use warren_int_test::test_util::{
    cleanup, count_rows, random_path, run_test, test_builder, TestContext,
};

/// Default executor, shareable with the test closures.
fn main_executor() -> AssertUnwindSafe<Arc<dyn TaskExecutor>> {
    let executor: Arc<dyn TaskExecutor> = Arc::new(DefaultTaskExecutor::new().unwrap());
    AssertUnwindSafe(executor)
}

fn context_with_executor(
    executor: Arc<dyn TaskExecutor>,
    allow_main_thread_queries: bool,
) -> WarrenResult<TestContext> {
    let path = random_path();
    let mut builder = test_builder(&path).task_executor(executor);
    if allow_main_thread_queries {
        builder = builder.allow_main_thread_queries();
    }
    let db = builder.build()?;
    db.migrate(1)?;
    Ok(TestContext::new(path, db))
}

/// Runs a count query on the executor's main thread and returns its outcome.
fn query_on_main_thread(ctx: &TestContext, executor: &Arc<dyn TaskExecutor>) -> WarrenResult<i64> {
    let (sender, receiver) = mpsc::channel();
    let db = ctx.db();
    executor.post_to_main_thread(Box::new(move || {
        let result = db
            .query("SELECT COUNT(*) AS total FROM users", &[])
            .map(|rows| rows.value(0, "total").and_then(|v| v.as_i64()).unwrap_or_default());
        let _ = sender.send(result);
    }));

    receiver
        .recv_timeout(Duration::from_secs(5))
        .unwrap_or_else(|_| panic!("main thread did not answer"))
}

#[test]
fn test_main_thread_query_is_rejected() {
    let executor = main_executor();
    run_test(
        || context_with_executor(executor.clone(), false),
        |ctx| {
            let err = query_on_main_thread(&ctx, &executor).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::IllegalContext);
            assert!(err.message().contains("main thread"));

            // the same query off the main thread is fine
            assert_eq!(
                ctx.db()
                    .query("SELECT COUNT(*) AS total FROM users", &[])?
                    .len(),
                1
            );
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_main_thread_write_is_rejected_before_touching_storage() {
    let executor = main_executor();
    run_test(
        || context_with_executor(executor.clone(), false),
        |ctx| {
            let (sender, receiver) = mpsc::channel();
            let db = ctx.db();
            executor.post_to_main_thread(Box::new(move || {
                let result = db.execute("INSERT INTO users (name) VALUES ('alice')", &[]);
                let _ = sender.send(result.map(|_| ()));
            }));

            let result = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(result.unwrap_err().kind(), &ErrorKind::IllegalContext);
            assert!(!ctx.db().in_transaction());
            assert_eq!(count_rows(&ctx.db(), "users")?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_main_thread_query_allowed_when_opted_in() {
    let executor = main_executor();
    run_test(
        || context_with_executor(executor.clone(), true),
        |ctx| {
            ctx.db()
                .execute("INSERT INTO users (name) VALUES ('alice')", &[])?;
            assert_eq!(query_on_main_thread(&ctx, &executor)?, 1);
            Ok(())
        },
        cleanup,
    )
}
