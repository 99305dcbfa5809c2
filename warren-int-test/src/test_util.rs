use std::backtrace::Backtrace;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{env, fs, thread};
use warren::common::{InstantTaskExecutor, TaskExecutor};
use warren::errors::WarrenResult;
use warren::migration::Migration;
use warren::store::SqlValue;
use warren::warren::Warren;
use warren::warren_builder::WarrenBuilder;

/// Tables every test database tracks.
pub const TRACKED_TABLES: [&str; 3] = ["users", "orders", "items"];

/// Runs a test with retry logic and error handling.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> WarrenResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> WarrenResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> WarrenResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    const MAX_RETRIES: u32 = 3;
    let mut last_error: Option<String> = None;
    let mut last_backtrace: Option<String> = None;

    for attempt in 1..=MAX_RETRIES {
        let start_time = Instant::now();

        let result = std::panic::catch_unwind(|| {
            let backtrace = Backtrace::capture();
            match before() {
                Ok(ctx) => match test(ctx.clone()) {
                    Ok(_) => match after(ctx) {
                        Ok(_) => Ok(()),
                        Err(e) => Err((format!("After run failed: {:?}", e), backtrace.to_string())),
                    },
                    Err(e) => {
                        let _ = after(ctx);
                        Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                    }
                },
                Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
            }
        });

        let elapsed = start_time.elapsed();

        match result {
            Ok(Ok(_)) => return,
            Ok(Err((e, bt))) => {
                last_error = Some(e.clone());
                last_backtrace = Some(bt);
                if attempt < MAX_RETRIES {
                    eprintln!(
                        "\n========== Test Attempt {}/{} Failed (took {:?}) ==========",
                        attempt, MAX_RETRIES, elapsed
                    );
                    eprintln!("Error: {}", e);
                    thread::sleep(Duration::from_millis(100 * attempt as u64));
                }
            }
            Err(panic_err) => {
                let err_msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_err.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                last_error = Some(format!("Panic: {}", err_msg));
                last_backtrace = Some(Backtrace::capture().to_string());

                if attempt < MAX_RETRIES {
                    eprintln!(
                        "\n========== Test Attempt {}/{} Panicked (took {:?}) ==========",
                        attempt, MAX_RETRIES, elapsed
                    );
                    eprintln!("{}", err_msg);
                    thread::sleep(Duration::from_millis(100 * attempt as u64));
                }
            }
        }
    }

    eprintln!("\n==================== TEST FAILED ====================");
    eprintln!("Failed after {} attempts", MAX_RETRIES);
    eprintln!("Last error: {}", last_error.as_deref().unwrap_or("Unknown"));
    if let Some(bt) = &last_backtrace {
        if !bt.is_empty() && !bt.contains("disabled") {
            eprintln!("\nBacktrace:\n{}", bt);
        }
    }
    eprintln!("=====================================================\n");

    panic!(
        "Test failed after {} attempts. Last error: {}",
        MAX_RETRIES,
        last_error.unwrap_or_default()
    );
}

#[derive(Clone)]
pub struct TestContext {
    path: String,
    db: Warren,
}

impl TestContext {
    pub fn new(path: String, db: Warren) -> Self {
        Self { path, db }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn db(&self) -> Warren {
        self.db.clone()
    }
}

pub fn random_path() -> String {
    let id = uuid::Uuid::new_v4();
    env::temp_dir()
        .join(format!("{}.db", id))
        .to_string_lossy()
        .into_owned()
}

/// Migration creating the schema every test starts from.
pub fn schema_migration() -> Migration {
    Migration::new(0, 1, |conn| {
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL); \
             CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER, total REAL); \
             CREATE TABLE items (id INTEGER PRIMARY KEY, order_id INTEGER, sku TEXT);",
        )
    })
}

/// Builder for a file database at `path` with the tracked test tables.
pub fn test_builder(path: &str) -> WarrenBuilder<Warren> {
    Warren::builder()
        .name(path)
        .tracked_tables(&TRACKED_TABLES)
        .add_migration(schema_migration())
}

/// File database with the default executor, migrated to version 1.
pub fn create_test_context() -> WarrenResult<TestContext> {
    let path = random_path();
    let db = test_builder(&path).build()?;
    db.migrate(1)?;
    Ok(TestContext::new(path, db))
}

/// File database that runs background work inline, migrated to version 1.
pub fn create_instant_test_context() -> WarrenResult<TestContext> {
    let path = random_path();
    let executor: Arc<dyn TaskExecutor> = Arc::new(InstantTaskExecutor::new());
    let db = test_builder(&path).task_executor(executor).build()?;
    db.migrate(1)?;
    Ok(TestContext::new(path, db))
}

/// File database at version 0 with `migrations` registered.
pub fn create_unmigrated_context(migrations: Vec<Migration>) -> WarrenResult<TestContext> {
    let path = random_path();
    let db = Warren::builder()
        .name(&path)
        .add_migrations(migrations)
        .build()?;
    Ok(TestContext::new(path, db))
}

pub fn cleanup(ctx: TestContext) -> WarrenResult<()> {
    if let Err(e) = ctx.db().close() {
        eprintln!("Warning: Failed to close database: {:?}", e);
    }

    for suffix in ["", "-wal", "-shm", "-journal"] {
        let file = format!("{}{}", ctx.path(), suffix);
        match fs::remove_file(&file) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => eprintln!("Warning: Failed to remove {}: {:?}", file, e),
        }
    }
    Ok(())
}

pub fn count_rows(db: &Warren, table: &str) -> WarrenResult<i64> {
    let result = db.query(&format!("SELECT COUNT(*) AS total FROM {}", table), &[])?;
    Ok(result
        .value(0, "total")
        .and_then(SqlValue::as_i64)
        .unwrap_or_default())
}

pub fn table_exists(db: &Warren, table: &str) -> WarrenResult<bool> {
    let result = db.query(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
        &[table.into()],
    )?;
    Ok(!result.is_empty())
}
