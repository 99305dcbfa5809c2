use std::sync::{Arc, Mutex};
use warren::errors::{ErrorKind, WarrenError};
use warren::migration::Migration;
use warren::store::SqlConnection;
use warren_int_test::test_util::{
    cleanup, count_rows, create_unmigrated_context, random_path, run_test, schema_migration,
    table_exists, test_builder,
};

fn recording(from: u32, to: u32, applied: &Arc<Mutex<Vec<(u32, u32)>>>) -> Migration {
    let applied = applied.clone();
    Migration::new(from, to, move |_: &dyn SqlConnection| {
        applied.lock().unwrap().push((from, to));
        Ok(())
    })
}

#[test]
fn test_migrate_creates_schema_and_records_version() {
    run_test(
        || {
            create_unmigrated_context(vec![
                schema_migration(),
                Migration::new(1, 2, |conn| {
                    conn.execute_batch("ALTER TABLE users ADD COLUMN email TEXT")
                }),
            ])
        },
        |ctx| {
            let db = ctx.db();
            assert_eq!(db.version()?, 0);

            let report = db.migrate(2)?;

            assert_eq!(report.applied(), &[(0, 1), (1, 2)]);
            assert_eq!(db.version()?, 2);
            assert!(table_exists(&db, "users")?);
            db.execute(
                "INSERT INTO users (name, email) VALUES (?, ?)",
                &["alice".into(), "alice@example.com".into()],
            )?;
            assert_eq!(count_rows(&db, "users")?, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_version_survives_reopen() {
    let path = random_path();
    {
        let db = test_builder(&path).build().unwrap();
        db.migrate(1).unwrap();
        db.execute("INSERT INTO users (name) VALUES ('alice')", &[]).unwrap();
        db.close().unwrap();
    }

    let db = test_builder(&path).build().unwrap();
    assert_eq!(db.version().unwrap(), 1);
    // already there, nothing runs
    assert!(db.migrate(1).unwrap().is_noop());
    assert_eq!(count_rows(&db, "users").unwrap(), 1);

    let ctx = warren_int_test::test_util::TestContext::new(path, db);
    cleanup(ctx).unwrap();
}

#[test]
fn test_greedy_path_prefers_direct_hop() {
    let applied = Arc::new(Mutex::new(Vec::new()));

    run_test(
        || {
            create_unmigrated_context(vec![
                recording(0, 1, &applied),
                recording(1, 2, &applied),
                recording(2, 3, &applied),
                recording(1, 3, &applied),
                recording(3, 4, &applied),
            ])
        },
        |ctx| {
            applied.lock().unwrap().clear();
            let report = ctx.db().migrate(4)?;

            assert_eq!(report.applied(), &[(0, 1), (1, 3), (3, 4)]);
            assert_eq!(*applied.lock().unwrap(), vec![(0, 1), (1, 3), (3, 4)]);
            assert_eq!(ctx.db().version()?, 4);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_downgrade_walks_backwards() {
    let applied = Arc::new(Mutex::new(Vec::new()));

    run_test(
        || {
            create_unmigrated_context(vec![
                recording(0, 5, &applied),
                recording(5, 4, &applied),
                recording(4, 3, &applied),
                recording(5, 3, &applied),
                recording(3, 1, &applied),
            ])
        },
        |ctx| {
            let db = ctx.db();
            db.migrate(5)?;
            applied.lock().unwrap().clear();

            let report = db.migrate(1)?;

            assert_eq!(report.applied(), &[(5, 3), (3, 1)]);
            assert_eq!(db.version()?, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_unreachable_target_leaves_database_untouched() {
    let applied = Arc::new(Mutex::new(Vec::new()));

    run_test(
        || create_unmigrated_context(vec![recording(0, 1, &applied), recording(4, 5, &applied)]),
        |ctx| {
            applied.lock().unwrap().clear();
            let err = ctx.db().migrate(5).unwrap_err();

            assert_eq!(
                err.kind(),
                &ErrorKind::UnreachableMigration { from: 0, to: 5, stuck_at: 1 }
            );
            assert!(applied.lock().unwrap().is_empty());
            assert_eq!(ctx.db().version()?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_caller_can_recreate_schema_after_unreachable() {
    run_test(
        || create_unmigrated_context(vec![schema_migration()]),
        |ctx| {
            let db = ctx.db();
            db.migrate(1)?;

            match db.migrate(7) {
                Err(e) if matches!(e.kind(), ErrorKind::UnreachableMigration { .. }) => {
                    // destructive fallback chosen by the application
                    db.execute_batch("DROP TABLE users; DROP TABLE orders; DROP TABLE items;")?;
                }
                other => panic!("expected unreachable migration, got {:?}", other.map(|_| ())),
            }

            assert!(!table_exists(&db, "users")?);
            assert_eq!(db.version()?, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_failing_step_rolls_back_every_step() {
    run_test(
        || {
            create_unmigrated_context(vec![
                schema_migration(),
                Migration::new(1, 2, |conn| {
                    conn.execute_batch("CREATE TABLE audit (id INTEGER PRIMARY KEY)")
                }),
                Migration::new(2, 3, |conn| {
                    conn.execute_batch("CREATE TABLE audit (id INTEGER PRIMARY KEY)")
                }),
            ])
        },
        |ctx| {
            let db = ctx.db();
            let err = db.migrate(3).unwrap_err();

            assert_eq!(err.kind(), &ErrorKind::MigrationFailed { from: 2, to: 3 });
            assert_eq!(err.cause().map(|c| c.kind().clone()), Some(ErrorKind::SqlError));
            assert_eq!(db.version()?, 0);
            assert!(!table_exists(&db, "users")?);
            assert!(!table_exists(&db, "audit")?);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_duplicate_registration_runs_latest_only() {
    let applied: Arc<Mutex<Vec<&str>>> = Arc::new(Mutex::new(Vec::new()));

    run_test(
        || {
            let (first, second) = (applied.clone(), applied.clone());
            create_unmigrated_context(vec![
                Migration::new(0, 1, move |_| {
                    first.lock().unwrap().push("first");
                    Ok(())
                }),
                Migration::new(0, 1, move |_| {
                    second.lock().unwrap().push("second");
                    Ok(())
                }),
            ])
        },
        |ctx| {
            applied.lock().unwrap().clear();
            assert_eq!(ctx.db().migration_overrides().len(), 1);

            ctx.db().migrate(1)?;

            assert_eq!(*applied.lock().unwrap(), vec!["second"]);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_migration_body_error_is_wrapped() {
    run_test(
        || {
            create_unmigrated_context(vec![Migration::new(0, 1, |_| {
                Err(WarrenError::new("data does not fit", ErrorKind::ValidationError))
            })])
        },
        |ctx| {
            let err = ctx.db().migrate(1).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::MigrationFailed { from: 0, to: 1 });
            assert_eq!(err.cause().map(|c| c.message()), Some("data does not fit"));
            Ok(())
        },
        cleanup,
    )
}
