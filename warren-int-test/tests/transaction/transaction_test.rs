use std::sync::mpsc;
use std::thread;
use warren::errors::{ErrorKind, WarrenError};
use warren::transaction::TransactionOutcome;
use warren_int_test::test_util::{
    cleanup, count_rows, create_instant_test_context, create_test_context, run_test,
};

#[test]
fn test_committed_transaction_is_visible() {
    run_test(
        create_instant_test_context,
        |ctx| {
            let db = ctx.db();
            let mut txn = db.begin_transaction()?;
            txn.execute("INSERT INTO users (name) VALUES (?)", &["alice".into()])?;
            txn.execute("INSERT INTO users (name) VALUES (?)", &["bob".into()])?;
            txn.set_successful()?;
            assert_eq!(txn.end()?, TransactionOutcome::Committed);

            assert_eq!(count_rows(&db, "users")?, 2);
            assert!(!db.in_transaction());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_unmarked_transaction_rolls_back() {
    run_test(
        create_instant_test_context,
        |ctx| {
            let db = ctx.db();
            {
                let txn = db.begin_transaction()?;
                txn.execute("INSERT INTO users (name) VALUES ('alice')", &[])?;
                assert!(db.in_transaction());
                // dropped without set_successful
            }

            assert_eq!(count_rows(&db, "users")?, 0);
            assert!(!db.in_transaction());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_failed_inner_level_rolls_back_outer() {
    run_test(
        create_instant_test_context,
        |ctx| {
            let db = ctx.db();
            db.run_in_transaction(|outer| {
                outer.execute("INSERT INTO users (name) VALUES ('alice')", &[])?;

                let inner = db.run_in_transaction(|txn| {
                    assert!(txn.is_nested());
                    txn.execute("INSERT INTO orders (user_id, total) VALUES (1, 9.5)", &[])?;
                    Err::<(), _>(WarrenError::new("out of stock", ErrorKind::ValidationError))
                });
                assert!(inner.is_err());

                // the outer level still reports success
                Ok(())
            })?;

            assert!(!db.in_transaction());
            assert_eq!(count_rows(&db, "users")?, 0);
            assert_eq!(count_rows(&db, "orders")?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_nested_levels_commit_together() {
    run_test(
        create_instant_test_context,
        |ctx| {
            let db = ctx.db();
            let mut outer = db.begin_transaction()?;
            outer.execute("INSERT INTO users (name) VALUES ('alice')", &[])?;

            let mut inner = db.begin_transaction()?;
            assert!(inner.is_nested());
            inner.execute("INSERT INTO orders (user_id, total) VALUES (1, 20.0)", &[])?;
            inner.set_successful()?;
            assert_eq!(inner.end()?, TransactionOutcome::Deferred);
            assert!(db.in_transaction());

            outer.set_successful()?;
            assert_eq!(outer.end()?, TransactionOutcome::Committed);

            assert_eq!(count_rows(&db, "users")?, 1);
            assert_eq!(count_rows(&db, "orders")?, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_sql_error_rolls_back_implicit_transaction() {
    run_test(
        create_instant_test_context,
        |ctx| {
            let db = ctx.db();
            let err = db
                .execute_batch(
                    "INSERT INTO users (name) VALUES ('alice'); \
                     INSERT INTO users (name) VALUES (NULL);",
                )
                .unwrap_err();

            assert_eq!(err.kind(), &ErrorKind::SqlError);
            assert_eq!(count_rows(&db, "users")?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_concurrent_writers_are_serialized() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let workers: Vec<_> = (0..4)
                .map(|worker| {
                    let db = db.clone();
                    thread::spawn(move || {
                        for i in 0..25 {
                            db.run_in_transaction(|txn| {
                                txn.execute(
                                    "INSERT INTO users (name) VALUES (?)",
                                    &[format!("user-{}-{}", worker, i).into()],
                                )
                            })
                            .unwrap();
                        }
                    })
                })
                .collect();

            for worker in workers {
                worker.join().unwrap();
            }

            assert_eq!(count_rows(&db, "users")?, 100);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_transaction_is_scoped_to_its_thread() {
    run_test(
        create_test_context,
        |ctx| {
            let db = ctx.db();
            let txn = db.begin_transaction()?;
            assert!(db.in_transaction());

            let (sender, receiver) = mpsc::channel();
            let other = db.clone();
            let other_thread = thread::spawn(move || {
                sender.send(other.in_transaction()).unwrap();
            });
            other_thread.join().unwrap();
            assert!(!receiver.recv().unwrap());

            drop(txn);
            assert!(!db.in_transaction());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_close_with_open_transaction_fails() {
    run_test(
        create_instant_test_context,
        |ctx| {
            let db = ctx.db();
            let txn = db.begin_transaction()?;

            let err = db.close().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::TransactionError);
            assert!(db.is_open());

            drop(txn);
            db.close()?;
            assert!(!db.is_open());

            let closed = db.query("SELECT 1 AS one", &[]).unwrap_err();
            assert_eq!(closed.kind(), &ErrorKind::DatabaseClosed);
            Ok(())
        },
        cleanup,
    )
}
