use super::{OpenConfig, OpenHelperFactory, QueryResult, SqlConnection, SqlValue};
use crate::common::IN_MEMORY_PATH;
use crate::errors::{ErrorKind, WarrenError, WarrenResult};
use parking_lot::Mutex;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::sync::Arc;

/// Default [`OpenHelperFactory`], backed by a bundled SQLite through `rusqlite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteOpenHelperFactory;

impl OpenHelperFactory for SqliteOpenHelperFactory {
    fn open(&self, config: &OpenConfig) -> WarrenResult<Arc<dyn SqlConnection>> {
        let connection = SqliteConnection::open(config)?;
        Ok(Arc::new(connection))
    }
}

/// A single native SQLite connection.
pub struct SqliteConnection {
    conn: Mutex<Option<Connection>>,
}

impl SqliteConnection {
    pub fn open(config: &OpenConfig) -> WarrenResult<Self> {
        let conn = match (config.in_memory(), config.name()) {
            (true, _) | (false, Some(IN_MEMORY_PATH)) => {
                log::debug!("opening in-memory sqlite database");
                Connection::open_in_memory()?
            }
            (false, Some(path)) => {
                log::debug!("opening sqlite database at {}", path);
                let conn = Connection::open(path)?;
                // the pragma answers with the mode now in effect
                let _mode: String =
                    conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
                conn
            }
            (false, None) => {
                log::error!("Cannot open a file database without a name");
                return Err(WarrenError::new(
                    "Cannot open a file database without a name",
                    ErrorKind::ConfigurationError,
                ));
            }
        };

        conn.execute_batch(
            "PRAGMA foreign_keys=ON; PRAGMA temp_store=MEMORY; PRAGMA recursive_triggers=ON;",
        )?;

        Ok(SqliteConnection {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_connection<R>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<R>,
    ) -> WarrenResult<R> {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => Ok(f(conn)?),
            None => Err(WarrenError::new(
                "Sqlite connection is closed",
                ErrorKind::DatabaseClosed,
            )),
        }
    }
}

fn to_sqlite(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Real(v) => Value::Real(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
        SqlValue::Blob(v) => Value::Blob(v.clone()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => SqlValue::Blob(v.to_vec()),
    }
}

impl SqlConnection for SqliteConnection {
    fn begin(&self) -> WarrenResult<()> {
        self.with_connection(|conn| conn.execute_batch("BEGIN IMMEDIATE"))
    }

    fn commit(&self) -> WarrenResult<()> {
        self.with_connection(|conn| conn.execute_batch("COMMIT"))
    }

    fn rollback(&self) -> WarrenResult<()> {
        self.with_connection(|conn| conn.execute_batch("ROLLBACK"))
    }

    fn execute(&self, sql: &str, args: &[SqlValue]) -> WarrenResult<usize> {
        self.with_connection(|conn| conn.execute(sql, params_from_iter(args.iter().map(to_sqlite))))
    }

    fn execute_batch(&self, sql: &str) -> WarrenResult<()> {
        self.with_connection(|conn| conn.execute_batch(sql))
    }

    fn query(&self, sql: &str, args: &[SqlValue]) -> WarrenResult<QueryResult> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let column_count = columns.len();

            let mut rows = stmt.query(params_from_iter(args.iter().map(to_sqlite)))?;
            let mut values = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = Vec::with_capacity(column_count);
                for index in 0..column_count {
                    record.push(from_sqlite(row.get_ref(index)?));
                }
                values.push(record);
            }
            Ok(QueryResult::new(columns, values))
        })
    }

    fn user_version(&self) -> WarrenResult<u32> {
        let version: i64 =
            self.with_connection(|conn| conn.query_row("PRAGMA user_version", [], |row| row.get(0)))?;
        u32::try_from(version).map_err(|_| {
            WarrenError::new(
                &format!("Stored schema version {} is out of range", version),
                ErrorKind::ValidationError,
            )
        })
    }

    fn set_user_version(&self, version: u32) -> WarrenResult<()> {
        self.with_connection(|conn| conn.execute_batch(&format!("PRAGMA user_version = {}", version)))
    }

    fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    fn close(&self) -> WarrenResult<()> {
        let taken = self.conn.lock().take();
        if let Some(conn) = taken {
            conn.close().map_err(|(_, e)| WarrenError::from(e))?;
        }
        Ok(())
    }
}
