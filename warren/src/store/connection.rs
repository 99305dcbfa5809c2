use crate::errors::WarrenResult;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// A value bound to, or read from, a SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl Display for SqlValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(value) => write!(f, "{}", value),
            SqlValue::Real(value) => write!(f, "{}", value),
            SqlValue::Text(value) => write!(f, "{}", value),
            SqlValue::Blob(value) => write!(f, "<{} bytes>", value.len()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Integer(value as i64)
    }
}

impl From<u32> for SqlValue {
    fn from(value: u32) -> Self {
        SqlValue::Integer(value as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Blob(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Fully materialised result of a raw query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        QueryResult { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<SqlValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the value of `column` in row `row`, if both exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&SqlValue> {
        let index = self.columns.iter().position(|c| c.eq_ignore_ascii_case(column))?;
        self.rows.get(row).and_then(|r| r.get(index))
    }
}

/// The engine primitives the core is allowed to use.
///
/// Implementations own one native connection. The core only ever opens,
/// closes, begins, commits, rolls back and sends raw SQL; transaction
/// bookkeeping and nesting live in the coordinator above this trait.
pub trait SqlConnection: Send + Sync {
    /// Opens a native transaction.
    fn begin(&self) -> WarrenResult<()>;

    fn commit(&self) -> WarrenResult<()>;

    fn rollback(&self) -> WarrenResult<()>;

    /// Executes a single statement and returns the number of changed rows.
    fn execute(&self, sql: &str, args: &[SqlValue]) -> WarrenResult<usize>;

    /// Executes several `;` separated statements without arguments.
    fn execute_batch(&self, sql: &str) -> WarrenResult<()>;

    fn query(&self, sql: &str, args: &[SqlValue]) -> WarrenResult<QueryResult>;

    /// Reads the persisted schema version.
    fn user_version(&self) -> WarrenResult<u32>;

    fn set_user_version(&self, version: u32) -> WarrenResult<()>;

    fn is_open(&self) -> bool;

    fn close(&self) -> WarrenResult<()>;
}

/// Where and how the native database is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConfig {
    name: Option<String>,
    in_memory: bool,
}

impl OpenConfig {
    pub fn new(name: Option<String>, in_memory: bool) -> Self {
        OpenConfig { name, in_memory }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn in_memory(&self) -> bool {
        self.in_memory
    }
}

/// Opens native connections; the injectable "open helper factory".
pub trait OpenHelperFactory: Send + Sync {
    fn open(&self, config: &OpenConfig) -> WarrenResult<Arc<dyn SqlConnection>>;
}

impl Debug for dyn OpenHelperFactory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenHelperFactory").finish()
    }
}
