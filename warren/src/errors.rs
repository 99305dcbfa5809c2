use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use crate::{atomic, Atomic};

/// Error kinds for Warren operations
///
/// Each kind describes one category of failure so callers can decide how to
/// react. Migration kinds carry the versions involved, which lets a caller
/// pick its own recovery policy (fail hard, or recreate the schema) without
/// parsing messages.
///
/// # Examples
///
/// ```rust,ignore
/// use warren::errors::{ErrorKind, WarrenError, WarrenResult};
///
/// fn example() -> WarrenResult<()> {
///     Err(WarrenError::new("Cannot access database", ErrorKind::IllegalContext))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Migration Errors
    /// No chain of registered migrations leads from `from` to `to`.
    /// `stuck_at` is the version where the resolver ran out of candidates.
    UnreachableMigration { from: u32, to: u32, stuck_at: u32 },
    /// The migration step `from -> to` failed while being applied
    MigrationFailed { from: u32, to: u32 },

    // Context Errors
    /// Storage was touched from the restricted execution context
    IllegalContext,

    // Configuration Errors
    /// Invalid builder input, reported when the database is built
    ConfigurationError,

    // Engine Errors
    /// Error from the underlying SQL engine
    SqlError,
    /// The database has already been closed
    DatabaseClosed,
    /// Generic IO error
    IOError,

    // Transaction Errors
    /// The transaction state machine was used out of order
    TransactionError,

    // Validation Errors
    /// Generic validation error
    ValidationError,

    // Event Errors
    /// Error while delivering an invalidation event
    EventError,

    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::UnreachableMigration { from, to, stuck_at } => write!(
                f,
                "Unreachable migration from {} to {} (stuck at {})",
                from, to, stuck_at
            ),
            ErrorKind::MigrationFailed { from, to } => {
                write!(f, "Migration {} -> {} failed", from, to)
            }
            ErrorKind::IllegalContext => write!(f, "Illegal context"),
            ErrorKind::ConfigurationError => write!(f, "Configuration error"),
            ErrorKind::SqlError => write!(f, "SQL error"),
            ErrorKind::DatabaseClosed => write!(f, "Database closed"),
            ErrorKind::IOError => write!(f, "IO error"),
            ErrorKind::TransactionError => write!(f, "Transaction error"),
            ErrorKind::ValidationError => write!(f, "Validation error"),
            ErrorKind::EventError => write!(f, "Event error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom Warren error type.
///
/// `WarrenError` carries a message, an [`ErrorKind`], an optional cause and a
/// backtrace captured at construction time.
///
/// # Examples
///
/// ```rust,ignore
/// use warren::errors::{ErrorKind, WarrenError};
///
/// let cause = WarrenError::new("no such table: users", ErrorKind::SqlError);
/// let err = WarrenError::new_with_cause(
///     "Migration 1 -> 2 failed",
///     ErrorKind::MigrationFailed { from: 1, to: 2 },
///     cause,
/// );
/// ```
#[derive(Clone)]
pub struct WarrenError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<WarrenError>>,
    backtrace: Atomic<Backtrace>,
}

impl WarrenError {
    /// Creates a new `WarrenError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        WarrenError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: atomic(Backtrace::new()),
        }
    }

    /// Creates a new `WarrenError` that wraps the error which caused it.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: WarrenError) -> Self {
        WarrenError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: atomic(Backtrace::new()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&WarrenError> {
        self.cause.as_deref()
    }
}

impl Display for WarrenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for WarrenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => write!(f, "{}\n{:?}", self.message, self.backtrace.read()),
        }
    }
}

impl Error for WarrenError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for Warren operations.
pub type WarrenResult<T> = Result<T, WarrenError>;

impl From<std::io::Error> for WarrenError {
    fn from(err: std::io::Error) -> Self {
        WarrenError::new(&format!("IO error: {}", err), ErrorKind::IOError)
    }
}

impl From<rusqlite::Error> for WarrenError {
    fn from(err: rusqlite::Error) -> Self {
        WarrenError::new(&format!("SQL error: {}", err), ErrorKind::SqlError)
    }
}

impl From<String> for WarrenError {
    fn from(msg: String) -> Self {
        WarrenError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for WarrenError {
    fn from(msg: &str) -> Self {
        WarrenError::new(msg, ErrorKind::InternalError)
    }
}
