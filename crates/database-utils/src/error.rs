//! Portable data access errors.
//!
//! [`SqlError`] is the raw, database-specific failure as reported by a driver.
//! [`DataAccessError`] is what a translator turns it into. The display text of
//! a `DataAccessError` only names the kind of failure; the raw message (which may
//! echo bound values) stays reachable through [`std::error::Error::source`] for
//! logging, but is never part of the message shown to callers.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw database error as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlError {
    /// Five character SQLSTATE, when the product reports one.
    pub sql_state: Option<String>,
    /// Vendor error code (SQLite extended result code, DB2 SQLCODE, ...).
    pub error_code: Option<i32>,
    /// Driver message.
    pub message: String,
}

impl SqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            sql_state: None,
            error_code: None,
            message: message.into(),
        }
    }

    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    pub fn with_error_code(mut self, code: i32) -> Self {
        self.error_code = Some(code);
        self
    }

    /// Returns the SQLSTATE, or an empty string if there is none.
    pub fn state(&self) -> &str {
        self.sql_state.as_deref().unwrap_or("")
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SQLSTATE={}, code={}: {}",
            self.sql_state.as_deref().unwrap_or("-"),
            self.error_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.message
        )
    }
}

impl std::error::Error for SqlError {}

#[cfg(feature = "sqlite")]
impl From<&rusqlite::Error> for SqlError {
    fn from(err: &rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ffi_err, message) => SqlError {
                sql_state: None,
                error_code: Some(ffi_err.extended_code),
                message: message
                    .clone()
                    .unwrap_or_else(|| ffi_err.to_string()),
            },
            other => SqlError::new(other.to_string()),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for SqlError {
    fn from(err: rusqlite::Error) -> Self {
        SqlError::from(&err)
    }
}

/// The portable classification of a [`DataAccessError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataAccessKind {
    Duplicate,
    ForeignKeyViolation,
    AlreadyExists,
    UndefinedName,
    LockTimeout,
    Deadlock,
    Connection,
    Other,
}

impl fmt::Display for DataAccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataAccessKind::Duplicate => "duplicate-key",
            DataAccessKind::ForeignKeyViolation => "foreign-key-violation",
            DataAccessKind::AlreadyExists => "already-exists",
            DataAccessKind::UndefinedName => "undefined-name",
            DataAccessKind::LockTimeout => "lock-timeout",
            DataAccessKind::Deadlock => "deadlock",
            DataAccessKind::Connection => "connection-error",
            DataAccessKind::Other => "data-access",
        };
        write!(f, "{}", s)
    }
}

/// A database failure translated into the portable taxonomy.
#[derive(Error, Debug)]
pub enum DataAccessError {
    #[error("duplicate key value violates a unique constraint")]
    Duplicate(#[source] SqlError),

    #[error("statement violates a foreign key constraint")]
    ForeignKeyViolation(#[source] SqlError),

    #[error("database object already exists")]
    AlreadyExists(#[source] SqlError),

    #[error("undefined database object")]
    UndefinedName(#[source] SqlError),

    #[error("lock wait timed out")]
    LockTimeout(#[source] SqlError),

    #[error("deadlock detected, transaction rolled back")]
    Deadlock(#[source] SqlError),

    #[error("database connection failure")]
    Connection(#[source] SqlError),

    #[error("database access failure")]
    Other(#[source] SqlError),
}

impl DataAccessError {
    /// Wraps `source` in the variant matching `kind`.
    pub fn from_kind(kind: DataAccessKind, source: SqlError) -> Self {
        match kind {
            DataAccessKind::Duplicate => DataAccessError::Duplicate(source),
            DataAccessKind::ForeignKeyViolation => DataAccessError::ForeignKeyViolation(source),
            DataAccessKind::AlreadyExists => DataAccessError::AlreadyExists(source),
            DataAccessKind::UndefinedName => DataAccessError::UndefinedName(source),
            DataAccessKind::LockTimeout => DataAccessError::LockTimeout(source),
            DataAccessKind::Deadlock => DataAccessError::Deadlock(source),
            DataAccessKind::Connection => DataAccessError::Connection(source),
            DataAccessKind::Other => DataAccessError::Other(source),
        }
    }

    pub fn kind(&self) -> DataAccessKind {
        match self {
            DataAccessError::Duplicate(_) => DataAccessKind::Duplicate,
            DataAccessError::ForeignKeyViolation(_) => DataAccessKind::ForeignKeyViolation,
            DataAccessError::AlreadyExists(_) => DataAccessKind::AlreadyExists,
            DataAccessError::UndefinedName(_) => DataAccessKind::UndefinedName,
            DataAccessError::LockTimeout(_) => DataAccessKind::LockTimeout,
            DataAccessError::Deadlock(_) => DataAccessKind::Deadlock,
            DataAccessError::Connection(_) => DataAccessKind::Connection,
            DataAccessError::Other(_) => DataAccessKind::Other,
        }
    }

    /// The untranslated driver error.
    pub fn sql_error(&self) -> &SqlError {
        match self {
            DataAccessError::Duplicate(e)
            | DataAccessError::ForeignKeyViolation(e)
            | DataAccessError::AlreadyExists(e)
            | DataAccessError::UndefinedName(e)
            | DataAccessError::LockTimeout(e)
            | DataAccessError::Deadlock(e)
            | DataAccessError::Connection(e)
            | DataAccessError::Other(e) => e,
        }
    }

    /// Returns true if repeating the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            DataAccessKind::LockTimeout | DataAccessKind::Deadlock | DataAccessKind::Connection
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_hides_driver_message() {
        let err = DataAccessError::Duplicate(
            SqlError::new("Key (name)=(secret-value) already exists").with_sql_state("23505"),
        );
        let shown = err.to_string();
        assert!(!shown.contains("secret-value"));
        assert_eq!(shown, "duplicate key value violates a unique constraint");
    }

    #[test]
    fn test_source_keeps_driver_message() {
        let err = DataAccessError::Other(SqlError::new("disk I/O error").with_error_code(10));
        let source = err.source().unwrap().to_string();
        assert!(source.contains("disk I/O error"));
        assert!(source.contains("code=10"));
    }

    #[test]
    fn test_from_kind_round_trips() {
        for kind in [
            DataAccessKind::Duplicate,
            DataAccessKind::ForeignKeyViolation,
            DataAccessKind::AlreadyExists,
            DataAccessKind::UndefinedName,
            DataAccessKind::LockTimeout,
            DataAccessKind::Deadlock,
            DataAccessKind::Connection,
            DataAccessKind::Other,
        ] {
            assert_eq!(DataAccessError::from_kind(kind, SqlError::new("x")).kind(), kind);
        }
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(DataAccessError::Deadlock(SqlError::new("x")).is_retryable());
        assert!(DataAccessError::LockTimeout(SqlError::new("x")).is_retryable());
        assert!(DataAccessError::Connection(SqlError::new("x")).is_retryable());
        assert!(!DataAccessError::Duplicate(SqlError::new("x")).is_retryable());
        assert!(!DataAccessError::Other(SqlError::new("x")).is_retryable());
    }

    #[test]
    fn test_sql_error_display() {
        let err = SqlError::new("boom").with_sql_state("08001");
        assert_eq!(err.to_string(), "SQLSTATE=08001, code=-: boom");
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_from_rusqlite_failure() {
        let ffi = rusqlite::ffi::Error::new(2067);
        let err = rusqlite::Error::SqliteFailure(ffi, Some("UNIQUE constraint failed".into()));
        let sql = SqlError::from(&err);
        assert_eq!(sql.error_code, Some(2067));
        assert_eq!(sql.message, "UNIQUE constraint failed");
    }
}
