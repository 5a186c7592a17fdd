//! The dialect translator capability.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dialect::{DerbyTranslator, Db2Translator, PostgresTranslator, SqliteTranslator};
use crate::error::{DataAccessError, DataAccessKind, SqlError};

/// Supported database products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Sqlite,
    Postgresql,
    Db2,
    Derby,
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DbType::Sqlite => "sqlite",
            DbType::Postgresql => "postgresql",
            DbType::Db2 => "db2",
            DbType::Derby => "derby",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for DbType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(DbType::Sqlite),
            "postgres" | "postgresql" => Ok(DbType::Postgresql),
            "db2" => Ok(DbType::Db2),
            "derby" => Ok(DbType::Derby),
            other => Err(format!("unknown database type: {}", other)),
        }
    }
}

/// Properties used to build a connection URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionDetails {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name, or the file path for embedded databases.
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
}

/// Converts raw database errors into [`DataAccessError`] and supplies the SQL
/// fragments that differ between database products.
///
/// The classification predicates are the product-specific part. The default
/// [`translate`](DatabaseTranslator::translate) walks them in a fixed order, so
/// that an error matching several predicates (DB2 reports both lock timeouts
/// and deadlocks as 40001) resolves to the most specific kind.
pub trait DatabaseTranslator: Send + Sync + fmt::Debug {
    fn db_type(&self) -> DbType;

    fn is_duplicate(&self, err: &SqlError) -> bool;

    fn is_foreign_key_violation(&self, err: &SqlError) -> bool;

    fn is_already_exists(&self, err: &SqlError) -> bool;

    fn is_undefined_name(&self, err: &SqlError) -> bool;

    fn is_lock_timeout(&self, err: &SqlError) -> bool;

    fn is_deadlock(&self, err: &SqlError) -> bool;

    fn is_connection_error(&self, err: &SqlError) -> bool;

    /// Classifies `err` without consuming it.
    fn classify(&self, err: &SqlError) -> DataAccessKind {
        if self.is_deadlock(err) {
            DataAccessKind::Deadlock
        } else if self.is_lock_timeout(err) {
            DataAccessKind::LockTimeout
        } else if self.is_connection_error(err) {
            DataAccessKind::Connection
        } else if self.is_duplicate(err) {
            DataAccessKind::Duplicate
        } else if self.is_foreign_key_violation(err) {
            DataAccessKind::ForeignKeyViolation
        } else if self.is_already_exists(err) {
            DataAccessKind::AlreadyExists
        } else if self.is_undefined_name(err) {
            DataAccessKind::UndefinedName
        } else {
            DataAccessKind::Other
        }
    }

    fn translate(&self, err: SqlError) -> DataAccessError {
        let kind = self.classify(&err);
        if kind == DataAccessKind::Other {
            tracing::debug!(dialect = %self.db_type(), "unclassified database error: {}", err);
        }
        DataAccessError::from_kind(kind, err)
    }

    /// Appends the row-locking clause to a SELECT statement.
    fn add_for_update(&self, sql: &str) -> String {
        format!("{} FOR UPDATE", sql)
    }

    fn create_sequence(&self, name: &str, cache: u32) -> String {
        format!("CREATE SEQUENCE {} CACHE {}", name, cache)
    }

    fn next_sequence_value(&self, name: &str) -> String {
        format!("NEXT VALUE FOR {}", name)
    }

    /// Expression computing the number of seconds between two timestamps.
    fn timestamp_diff(&self, left: &str, right: &str, alias: Option<&str>) -> String;

    /// Wraps a temporary table definition in the product's DDL.
    fn create_global_temp_table(&self, ddl: &str) -> String {
        format!("CREATE GLOBAL TEMPORARY TABLE {}", ddl)
    }

    /// Table maintenance command to run after altering a table, if any.
    fn reorg_table_command(&self, _table: &str) -> Option<String> {
        None
    }

    /// Pagination clause appended to an ordered query. `limit` and `offset` are
    /// placeholders or literals.
    fn limit_offset(&self, limit: &str, offset: &str) -> String {
        format!("LIMIT {} OFFSET {}", limit, offset)
    }

    /// Column definition for an auto-generated integer primary key.
    fn auto_increment_key(&self) -> &'static str;

    fn blob_type(&self) -> &'static str {
        "BLOB"
    }

    fn connection_url(&self, details: &ConnectionDetails) -> String;
}

/// Returns the translator for `db_type`.
pub fn translator_for(db_type: DbType) -> Arc<dyn DatabaseTranslator> {
    match db_type {
        DbType::Sqlite => Arc::new(SqliteTranslator),
        DbType::Postgresql => Arc::new(PostgresTranslator),
        DbType::Db2 => Arc::new(Db2Translator),
        DbType::Derby => Arc::new(DerbyTranslator),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_type_parse() {
        assert_eq!("SQLite".parse::<DbType>().unwrap(), DbType::Sqlite);
        assert_eq!("postgres".parse::<DbType>().unwrap(), DbType::Postgresql);
        assert_eq!("db2".parse::<DbType>().unwrap(), DbType::Db2);
        assert!("oracle".parse::<DbType>().is_err());
    }

    #[test]
    fn test_translator_for_matches_type() {
        for db_type in [DbType::Sqlite, DbType::Postgresql, DbType::Db2, DbType::Derby] {
            assert_eq!(translator_for(db_type).db_type(), db_type);
        }
    }

    #[test]
    fn test_connection_details_deserialize() {
        let details: ConnectionDetails =
            serde_json::from_str(r#"{"host": "db.local", "port": 50000, "database": "FHIRDB"}"#)
                .unwrap();
        assert_eq!(details.port, Some(50000));
        assert!(details.user.is_none());
    }
}
