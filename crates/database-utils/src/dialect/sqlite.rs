use crate::error::SqlError;
use crate::translator::{ConnectionDetails, DatabaseTranslator, DbType};

// Extended result codes, see https://www.sqlite.org/rescode.html
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CANTOPEN: i32 = 14;
const SQLITE_NOTADB: i32 = 26;
const SQLITE_LOCKED_SHAREDCACHE: i32 = 262;
const SQLITE_CONSTRAINT_FOREIGNKEY: i32 = 787;
const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

/// SQLite.
///
/// SQLite has no SQLSTATE; classification uses the extended result code and,
/// for schema errors that share the generic `SQLITE_ERROR` code, the message.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteTranslator;

impl SqliteTranslator {
    fn code(err: &SqlError) -> i32 {
        err.error_code.unwrap_or(0)
    }

    fn primary_code(err: &SqlError) -> i32 {
        Self::code(err) & 0xff
    }
}

impl DatabaseTranslator for SqliteTranslator {
    fn db_type(&self) -> DbType {
        DbType::Sqlite
    }

    fn is_duplicate(&self, err: &SqlError) -> bool {
        matches!(
            Self::code(err),
            SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY
        )
    }

    fn is_foreign_key_violation(&self, err: &SqlError) -> bool {
        Self::code(err) == SQLITE_CONSTRAINT_FOREIGNKEY
    }

    fn is_already_exists(&self, err: &SqlError) -> bool {
        err.message.contains("already exists")
    }

    fn is_undefined_name(&self, err: &SqlError) -> bool {
        ["no such table", "no such column", "no such index", "no such function"]
            .iter()
            .any(|needle| err.message.contains(needle))
    }

    fn is_lock_timeout(&self, err: &SqlError) -> bool {
        Self::primary_code(err) == SQLITE_BUSY
    }

    fn is_deadlock(&self, err: &SqlError) -> bool {
        matches!(Self::code(err), SQLITE_LOCKED | SQLITE_LOCKED_SHAREDCACHE)
    }

    fn is_connection_error(&self, err: &SqlError) -> bool {
        matches!(Self::primary_code(err), SQLITE_CANTOPEN | SQLITE_NOTADB)
    }

    fn add_for_update(&self, sql: &str) -> String {
        // Writers serialize on the database lock; there is no row locking clause.
        sql.to_string()
    }

    fn create_sequence(&self, name: &str, _cache: u32) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT)",
            name
        )
    }

    fn next_sequence_value(&self, name: &str) -> String {
        format!("(SELECT COALESCE(MAX(id), 0) + 1 FROM {})", name)
    }

    fn timestamp_diff(&self, left: &str, right: &str, alias: Option<&str>) -> String {
        let expr = format!(
            "CAST((julianday({}) - julianday({})) * 86400 AS INTEGER)",
            left, right
        );
        match alias {
            Some(alias) if !alias.is_empty() => format!("{} AS {}", expr, alias),
            _ => expr,
        }
    }

    fn create_global_temp_table(&self, ddl: &str) -> String {
        format!("CREATE TEMPORARY TABLE {}", ddl)
    }

    fn auto_increment_key(&self) -> &'static str {
        "INTEGER PRIMARY KEY AUTOINCREMENT"
    }

    fn connection_url(&self, details: &ConnectionDetails) -> String {
        format!("jdbc:sqlite:{}", details.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataAccessKind;

    fn coded(code: i32, message: &str) -> SqlError {
        SqlError::new(message).with_error_code(code)
    }

    #[test]
    fn test_constraint_codes() {
        let t = SqliteTranslator;
        assert_eq!(
            t.classify(&coded(2067, "UNIQUE constraint failed: resources.logical_id")),
            DataAccessKind::Duplicate
        );
        assert_eq!(t.classify(&coded(1555, "")), DataAccessKind::Duplicate);
        assert_eq!(
            t.classify(&coded(787, "FOREIGN KEY constraint failed")),
            DataAccessKind::ForeignKeyViolation
        );
    }

    #[test]
    fn test_lock_codes() {
        let t = SqliteTranslator;
        assert_eq!(t.classify(&coded(5, "database is locked")), DataAccessKind::LockTimeout);
        // SQLITE_BUSY_SNAPSHOT
        assert_eq!(t.classify(&coded(517, "")), DataAccessKind::LockTimeout);
        assert_eq!(t.classify(&coded(6, "database table is locked")), DataAccessKind::Deadlock);
    }

    #[test]
    fn test_schema_messages() {
        let t = SqliteTranslator;
        assert_eq!(
            t.classify(&coded(1, "table resources already exists")),
            DataAccessKind::AlreadyExists
        );
        assert_eq!(
            t.classify(&coded(1, "no such table: resourcez")),
            DataAccessKind::UndefinedName
        );
        assert_eq!(t.classify(&coded(1, "near \"SELEC\": syntax error")), DataAccessKind::Other);
    }

    #[test]
    fn test_connection_codes() {
        let t = SqliteTranslator;
        assert_eq!(t.classify(&coded(14, "unable to open database file")), DataAccessKind::Connection);
        assert_eq!(t.classify(&coded(26, "file is not a database")), DataAccessKind::Connection);
    }

    #[test]
    fn test_translate_keeps_source() {
        let err = SqliteTranslator.translate(coded(2067, "UNIQUE constraint failed"));
        assert_eq!(err.kind(), DataAccessKind::Duplicate);
        assert_eq!(err.sql_error().error_code, Some(2067));
    }

    #[test]
    fn test_fragments() {
        let t = SqliteTranslator;
        assert_eq!(t.add_for_update("SELECT 1"), "SELECT 1");
        assert_eq!(t.limit_offset("?", "?"), "LIMIT ? OFFSET ?");
        assert_eq!(t.auto_increment_key(), "INTEGER PRIMARY KEY AUTOINCREMENT");
        assert_eq!(
            t.timestamp_diff("a", "b", Some("d")),
            "CAST((julianday(a) - julianday(b)) * 86400 AS INTEGER) AS d"
        );
    }
}
