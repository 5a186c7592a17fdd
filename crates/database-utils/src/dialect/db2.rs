use crate::error::SqlError;
use crate::translator::{ConnectionDetails, DatabaseTranslator, DbType};

use super::is_connection_state;

/// IBM Db2 LUW.
///
/// Db2 signals both lock timeouts and deadlocks with SQLSTATE 40001 and puts the
/// reason code into the SQLERRMC token of the message: 68 for a timeout, 2 for a
/// deadlock.
#[derive(Debug, Default, Clone, Copy)]
pub struct Db2Translator;

impl DatabaseTranslator for Db2Translator {
    fn db_type(&self) -> DbType {
        DbType::Db2
    }

    fn is_duplicate(&self, err: &SqlError) -> bool {
        err.state() == "23505"
    }

    fn is_foreign_key_violation(&self, err: &SqlError) -> bool {
        err.state() == "23503"
    }

    fn is_already_exists(&self, err: &SqlError) -> bool {
        // SQLCODE -601
        err.state() == "42710"
    }

    fn is_undefined_name(&self, err: &SqlError) -> bool {
        err.state() == "42704"
    }

    fn is_lock_timeout(&self, err: &SqlError) -> bool {
        err.state() == "40001" && err.message.contains("SQLERRMC=68")
    }

    fn is_deadlock(&self, err: &SqlError) -> bool {
        err.state() == "40001" && err.message.contains("SQLERRMC=2")
    }

    fn is_connection_error(&self, err: &SqlError) -> bool {
        is_connection_state(err.state())
    }

    fn add_for_update(&self, sql: &str) -> String {
        format!("{} FOR UPDATE WITH RS", sql)
    }

    fn timestamp_diff(&self, left: &str, right: &str, alias: Option<&str>) -> String {
        match alias {
            Some(alias) if !alias.is_empty() => {
                format!("timestampdiff(2, {}, {}) AS {}", left, right, alias)
            }
            _ => format!("timestampdiff(2, {}, {})", left, right),
        }
    }

    fn create_global_temp_table(&self, ddl: &str) -> String {
        format!("CREATE {}", ddl)
    }

    fn reorg_table_command(&self, table: &str) -> Option<String> {
        Some(format!("CALL SYSPROC.ADMIN_CMD('REORG TABLE {}')", table))
    }

    fn limit_offset(&self, limit: &str, offset: &str) -> String {
        format!("OFFSET {} ROWS FETCH FIRST {} ROWS ONLY", offset, limit)
    }

    fn auto_increment_key(&self) -> &'static str {
        "BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY"
    }

    fn connection_url(&self, details: &ConnectionDetails) -> String {
        format!(
            "jdbc:db2://{}:{}/{}",
            details.host.as_deref().unwrap_or("localhost"),
            details.port.unwrap_or(50000),
            details.database
        )
    }
}
