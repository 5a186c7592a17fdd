use crate::error::SqlError;
use crate::translator::{ConnectionDetails, DatabaseTranslator, DbType};

use super::is_connection_state;

/// Apache Derby, used as an embedded database in tests and small deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct DerbyTranslator;

impl DatabaseTranslator for DerbyTranslator {
    fn db_type(&self) -> DbType {
        DbType::Derby
    }

    fn is_duplicate(&self, err: &SqlError) -> bool {
        err.state() == "23505"
    }

    fn is_foreign_key_violation(&self, err: &SqlError) -> bool {
        err.state() == "23503"
    }

    fn is_already_exists(&self, err: &SqlError) -> bool {
        err.state() == "X0Y32"
    }

    fn is_undefined_name(&self, err: &SqlError) -> bool {
        matches!(err.state(), "42X05" | "42Y55" | "42Y07")
    }

    fn is_lock_timeout(&self, err: &SqlError) -> bool {
        err.state() == "40XL1"
    }

    fn is_deadlock(&self, err: &SqlError) -> bool {
        err.state() == "40001"
    }

    fn is_connection_error(&self, err: &SqlError) -> bool {
        is_connection_state(err.state())
    }

    fn timestamp_diff(&self, left: &str, right: &str, alias: Option<&str>) -> String {
        let expr = format!("{{fn timestampdiff(SQL_TSI_SECOND, {}, {})}}", left, right);
        match alias {
            Some(alias) if !alias.is_empty() => format!("{} AS {}", expr, alias),
            _ => expr,
        }
    }

    fn create_global_temp_table(&self, ddl: &str) -> String {
        format!("DECLARE {}", ddl)
    }

    fn limit_offset(&self, limit: &str, offset: &str) -> String {
        format!("OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", offset, limit)
    }

    fn auto_increment_key(&self) -> &'static str {
        "BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY"
    }

    fn connection_url(&self, details: &ConnectionDetails) -> String {
        format!("jdbc:derby:{};create=true", details.database)
    }
}
