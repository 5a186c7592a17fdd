use crate::error::SqlError;
use crate::translator::{ConnectionDetails, DatabaseTranslator, DbType};

use super::is_connection_state;

/// PostgreSQL.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresTranslator;

impl DatabaseTranslator for PostgresTranslator {
    fn db_type(&self) -> DbType {
        DbType::Postgresql
    }

    fn is_duplicate(&self, err: &SqlError) -> bool {
        err.state() == "23505"
    }

    fn is_foreign_key_violation(&self, err: &SqlError) -> bool {
        err.state() == "23503"
    }

    fn is_already_exists(&self, err: &SqlError) -> bool {
        matches!(err.state(), "42P07" | "42710" | "42P06")
    }

    fn is_undefined_name(&self, err: &SqlError) -> bool {
        matches!(err.state(), "42P01" | "42704" | "42703" | "3F000")
    }

    fn is_lock_timeout(&self, err: &SqlError) -> bool {
        err.state() == "55P03"
    }

    fn is_deadlock(&self, err: &SqlError) -> bool {
        err.state() == "40P01"
    }

    fn is_connection_error(&self, err: &SqlError) -> bool {
        is_connection_state(err.state()) || err.state() == "57P01"
    }

    fn next_sequence_value(&self, name: &str) -> String {
        format!("nextval('{}')", name)
    }

    fn timestamp_diff(&self, left: &str, right: &str, alias: Option<&str>) -> String {
        let expr = format!("EXTRACT(EPOCH FROM ({} - {}))", left, right);
        match alias {
            Some(alias) if !alias.is_empty() => format!("{} AS {}", expr, alias),
            _ => expr,
        }
    }

    fn create_global_temp_table(&self, ddl: &str) -> String {
        format!("CREATE TEMPORARY TABLE {}", ddl)
    }

    fn reorg_table_command(&self, table: &str) -> Option<String> {
        Some(format!("VACUUM ANALYZE {}", table))
    }

    fn auto_increment_key(&self) -> &'static str {
        "BIGSERIAL PRIMARY KEY"
    }

    fn blob_type(&self) -> &'static str {
        "BYTEA"
    }

    fn connection_url(&self, details: &ConnectionDetails) -> String {
        format!(
            "jdbc:postgresql://{}:{}/{}",
            details.host.as_deref().unwrap_or("localhost"),
            details.port.unwrap_or(5432),
            details.database
        )
    }
}
