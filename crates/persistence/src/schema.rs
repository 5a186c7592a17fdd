//! Relational schema for versioned resources and their search parameters.
//!
//! DDL is generated through the dialect translator so key and blob column types
//! match the target database. Only SQLite is executed by this crate.

use helios_database_utils::DatabaseTranslator;
use rusqlite::{Connection, OptionalExtension};

use crate::error::{PersistenceResult, translate_sql};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Per-type parameter tables, in creation order.
pub const PARAMETER_TABLES: [&str; 7] = [
    "str_values",
    "number_values",
    "date_values",
    "token_values",
    "quantity_values",
    "reference_values",
    "uri_values",
];

/// Creates the schema on a fresh database. An up-to-date database is left
/// untouched.
pub fn initialize_schema(conn: &Connection, translator: &dyn DatabaseTranslator) -> PersistenceResult<()> {
    let current_version = get_schema_version(conn, translator)?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!(version = current_version, "schema is current");
        return Ok(());
    }

    let ddl = schema_statements(translator).join(";\n");
    conn.execute_batch(&format!("BEGIN;\n{};\nCOMMIT;", ddl))
        .map_err(|e| {
            // leave the connection usable for the caller
            let _ = conn.execute_batch("ROLLBACK");
            translate_sql(translator, e)
        })?;
    set_schema_version(conn, translator, SCHEMA_VERSION)?;

    tracing::info!(version = SCHEMA_VERSION, "initialized persistence schema");
    Ok(())
}

/// The version recorded in `schema_version`, or 0 on a fresh database.
pub fn get_schema_version(conn: &Connection, translator: &dyn DatabaseTranslator) -> PersistenceResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| translate_sql(translator, e))?;

    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()
        .map_err(|e| translate_sql(translator, e))?
        .flatten();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, translator: &dyn DatabaseTranslator, version: i32) -> PersistenceResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| translate_sql(translator, e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| translate_sql(translator, e))?;
    Ok(())
}

/// DDL statements for the full schema in the translator's dialect.
pub fn schema_statements(translator: &dyn DatabaseTranslator) -> Vec<String> {
    let key = translator.auto_increment_key();
    let blob = translator.blob_type();

    let mut statements = vec![
        format!(
            "CREATE TABLE resource_types (
                resource_type_id {key},
                resource_type VARCHAR(64) NOT NULL UNIQUE
            )"
        ),
        format!(
            "CREATE TABLE parameter_names (
                parameter_name_id {key},
                parameter_name VARCHAR(256) NOT NULL UNIQUE
            )"
        ),
        format!(
            "CREATE TABLE code_systems (
                code_system_id {key},
                code_system_name VARCHAR(1024) NOT NULL UNIQUE
            )"
        ),
        format!(
            "CREATE TABLE resources (
                resource_id {key},
                resource_type_id BIGINT NOT NULL REFERENCES resource_types(resource_type_id),
                logical_id VARCHAR(64) NOT NULL,
                version_id INTEGER NOT NULL,
                last_updated VARCHAR(32) NOT NULL,
                is_deleted SMALLINT NOT NULL DEFAULT 0,
                data {blob} NOT NULL,
                UNIQUE (resource_type_id, logical_id, version_id)
            )"
        ),
        "CREATE INDEX idx_resources_logical ON resources(resource_type_id, logical_id, version_id)"
            .to_string(),
        "CREATE INDEX idx_resources_last_updated ON resources(last_updated)".to_string(),
    ];

    let value_columns: [(&str, &str, &str); 7] = [
        (
            "str_values",
            "str_value VARCHAR(1024) NOT NULL,
                str_value_lcase VARCHAR(1024) NOT NULL",
            "str_value_lcase",
        ),
        ("number_values", "number_value DOUBLE PRECISION NOT NULL", "number_value"),
        (
            "date_values",
            "date_start VARCHAR(32) NOT NULL,
                date_end VARCHAR(32) NOT NULL",
            "date_start, date_end",
        ),
        (
            "token_values",
            "code_system_id BIGINT REFERENCES code_systems(code_system_id),
                token_value VARCHAR(1024) NOT NULL",
            "token_value, code_system_id",
        ),
        (
            "quantity_values",
            "quantity_value DOUBLE PRECISION NOT NULL,
                code_system_id BIGINT REFERENCES code_systems(code_system_id),
                code VARCHAR(256)",
            "quantity_value",
        ),
        (
            "reference_values",
            "ref_value VARCHAR(1024) NOT NULL,
                ref_type VARCHAR(64),
                ref_logical_id VARCHAR(64)",
            "ref_type, ref_logical_id",
        ),
        ("uri_values", "uri_value VARCHAR(1024) NOT NULL", "uri_value"),
    ];

    for (table, columns, indexed) in value_columns {
        statements.push(format!(
            "CREATE TABLE {table} (
                row_id {key},
                resource_id BIGINT NOT NULL REFERENCES resources(resource_id) ON DELETE CASCADE,
                parameter_name_id BIGINT NOT NULL REFERENCES parameter_names(parameter_name_id),
                {columns}
            )"
        ));
        statements.push(format!(
            "CREATE INDEX idx_{table}_value ON {table}(parameter_name_id, {indexed})"
        ));
        statements.push(format!(
            "CREATE INDEX idx_{table}_resource ON {table}(resource_id)"
        ));
    }

    statements
}
