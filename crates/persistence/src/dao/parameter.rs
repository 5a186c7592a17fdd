//! Search parameter rows.

use std::collections::HashMap;
use std::sync::Arc;

use helios_database_utils::DatabaseTranslator;
use rusqlite::{Connection, params};
use rust_decimal::prelude::ToPrimitive;

use crate::cache::{CacheUpdates, PersistenceCaches};
use crate::error::{PersistenceError, PersistenceResult, translate_sql};
use crate::schema::PARAMETER_TABLES;
use crate::types::{ParameterRecord, ParameterValue, format_instant};

use super::dictionary::{Dictionary, DictionaryDao};

/// Writes and removes the per-type parameter rows of a resource version, and
/// resolves parameter names and code systems to their ids.
#[derive(Debug, Clone)]
pub struct ParameterDao {
    dictionary: DictionaryDao,
}

impl ParameterDao {
    pub fn new(translator: Arc<dyn DatabaseTranslator>, caches: Arc<PersistenceCaches>) -> Self {
        Self {
            dictionary: DictionaryDao::new(translator, caches),
        }
    }

    /// Inserts `parameters` for the resource row `resource_id`. Runs inside the
    /// caller's transaction; new dictionary ids are staged in `updates`.
    pub fn insert(
        &self,
        conn: &Connection,
        resource_id: i64,
        parameters: &[ParameterRecord],
        updates: &mut CacheUpdates,
    ) -> PersistenceResult<usize> {
        let translator = self.dictionary.translator();
        let translate = |e| translate_sql(translator, e);

        for parameter in parameters {
            let name_id = self.dictionary.resolve(conn, Dictionary::ParameterNames, &parameter.name, updates)?;
            let system_id = match parameter.code_system() {
                Some(system) if !system.is_empty() => {
                    Some(self.dictionary.resolve(conn, Dictionary::CodeSystems, system, updates)?)
                }
                _ => None,
            };

            match &parameter.value {
                ParameterValue::String(text) => conn
                    .prepare_cached(
                        "INSERT INTO str_values (resource_id, parameter_name_id, str_value, str_value_lcase)
                         VALUES (?1, ?2, ?3, ?4)",
                    )
                    .and_then(|mut stmt| stmt.execute(params![resource_id, name_id, text, text.to_lowercase()])),
                ParameterValue::Number(number) => {
                    let value = to_f64(&parameter.name, number)?;
                    conn.prepare_cached(
                        "INSERT INTO number_values (resource_id, parameter_name_id, number_value)
                         VALUES (?1, ?2, ?3)",
                    )
                    .and_then(|mut stmt| stmt.execute(params![resource_id, name_id, value]))
                }
                ParameterValue::Date { start, end } => conn
                    .prepare_cached(
                        "INSERT INTO date_values (resource_id, parameter_name_id, date_start, date_end)
                         VALUES (?1, ?2, ?3, ?4)",
                    )
                    .and_then(|mut stmt| {
                        stmt.execute(params![resource_id, name_id, format_instant(start), format_instant(end)])
                    }),
                ParameterValue::Token { code, .. } => conn
                    .prepare_cached(
                        "INSERT INTO token_values (resource_id, parameter_name_id, code_system_id, token_value)
                         VALUES (?1, ?2, ?3, ?4)",
                    )
                    .and_then(|mut stmt| stmt.execute(params![resource_id, name_id, system_id, code])),
                ParameterValue::Quantity { value, code, .. } => {
                    let number = to_f64(&parameter.name, value)?;
                    conn.prepare_cached(
                        "INSERT INTO quantity_values (resource_id, parameter_name_id, quantity_value, code_system_id, code)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .and_then(|mut stmt| stmt.execute(params![resource_id, name_id, number, system_id, code]))
                }
                ParameterValue::Reference {
                    reference,
                    target_type,
                    target_id,
                } => conn
                    .prepare_cached(
                        "INSERT INTO reference_values (resource_id, parameter_name_id, ref_value, ref_type, ref_logical_id)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .and_then(|mut stmt| {
                        stmt.execute(params![resource_id, name_id, reference, target_type, target_id])
                    }),
                ParameterValue::Uri(uri) => conn
                    .prepare_cached(
                        "INSERT INTO uri_values (resource_id, parameter_name_id, uri_value)
                         VALUES (?1, ?2, ?3)",
                    )
                    .and_then(|mut stmt| stmt.execute(params![resource_id, name_id, uri])),
            }
            .map_err(translate)?;
        }

        tracing::debug!(resource_id, count = parameters.len(), "inserted search parameters");
        Ok(parameters.len())
    }

    /// Removes the parameter rows of every version of a logical resource
    /// except the row `keep_resource_id`.
    pub fn delete_for_logical_resource(
        &self,
        conn: &Connection,
        resource_type_id: i64,
        logical_id: &str,
        keep_resource_id: i64,
    ) -> PersistenceResult<usize> {
        let translator = self.dictionary.translator();
        let mut removed = 0;
        for table in PARAMETER_TABLES {
            let sql = format!(
                "DELETE FROM {table} WHERE resource_id IN (
                    SELECT resource_id FROM resources
                    WHERE resource_type_id = ?1 AND logical_id = ?2 AND resource_id <> ?3
                )"
            );
            removed += conn
                .prepare_cached(&sql)
                .and_then(|mut stmt| stmt.execute(params![resource_type_id, logical_id, keep_resource_id]))
                .map_err(|e| translate_sql(translator, e))?;
        }
        if removed > 0 {
            tracing::debug!(logical_id, removed, "removed superseded search parameters");
        }
        Ok(removed)
    }

    /// Number of parameter rows stored per table for one resource row.
    pub fn count_for_resource(&self, conn: &Connection, resource_id: i64) -> PersistenceResult<HashMap<&'static str, i64>> {
        let translator = self.dictionary.translator();
        let mut counts = HashMap::new();
        for table in PARAMETER_TABLES {
            let count: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE resource_id = ?1"),
                    params![resource_id],
                    |row| row.get(0),
                )
                .map_err(|e| translate_sql(translator, e))?;
            counts.insert(table, count);
        }
        Ok(counts)
    }

    pub fn read_or_add_parameter_name(
        &self,
        conn: &Connection,
        name: &str,
        updates: &mut CacheUpdates,
    ) -> PersistenceResult<i64> {
        self.dictionary.resolve(conn, Dictionary::ParameterNames, name, updates)
    }

    pub fn read_or_add_code_system(
        &self,
        conn: &Connection,
        system: &str,
        updates: &mut CacheUpdates,
    ) -> PersistenceResult<i64> {
        self.dictionary.resolve(conn, Dictionary::CodeSystems, system, updates)
    }

    /// Id of a parameter name, if any resource has ever been indexed with it.
    pub fn read_parameter_name_id(&self, conn: &Connection, name: &str) -> PersistenceResult<Option<i64>> {
        self.dictionary.lookup(conn, Dictionary::ParameterNames, name)
    }

    /// Id of a code system, if any resource has ever been indexed with it.
    pub fn read_code_system_id(&self, conn: &Connection, system: &str) -> PersistenceResult<Option<i64>> {
        self.dictionary.lookup(conn, Dictionary::CodeSystems, system)
    }

    pub fn read_all_parameter_names(&self, conn: &Connection) -> PersistenceResult<HashMap<String, i64>> {
        self.dictionary.read_all(conn, Dictionary::ParameterNames)
    }

    pub fn read_all_code_systems(&self, conn: &Connection) -> PersistenceResult<HashMap<String, i64>> {
        self.dictionary.read_all(conn, Dictionary::CodeSystems)
    }
}

fn to_f64(name: &str, value: &rust_decimal::Decimal) -> PersistenceResult<f64> {
    value.to_f64().ok_or_else(|| {
        PersistenceError::invalid_argument(format!("value of '{}' is out of range: {}", name, value))
    })
}
