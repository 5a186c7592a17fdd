//! Versioned resource rows.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use helios_database_utils::{DataAccessKind, DatabaseTranslator, SqlError};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::cache::{CacheUpdates, PersistenceCaches};
use crate::error::{PersistenceError, PersistenceResult, translate_sql};
use crate::query::SqlQuery;
use crate::types::{ParameterRecord, ResourceRecord, format_instant};

use super::dictionary::{Dictionary, DictionaryDao};
use super::parameter::ParameterDao;

/// Columns selected for a full [`ResourceRecord`], in [`map_resource_row`] order.
pub const RESOURCE_COLUMNS: &str =
    "R.resource_id, RT.resource_type, R.logical_id, R.version_id, R.last_updated, R.is_deleted, R.data";

/// `FROM` clause pairing `resources R` with its type name.
pub const RESOURCE_FROM: &str =
    "resources R JOIN resource_types RT ON RT.resource_type_id = R.resource_type_id";

/// Maps a row selected with [`RESOURCE_COLUMNS`].
pub fn map_resource_row(row: &Row<'_>) -> rusqlite::Result<ResourceRecord> {
    let last_updated: String = row.get(4)?;
    let last_updated = DateTime::parse_from_rfc3339(&last_updated)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    Ok(ResourceRecord {
        id: Some(row.get(0)?),
        resource_type: row.get(1)?,
        logical_id: row.get(2)?,
        version_id: row.get(3)?,
        last_updated,
        deleted: row.get::<_, i64>(5)? != 0,
        data: row.get(6)?,
    })
}

/// Reads and writes rows of the `resources` table.
#[derive(Debug, Clone)]
pub struct ResourceDao {
    dictionary: DictionaryDao,
}

impl ResourceDao {
    pub fn new(translator: Arc<dyn DatabaseTranslator>, caches: Arc<PersistenceCaches>) -> Self {
        Self {
            dictionary: DictionaryDao::new(translator, caches),
        }
    }

    fn translator(&self) -> &dyn DatabaseTranslator {
        self.dictionary.translator()
    }

    fn translate(&self, err: rusqlite::Error) -> PersistenceError {
        translate_sql(self.translator(), err)
    }

    /// Stores a new version and its search parameters.
    ///
    /// `record.version_id` must be exactly one more than the highest stored
    /// version of the logical resource (1 for a new resource); anything else is
    /// a version conflict. On success the surrogate id is written back into
    /// `record.id` and returned. The parameter rows of earlier versions are
    /// removed.
    pub fn insert(
        &self,
        conn: &Connection,
        record: &mut ResourceRecord,
        parameters: &[ParameterRecord],
        parameter_dao: &ParameterDao,
        updates: &mut CacheUpdates,
    ) -> PersistenceResult<i64> {
        let type_id = self
            .dictionary
            .resolve(conn, Dictionary::ResourceTypes, &record.resource_type, updates)?;

        let current: Option<i32> = conn
            .query_row(
                "SELECT MAX(version_id) FROM resources WHERE resource_type_id = ?1 AND logical_id = ?2",
                params![type_id, record.logical_id],
                |row| row.get(0),
            )
            .map_err(|e| self.translate(e))?;

        let expected = current.unwrap_or(0) + 1;
        if record.version_id != expected {
            tracing::debug!(
                resource_type = %record.resource_type,
                logical_id = %record.logical_id,
                version_id = record.version_id,
                expected,
                "rejecting out-of-sequence version"
            );
            return Err(self.version_conflict(record, None));
        }

        let inserted = conn
            .prepare_cached(
                "INSERT INTO resources (resource_type_id, logical_id, version_id, last_updated, is_deleted, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![
                    type_id,
                    record.logical_id,
                    record.version_id,
                    format_instant(&record.last_updated),
                    record.deleted,
                    record.data,
                ])
            });

        if let Err(err) = inserted {
            let sql_err = SqlError::from(&err);
            return Err(match self.translator().classify(&sql_err) {
                DataAccessKind::Duplicate | DataAccessKind::ForeignKeyViolation => {
                    let source = self.translator().translate(sql_err);
                    self.version_conflict(record, Some(source))
                }
                _ => self.translator().translate(sql_err).into(),
            });
        }

        let resource_id = conn.last_insert_rowid();
        record.id = Some(resource_id);

        parameter_dao.delete_for_logical_resource(conn, type_id, &record.logical_id, resource_id)?;
        if !parameters.is_empty() {
            parameter_dao.insert(conn, resource_id, parameters, updates)?;
        }

        tracing::debug!(
            resource_type = %record.resource_type,
            logical_id = %record.logical_id,
            version_id = record.version_id,
            resource_id,
            deleted = record.deleted,
            "stored resource version"
        );
        Ok(resource_id)
    }

    fn version_conflict(
        &self,
        record: &ResourceRecord,
        source: Option<helios_database_utils::DataAccessError>,
    ) -> PersistenceError {
        PersistenceError::VersionConflict {
            resource_type: record.resource_type.clone(),
            logical_id: record.logical_id.clone(),
            version_id: record.version_id,
            source,
        }
    }

    /// The latest version, deleted or not.
    pub fn read(&self, conn: &Connection, logical_id: &str, resource_type: &str) -> PersistenceResult<Option<ResourceRecord>> {
        let sql = format!(
            "SELECT {RESOURCE_COLUMNS} FROM {RESOURCE_FROM}
             WHERE RT.resource_type = ?1 AND R.logical_id = ?2
             ORDER BY R.version_id DESC LIMIT 1"
        );
        conn.prepare_cached(&sql)
            .and_then(|mut stmt| {
                stmt.query_row(params![resource_type, logical_id], map_resource_row)
                    .optional()
            })
            .map_err(|e| self.translate(e))
    }

    /// One specific version.
    pub fn version_read(
        &self,
        conn: &Connection,
        logical_id: &str,
        resource_type: &str,
        version_id: i32,
    ) -> PersistenceResult<Option<ResourceRecord>> {
        let sql = format!(
            "SELECT {RESOURCE_COLUMNS} FROM {RESOURCE_FROM}
             WHERE RT.resource_type = ?1 AND R.logical_id = ?2 AND R.version_id = ?3"
        );
        conn.prepare_cached(&sql)
            .and_then(|mut stmt| {
                stmt.query_row(params![resource_type, logical_id, version_id], map_resource_row)
                    .optional()
            })
            .map_err(|e| self.translate(e))
    }

    /// A page of versions, newest first, optionally limited to versions
    /// stored at or after `since`.
    pub fn history(
        &self,
        conn: &Connection,
        resource_type: &str,
        logical_id: &str,
        since: Option<DateTime<Utc>>,
        offset: i64,
        limit: u32,
    ) -> PersistenceResult<Vec<ResourceRecord>> {
        let since = since.map(|s| format_instant(&s));
        let sql = format!(
            "SELECT {RESOURCE_COLUMNS} FROM {RESOURCE_FROM}
             WHERE RT.resource_type = ?1 AND R.logical_id = ?2
               AND (?3 IS NULL OR R.last_updated >= ?3)
             ORDER BY R.version_id DESC {}",
            self.translator().limit_offset("?4", "?5")
        );
        let mut stmt = conn.prepare_cached(&sql).map_err(|e| self.translate(e))?;
        let rows = stmt
            .query_map(
                params![resource_type, logical_id, since, i64::from(limit), offset],
                map_resource_row,
            )
            .map_err(|e| self.translate(e))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| self.translate(e))
    }

    pub fn history_count(
        &self,
        conn: &Connection,
        resource_type: &str,
        logical_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> PersistenceResult<i64> {
        let since = since.map(|s| format_instant(&s));
        let sql = format!(
            "SELECT COUNT(*) FROM {RESOURCE_FROM}
             WHERE RT.resource_type = ?1 AND R.logical_id = ?2
               AND (?3 IS NULL OR R.last_updated >= ?3)"
        );
        conn.query_row(&sql, params![resource_type, logical_id, since], |row| row.get(0))
            .map_err(|e| self.translate(e))
    }

    /// Runs a query selecting [`RESOURCE_COLUMNS`].
    pub fn search(&self, conn: &Connection, query: &SqlQuery) -> PersistenceResult<Vec<ResourceRecord>> {
        let mut stmt = conn.prepare(&query.sql).map_err(|e| self.translate(e))?;
        let rows = stmt
            .query_map(query.bind().as_slice(), map_resource_row)
            .map_err(|e| self.translate(e))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| self.translate(e))
    }

    /// Runs a query selecting a single surrogate id column.
    pub fn search_for_ids(&self, conn: &Connection, query: &SqlQuery) -> PersistenceResult<Vec<i64>> {
        let mut stmt = conn.prepare(&query.sql).map_err(|e| self.translate(e))?;
        let rows = stmt
            .query_map(query.bind().as_slice(), |row| row.get(0))
            .map_err(|e| self.translate(e))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| self.translate(e))
    }

    /// Runs a query selecting a single count.
    pub fn search_count(&self, conn: &Connection, query: &SqlQuery) -> PersistenceResult<i64> {
        conn.query_row(&query.sql, query.bind().as_slice(), |row| row.get(0))
            .map_err(|e| self.translate(e))
    }

    /// Loads rows by surrogate id, returned in the order of `ids`.
    pub fn search_by_ids(&self, conn: &Connection, resource_type: &str, ids: &[i64]) -> PersistenceResult<Vec<ResourceRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {RESOURCE_COLUMNS} FROM {RESOURCE_FROM}
             WHERE RT.resource_type = ? AND R.resource_id IN ({placeholders})"
        );
        let mut bind: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(ids.len() + 1);
        bind.push(&resource_type);
        bind.extend(ids.iter().map(|id| id as &dyn rusqlite::ToSql));

        let mut stmt = conn.prepare(&sql).map_err(|e| self.translate(e))?;
        let mut by_id: HashMap<i64, ResourceRecord> = stmt
            .query_map(bind.as_slice(), map_resource_row)
            .map_err(|e| self.translate(e))?
            .map(|row| row.map(|record| (record.id.unwrap_or_default(), record)))
            .collect::<Result<_, _>>()
            .map_err(|e| self.translate(e))?;

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Id of a resource type, if one has ever been stored.
    pub fn read_resource_type_id(&self, conn: &Connection, resource_type: &str) -> PersistenceResult<Option<i64>> {
        self.dictionary.lookup(conn, Dictionary::ResourceTypes, resource_type)
    }

    pub fn read_all_resource_types(&self, conn: &Connection) -> PersistenceResult<HashMap<String, i64>> {
        self.dictionary.read_all(conn, Dictionary::ResourceTypes)
    }

    /// Number of version rows per resource type, for diagnostics.
    pub fn count_by_type(&self, conn: &Connection) -> PersistenceResult<Vec<(String, i64, i64)>> {
        let sql = format!(
            "SELECT RT.resource_type, COUNT(DISTINCT R.logical_id), COUNT(*) FROM {RESOURCE_FROM}
             GROUP BY RT.resource_type ORDER BY RT.resource_type"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| self.translate(e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .map_err(|e| self.translate(e))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| self.translate(e))
    }
}
