//! Read-or-insert access to the normalized dictionary tables.

use std::collections::HashMap;
use std::sync::Arc;

use helios_database_utils::{DataAccessError, DatabaseTranslator, SqlError};
use rusqlite::{Connection, OptionalExtension, params};

use crate::cache::{CacheUpdates, DictionaryCache, PersistenceCaches};
use crate::error::{PersistenceError, PersistenceResult, translate_sql};

/// One of the string-to-id dictionary tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dictionary {
    ParameterNames,
    CodeSystems,
    ResourceTypes,
}

impl Dictionary {
    pub fn table(&self) -> &'static str {
        match self {
            Dictionary::ParameterNames => "parameter_names",
            Dictionary::CodeSystems => "code_systems",
            Dictionary::ResourceTypes => "resource_types",
        }
    }

    fn id_column(&self) -> &'static str {
        match self {
            Dictionary::ParameterNames => "parameter_name_id",
            Dictionary::CodeSystems => "code_system_id",
            Dictionary::ResourceTypes => "resource_type_id",
        }
    }

    fn name_column(&self) -> &'static str {
        match self {
            Dictionary::ParameterNames => "parameter_name",
            Dictionary::CodeSystems => "code_system_name",
            Dictionary::ResourceTypes => "resource_type",
        }
    }

    fn cache<'a>(&self, caches: &'a PersistenceCaches) -> &'a DictionaryCache {
        match self {
            Dictionary::ParameterNames => &caches.parameter_names,
            Dictionary::CodeSystems => &caches.code_systems,
            Dictionary::ResourceTypes => &caches.resource_types,
        }
    }

    fn staged<'a>(&self, updates: &'a mut CacheUpdates) -> &'a mut HashMap<String, i64> {
        match self {
            Dictionary::ParameterNames => &mut updates.parameter_names,
            Dictionary::CodeSystems => &mut updates.code_systems,
            Dictionary::ResourceTypes => &mut updates.resource_types,
        }
    }
}

/// Dictionary lookups shared by the resource and parameter DAOs.
#[derive(Debug, Clone)]
pub struct DictionaryDao {
    translator: Arc<dyn DatabaseTranslator>,
    caches: Arc<PersistenceCaches>,
}

impl DictionaryDao {
    pub fn new(translator: Arc<dyn DatabaseTranslator>, caches: Arc<PersistenceCaches>) -> Self {
        Self { translator, caches }
    }

    /// Selects the id for `value` without inserting.
    pub fn read_id(&self, conn: &Connection, dictionary: Dictionary, value: &str) -> PersistenceResult<Option<i64>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            dictionary.id_column(),
            dictionary.table(),
            dictionary.name_column()
        );
        conn.prepare_cached(&sql)
            .and_then(|mut stmt| stmt.query_row(params![value], |row| row.get(0)).optional())
            .map_err(|e| translate_sql(self.translator.as_ref(), e))
    }

    /// Returns the id for `value`, inserting a new row if there is none.
    ///
    /// When the insert hits a unique violation another writer added the same
    /// value concurrently; its row is read back instead.
    pub fn read_or_add(&self, conn: &Connection, dictionary: Dictionary, value: &str) -> PersistenceResult<i64> {
        if let Some(id) = self.read_id(conn, dictionary, value)? {
            return Ok(id);
        }
        self.add(conn, dictionary, value)
    }

    /// Inserts `value`, reading back the existing row when the insert loses
    /// to another writer.
    fn add(&self, conn: &Connection, dictionary: Dictionary, value: &str) -> PersistenceResult<i64> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?1)",
            dictionary.table(),
            dictionary.name_column()
        );
        match conn.execute(&sql, params![value]) {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                tracing::debug!(dictionary = dictionary.table(), value, id, "added dictionary entry");
                Ok(id)
            }
            Err(err) => {
                let sql_err = SqlError::from(&err);
                if !self.translator.is_duplicate(&sql_err) {
                    return Err(self.translator.translate(sql_err).into());
                }
                tracing::debug!(
                    dictionary = dictionary.table(),
                    value,
                    "dictionary entry added concurrently, reading it back"
                );
                self.read_id(conn, dictionary, value)?.ok_or_else(|| {
                    PersistenceError::DataAccess(DataAccessError::Other(SqlError::new(format!(
                        "{} entry missing after duplicate insert",
                        dictionary.table()
                    ))))
                })
            }
        }
    }

    /// Reads the whole table.
    pub fn read_all(&self, conn: &Connection, dictionary: Dictionary) -> PersistenceResult<HashMap<String, i64>> {
        let sql = format!(
            "SELECT {}, {} FROM {}",
            dictionary.name_column(),
            dictionary.id_column(),
            dictionary.table()
        );
        let translate = |e| translate_sql(self.translator.as_ref(), e);
        let mut stmt = conn.prepare(&sql).map_err(translate)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(translate)?;
        rows.collect::<Result<HashMap<_, _>, _>>().map_err(translate)
    }

    /// Resolves an id inside a write transaction: shared cache, then ids
    /// already staged by this transaction, then the database. Ids obtained from
    /// the database are staged, not published.
    pub fn resolve(
        &self,
        conn: &Connection,
        dictionary: Dictionary,
        value: &str,
        updates: &mut CacheUpdates,
    ) -> PersistenceResult<i64> {
        if let Some(id) = dictionary.cache(&self.caches).get(value) {
            return Ok(id);
        }
        if let Some(id) = dictionary.staged(updates).get(value) {
            return Ok(*id);
        }
        let id = self.read_or_add(conn, dictionary, value)?;
        dictionary.staged(updates).insert(value.to_string(), id);
        Ok(id)
    }

    /// Resolves an id outside a write transaction without inserting. Committed
    /// ids read from the database go straight into the shared cache.
    pub fn lookup(&self, conn: &Connection, dictionary: Dictionary, value: &str) -> PersistenceResult<Option<i64>> {
        let cache = dictionary.cache(&self.caches);
        if let Some(id) = cache.get(value) {
            return Ok(Some(id));
        }
        let id = self.read_id(conn, dictionary, value)?;
        if let Some(id) = id {
            cache.put(value, id);
        }
        Ok(id)
    }

    pub fn caches(&self) -> &PersistenceCaches {
        &self.caches
    }

    pub fn translator(&self) -> &dyn DatabaseTranslator {
        self.translator.as_ref()
    }
}
