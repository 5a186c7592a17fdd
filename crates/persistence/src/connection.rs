//! Connection provisioning and the write unit of work.
//!
//! [`ConnectionProvider`] is the seam between the persistence facade and the
//! database. [`SqliteConnectionProvider`] implements it over an `r2d2` pool.
//! Every pooled connection is configured once when the pool opens it (busy
//! timeout, foreign keys, journal mode), so a connection handed out later
//! behaves the same as the first one.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use helios_database_utils::{DatabaseTranslator, SqliteTranslator};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::cache::{CacheUpdates, PersistenceCaches};
use crate::config::SqliteConfig;
use crate::error::{PersistenceResult, translate_sql};
use crate::schema;

/// A pooled SQLite connection.
pub type PooledSqliteConnection = PooledConnection<SqliteConnectionManager>;

/// Hands out connections and the translator that understands their errors.
pub trait ConnectionProvider: Send + Sync + Debug {
    /// Borrows a connection from the pool.
    fn connection(&self) -> PersistenceResult<PooledSqliteConnection>;

    /// The error translator for the provider's database.
    fn translator(&self) -> Arc<dyn DatabaseTranslator>;
}

/// [`ConnectionProvider`] backed by an `r2d2` pool of SQLite connections.
pub struct SqliteConnectionProvider {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteConfig,
    translator: Arc<dyn DatabaseTranslator>,
}

impl Debug for SqliteConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.pool.state();
        f.debug_struct("SqliteConnectionProvider")
            .field("path", &self.config.path)
            .field("connections", &state.connections)
            .field("idle_connections", &state.idle_connections)
            .finish_non_exhaustive()
    }
}

impl SqliteConnectionProvider {
    /// Creates a provider for a private in-memory database.
    pub fn in_memory() -> PersistenceResult<Self> {
        Self::with_config(SqliteConfig::default())
    }

    /// Opens or creates a file-based database with default settings.
    pub fn open<P: AsRef<Path>>(path: P) -> PersistenceResult<Self> {
        Self::with_config(SqliteConfig::file(path.as_ref().to_string_lossy()))
    }

    /// Creates a provider with custom configuration.
    ///
    /// An in-memory database lives and dies with its connection, so the pool
    /// for `:memory:` holds exactly one connection that is never recycled.
    pub fn with_config(config: SqliteConfig) -> PersistenceResult<Self> {
        let busy_timeout = Duration::from_millis(u64::from(config.busy_timeout_ms));
        let enable_foreign_keys = config.enable_foreign_keys;
        let enable_wal = config.enable_wal && !config.is_memory();

        let manager = if config.is_memory() {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(&config.path)
        };
        let manager = manager.with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "foreign_keys", enable_foreign_keys)?;
            if enable_wal {
                let mode: String = conn.pragma_update_and_check(
                    None,
                    "journal_mode",
                    "WAL",
                    |row| row.get(0),
                )?;
                if !mode.eq_ignore_ascii_case("wal") {
                    tracing::warn!(journal_mode = %mode, "database refused WAL journal mode");
                }
            }
            Ok(())
        });

        let builder = Pool::builder().connection_timeout(Duration::from_millis(
            config.connection_timeout_ms,
        ));
        let builder = if config.is_memory() {
            builder
                .max_size(1)
                .min_idle(Some(1))
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            builder
                .max_size(config.max_connections)
                .min_idle(Some(config.min_connections))
        };

        let pool = builder.build(manager)?;

        tracing::info!(
            path = %config.path,
            max_connections = pool.max_size(),
            wal = enable_wal,
            "opened SQLite connection pool"
        );

        Ok(Self {
            pool,
            config,
            translator: Arc::new(SqliteTranslator),
        })
    }

    /// Creates the schema if it does not exist yet.
    pub fn init_schema(&self) -> PersistenceResult<()> {
        let conn = self.connection()?;
        schema::initialize_schema(&conn, self.translator.as_ref())
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }
}

impl ConnectionProvider for SqliteConnectionProvider {
    fn connection(&self) -> PersistenceResult<PooledSqliteConnection> {
        Ok(self.pool.get()?)
    }

    fn translator(&self) -> Arc<dyn DatabaseTranslator> {
        Arc::clone(&self.translator)
    }
}

/// One write transaction together with the dictionary ids it has staged.
///
/// The transaction takes the write lock up front (`BEGIN IMMEDIATE`) so two
/// writers never both read the same current version and then race to insert.
/// Dropping a unit of work without calling [`UnitOfWork::commit`] rolls the
/// transaction back and discards the staged ids.
pub struct UnitOfWork<'c> {
    tx: Transaction<'c>,
    updates: CacheUpdates,
}

impl<'c> UnitOfWork<'c> {
    pub fn begin(
        conn: &'c mut Connection,
        translator: &dyn DatabaseTranslator,
    ) -> PersistenceResult<Self> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| translate_sql(translator, e))?;
        Ok(Self {
            tx,
            updates: CacheUpdates::default(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.tx
    }

    pub fn cache_updates_mut(&mut self) -> &mut CacheUpdates {
        &mut self.updates
    }

    /// The connection and the staging area, borrowed together.
    pub fn parts(&mut self) -> (&Connection, &mut CacheUpdates) {
        (&self.tx, &mut self.updates)
    }

    /// Commits, then publishes the staged dictionary ids.
    pub fn commit(
        self,
        translator: &dyn DatabaseTranslator,
        caches: &PersistenceCaches,
    ) -> PersistenceResult<()> {
        let UnitOfWork { tx, updates } = self;
        tx.commit().map_err(|e| translate_sql(translator, e))?;
        caches.promote(updates);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_pool_shares_one_database() {
        let provider = SqliteConnectionProvider::in_memory().expect("provider");
        {
            let conn = provider.connection().expect("conn");
            conn.execute_batch("CREATE TABLE t (x INTEGER)").expect("create");
        }
        let conn = provider.connection().expect("conn");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .expect("table visible on the next checkout");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_connections_enforce_foreign_keys() {
        let dir = TempDir::new().expect("tempdir");
        let provider =
            SqliteConnectionProvider::open(dir.path().join("fk.db")).expect("provider");
        let conn = provider.connection().expect("conn");
        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |r| r.get(0))
            .expect("pragma");
        assert_eq!(enabled, 1);
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |r| r.get(0))
            .expect("pragma");
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_unit_of_work_rolls_back_on_drop() {
        let provider = SqliteConnectionProvider::in_memory().expect("provider");
        let caches = PersistenceCaches::default();
        let translator = provider.translator();
        let mut conn = provider.connection().expect("conn");
        conn.execute_batch("CREATE TABLE t (x INTEGER)").expect("create");

        {
            let mut uow = UnitOfWork::begin(&mut conn, translator.as_ref()).expect("begin");
            uow.connection()
                .execute("INSERT INTO t (x) VALUES (1)", [])
                .expect("insert");
            uow.cache_updates_mut()
                .parameter_names
                .insert("name".to_string(), 1);
        }
        assert!(caches.parameter_names.is_empty());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 0);

        let mut uow = UnitOfWork::begin(&mut conn, translator.as_ref()).expect("begin");
        uow.connection()
            .execute("INSERT INTO t (x) VALUES (2)", [])
            .expect("insert");
        uow.cache_updates_mut()
            .parameter_names
            .insert("name".to_string(), 1);
        uow.commit(translator.as_ref(), &caches).expect("commit");

        assert_eq!(caches.parameter_names.get("name"), Some(1));
    }
}
