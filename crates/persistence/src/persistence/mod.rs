//! The persistence facade.
//!
//! [`JdbcPersistence`] ties the pieces together: it stamps identity and
//! metadata onto incoming resources, compresses them with a
//! [`PayloadCodec`], extracts their search parameters, and stores version and
//! parameter rows in a single [`UnitOfWork`]. Reads decode the stored payload
//! back into a [`Resource`].
//!
//! ```text
//! create/update/delete ──► stamp meta ──► encode ──► extract ──► UnitOfWork
//!                                                                  │
//!                                            ResourceDao::insert ◄─┘ commit ──► promote caches
//!
//! search ──► QueryBuilder ──► count ──► page (ids or rows) ──► _include ──► _summary/_elements
//! ```
//!
//! Versioning is optimistic. The next version number is computed from the
//! previous version the caller saw (or the current row), and the insert fails
//! with [`PersistenceError::VersionConflict`] when another writer stored that
//! version first. Nothing is retried.

mod context;
mod summary;

pub use context::{
    HistoryOutcome, HistoryQuery, PersistenceContext, SearchOutcome, SingleResourceResult,
};

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use helios_database_utils::DatabaseTranslator;
use parking_lot::RwLock;
use rusqlite::Connection;
use uuid::Uuid;

use crate::cache::PersistenceCaches;
use crate::config::PersistenceConfig;
use crate::connection::{ConnectionProvider, SqliteConnectionProvider, UnitOfWork};
use crate::dao::{ParameterDao, ResourceDao};
use crate::error::{PersistenceError, PersistenceResult};
use crate::payload::{GzipJsonCodec, PayloadCodec};
use crate::query::QueryBuilder;
use crate::search::{SearchParameterExtractor, SearchParameterRegistry};
use crate::types::{PageInfo, Resource, ResourceRecord, SearchQuery};

/// Versioned FHIR resource storage and search over a normalized schema.
///
/// # Examples
///
/// ```
/// use helios_persistence_jdbc::persistence::{JdbcPersistence, PersistenceContext};
/// use helios_persistence_jdbc::types::Resource;
/// use serde_json::json;
///
/// let persistence = JdbcPersistence::in_memory().unwrap();
/// let patient = Resource::from_json(json!({
///     "resourceType": "Patient",
///     "name": [{"family": "Smith"}]
/// })).unwrap();
///
/// let created = persistence.create(&patient).unwrap();
/// assert_eq!(created.version_id, 1);
///
/// let read = persistence
///     .read(&PersistenceContext::new(), "Patient", created.logical_id())
///     .unwrap();
/// assert_eq!(read.resource, created.resource);
/// ```
pub struct JdbcPersistence {
    provider: Arc<dyn ConnectionProvider>,
    translator: Arc<dyn DatabaseTranslator>,
    caches: Arc<PersistenceCaches>,
    extractor: SearchParameterExtractor,
    codec: Arc<dyn PayloadCodec>,
    config: PersistenceConfig,
    resources: ResourceDao,
    parameters: ParameterDao,
}

impl Debug for JdbcPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JdbcPersistence")
            .field("provider", &self.provider)
            .field("codec", &self.codec)
            .field("update_create_enabled", &self.config.update_create_enabled)
            .field("search_parameters", &self.extractor.registry().read().len())
            .finish_non_exhaustive()
    }
}

impl JdbcPersistence {
    /// Builds a facade from its collaborators. The schema must already exist.
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        caches: Arc<PersistenceCaches>,
        extractor: SearchParameterExtractor,
        codec: Arc<dyn PayloadCodec>,
        config: PersistenceConfig,
    ) -> Self {
        let translator = provider.translator();
        Self {
            resources: ResourceDao::new(Arc::clone(&translator), Arc::clone(&caches)),
            parameters: ParameterDao::new(Arc::clone(&translator), Arc::clone(&caches)),
            provider,
            translator,
            caches,
            extractor,
            codec,
            config,
        }
    }

    /// Opens the configured SQLite database, creating the schema if needed,
    /// with the built-in search parameters and the gzip JSON codec.
    pub fn open(config: PersistenceConfig) -> PersistenceResult<Self> {
        config
            .validate()
            .map_err(|errors| PersistenceError::invalid_argument(errors.join("; ")))?;

        let provider = SqliteConnectionProvider::with_config(config.sqlite.clone())?;
        provider.init_schema()?;

        let caches = Arc::new(PersistenceCaches::new(&config.cache));
        let registry = Arc::new(RwLock::new(SearchParameterRegistry::with_builtin()));
        tracing::info!(
            search_parameters = registry.read().len(),
            path = %config.sqlite.path,
            "persistence ready"
        );

        Ok(Self::new(
            Arc::new(provider),
            caches,
            SearchParameterExtractor::new(registry),
            Arc::new(GzipJsonCodec::default()),
            config,
        ))
    }

    /// A facade over a private in-memory database with default settings.
    pub fn in_memory() -> PersistenceResult<Self> {
        Self::open(PersistenceConfig::default())
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn extractor(&self) -> &SearchParameterExtractor {
        &self.extractor
    }

    pub fn caches(&self) -> &PersistenceCaches {
        &self.caches
    }

    pub fn is_delete_supported(&self) -> bool {
        true
    }

    pub fn is_transactional(&self) -> bool {
        true
    }

    /// Stores `resource` under a new UUID as version 1. Any id on the
    /// incoming resource is ignored.
    pub fn create(&self, resource: &Resource) -> PersistenceResult<SingleResourceResult> {
        self.guard("create", || {
            let logical_id = Uuid::new_v4().to_string();
            self.store(resource, &logical_id, 1, false)
        })
    }

    /// Stores `resource` as the next version of `logical_id`.
    ///
    /// The previous version comes from the context hint when one is set,
    /// otherwise from the store. Without a previous version the resource is
    /// created at version 1, unless update-as-create is disabled.
    pub fn update(
        &self,
        context: &PersistenceContext,
        logical_id: &str,
        resource: &Resource,
    ) -> PersistenceResult<SingleResourceResult> {
        self.guard("update", || {
            if let Some(id) = resource.id()
                && id != logical_id
            {
                return Err(PersistenceError::invalid_argument(format!(
                    "resource id '{}' does not match '{}'",
                    id, logical_id
                )));
            }

            let previous = match context.previous_resource() {
                Some(Some(previous)) => Some(hinted_version(previous)?),
                Some(None) => None,
                None => {
                    let conn = self.provider.connection()?;
                    self.resources
                        .read(&conn, logical_id, resource.resource_type())?
                        .map(|record| record.version_id)
                }
            };

            let version_id = match previous {
                Some(version) => version + 1,
                None if self.config.update_create_enabled => {
                    tracing::debug!(
                        resource_type = resource.resource_type(),
                        logical_id,
                        "update of unknown resource creates it"
                    );
                    1
                }
                None => return Err(PersistenceError::not_found(resource.resource_type(), logical_id)),
            };

            self.store(resource, logical_id, version_id, false)
        })
    }

    /// Soft-deletes the current version by storing a flagged copy of it as
    /// the next version. Deleting a deleted resource returns it unchanged.
    pub fn delete(&self, resource_type: &str, logical_id: &str) -> PersistenceResult<SingleResourceResult> {
        self.guard("delete", || {
            let current = {
                let conn = self.provider.connection()?;
                self.resources.read(&conn, logical_id, resource_type)?
            }
            .ok_or_else(|| PersistenceError::not_found(resource_type, logical_id))?;

            let resource = self.codec.decode(&current.data)?;
            if current.deleted {
                tracing::debug!(resource_type, logical_id, "resource already deleted");
                return Ok(single_result(&current, resource));
            }

            self.store(&resource, logical_id, current.version_id + 1, true)
        })
    }

    /// The current version.
    pub fn read(
        &self,
        context: &PersistenceContext,
        resource_type: &str,
        logical_id: &str,
    ) -> PersistenceResult<SingleResourceResult> {
        self.guard("read", || {
            let conn = self.provider.connection()?;
            let record = self
                .resources
                .read(&conn, logical_id, resource_type)?
                .ok_or_else(|| PersistenceError::not_found(resource_type, logical_id))?;
            self.render(context, record)
        })
    }

    /// One version. `version` is the textual version id, e.g. from a
    /// `_history/{vid}` path segment.
    pub fn vread(
        &self,
        context: &PersistenceContext,
        resource_type: &str,
        logical_id: &str,
        version: &str,
    ) -> PersistenceResult<SingleResourceResult> {
        self.guard("vread", || {
            let version_id = version
                .trim()
                .parse::<i32>()
                .ok()
                .filter(|v| *v >= 1)
                .ok_or_else(|| {
                    PersistenceError::invalid_argument(format!("invalid version id '{}'", version))
                })?;

            let conn = self.provider.connection()?;
            match self.resources.version_read(&conn, logical_id, resource_type, version_id)? {
                Some(record) => self.render(context, record),
                None if self.resources.read(&conn, logical_id, resource_type)?.is_some() => {
                    Err(PersistenceError::VersionNotFound {
                        resource_type: resource_type.to_string(),
                        logical_id: logical_id.to_string(),
                        version_id,
                    })
                }
                None => Err(PersistenceError::not_found(resource_type, logical_id)),
            }
        })
    }

    /// A page of the versions of one logical resource, newest first.
    pub fn history(
        &self,
        resource_type: &str,
        logical_id: &str,
        query: &HistoryQuery,
    ) -> PersistenceResult<HistoryOutcome> {
        self.guard("history", || {
            let conn = self.provider.connection()?;
            let total = self
                .resources
                .history_count(&conn, resource_type, logical_id, query.since)?;
            if total == 0 && self.resources.read(&conn, logical_id, resource_type)?.is_none() {
                return Err(PersistenceError::not_found(resource_type, logical_id));
            }

            let page_size = self.config.effective_page_size(query.page_size);
            let page = PageInfo::new(query.page_number, page_size, total);
            let records = if page.offset() < total {
                self.resources.history(
                    &conn,
                    resource_type,
                    logical_id,
                    query.since,
                    page.offset(),
                    page_size,
                )?
            } else {
                Vec::new()
            };

            let mut resources = Vec::with_capacity(records.len());
            let mut deleted_versions = Vec::new();
            for record in &records {
                let resource = self.codec.decode(&record.data)?;
                if record.deleted {
                    deleted_versions.push(record.version_id);
                    resources.push(resource.deleted_marker());
                } else {
                    resources.push(resource);
                }
            }

            tracing::debug!(
                resource_type,
                logical_id,
                total,
                returned = resources.len(),
                "history page"
            );
            Ok(HistoryOutcome {
                resources,
                page,
                deleted_versions,
            })
        })
    }

    /// Runs a search and returns one page of matches plus any `_include`d
    /// resources.
    pub fn search(&self, query: &SearchQuery) -> PersistenceResult<SearchOutcome> {
        self.guard("search", || {
            for include in &query.includes {
                if query.resource_type.as_deref() != Some(include.source_type.as_str()) {
                    return Err(PersistenceError::invalid_argument(format!(
                        "_include source type '{}' does not match the searched type",
                        include.source_type
                    )));
                }
            }

            let conn = self.provider.connection()?;
            let registry = self.extractor.registry().read();
            let builder = QueryBuilder::new(
                &conn,
                self.translator.as_ref(),
                &self.parameters,
                &self.resources,
                &registry,
            );

            let total = match builder.build_count_query(query)? {
                Some(count) => self.resources.search_count(&conn, &count)?,
                None => 0,
            };
            let page_size = self.config.effective_page_size(query.page_size);
            let page = PageInfo::new(query.page_number, page_size, total);

            if query.is_count_only() || total == 0 {
                return Ok(SearchOutcome {
                    resources: Vec::new(),
                    included: Vec::new(),
                    page,
                });
            }

            let records = self.fetch_page(&conn, &builder, query, &page)?;
            let page_ids: Vec<i64> = records.iter().filter_map(|r| r.id).collect();

            let mut seen: HashSet<i64> = page_ids.iter().copied().collect();
            let mut included_records = Vec::new();
            for include in &query.includes {
                let Some(sql) = builder.build_include_query(include, &page_ids)? else {
                    continue;
                };
                for record in self.resources.search(&conn, &sql)? {
                    if record.id.is_some_and(|id| seen.insert(id)) {
                        included_records.push(record);
                    }
                }
            }

            let resources = records
                .iter()
                .map(|record| {
                    self.codec
                        .decode(&record.data)
                        .map(|resource| summary::apply(resource, query))
                })
                .collect::<PersistenceResult<Vec<_>>>()?;
            let included = included_records
                .iter()
                .map(|record| self.codec.decode(&record.data))
                .collect::<PersistenceResult<Vec<_>>>()?;

            tracing::debug!(
                resource_type = query.resource_type.as_deref().unwrap_or("*"),
                total,
                returned = resources.len(),
                included = included.len(),
                "search page"
            );
            Ok(SearchOutcome {
                resources,
                included,
                page,
            })
        })
    }

    /// The cache dump followed by a comparison of every cache against its
    /// dictionary table.
    pub fn cache_diagnostics(&self) -> PersistenceResult<String> {
        self.guard("cache_diagnostics", || self.diagnostics_report())
    }

    /// `(resource type, logical resources, versions)` for every stored type.
    pub fn resource_counts(&self) -> PersistenceResult<Vec<(String, i64, i64)>> {
        self.guard("resource_counts", || {
            let conn = self.provider.connection()?;
            self.resources.count_by_type(&conn)
        })
    }

    fn diagnostics_report(&self) -> PersistenceResult<String> {
        let conn = self.provider.connection()?;
        let mut out = self.caches.dump();
        out.push_str(
            &self
                .caches
                .parameter_names
                .report_discrepancies(&self.parameters.read_all_parameter_names(&conn)?),
        );
        out.push_str(
            &self
                .caches
                .code_systems
                .report_discrepancies(&self.parameters.read_all_code_systems(&conn)?),
        );
        out.push_str(
            &self
                .caches
                .resource_types
                .report_discrepancies(&self.resources.read_all_resource_types(&conn)?),
        );
        Ok(out)
    }

    /// The diagnostics logged with a failure. Falls back to the bare cache
    /// dump when the dictionary tables cannot be read.
    fn failure_diagnostics(&self) -> String {
        self.diagnostics_report().unwrap_or_else(|err| {
            format!("{}cache comparison unavailable: {}\n", self.caches.dump(), err)
        })
    }

    fn fetch_page(
        &self,
        conn: &Connection,
        builder: &QueryBuilder<'_>,
        query: &SearchQuery,
        page: &PageInfo,
    ) -> PersistenceResult<Vec<ResourceRecord>> {
        let Some(sql) = builder.build_query(query, page.offset(), page.page_size())? else {
            return Ok(Vec::new());
        };
        match query.resource_type.as_deref() {
            Some(resource_type) if QueryBuilder::uses_id_query(query) => {
                let ids = self.resources.search_for_ids(conn, &sql)?;
                self.resources.search_by_ids(conn, resource_type, &ids)
            }
            _ => self.resources.search(conn, &sql),
        }
    }

    /// Stamps, encodes, indexes and inserts one version.
    fn store(
        &self,
        resource: &Resource,
        logical_id: &str,
        version_id: i32,
        deleted: bool,
    ) -> PersistenceResult<SingleResourceResult> {
        // the stored text carries microseconds; keep the returned value equal to it
        let last_updated = Utc::now().trunc_subsecs(6);
        let stamped = resource.with_identity(logical_id, version_id, last_updated);
        let data = self.codec.encode(&stamped)?;
        let parameters = if deleted {
            Vec::new()
        } else {
            self.extractor.extract(&stamped)
        };

        let mut record = ResourceRecord::new(
            stamped.resource_type(),
            logical_id,
            version_id,
            last_updated,
            data,
        )
        .with_deleted(deleted);

        let mut conn = self.provider.connection()?;
        let mut work = UnitOfWork::begin(&mut conn, self.translator.as_ref())?;
        {
            let (tx, updates) = work.parts();
            self.resources
                .insert(tx, &mut record, &parameters, &self.parameters, updates)?;
        }
        work.commit(self.translator.as_ref(), &self.caches)?;

        tracing::debug!(
            resource_type = stamped.resource_type(),
            logical_id,
            version_id,
            deleted,
            parameters = parameters.len(),
            "stored resource"
        );
        Ok(single_result(&record, stamped))
    }

    fn render(&self, context: &PersistenceContext, record: ResourceRecord) -> PersistenceResult<SingleResourceResult> {
        if record.deleted && !context.include_deleted() {
            return Err(PersistenceError::Deleted {
                resource_type: record.resource_type,
                logical_id: record.logical_id,
                version_id: record.version_id,
            });
        }
        let resource = self.codec.decode(&record.data)?;
        Ok(single_result(&record, resource))
    }

    /// Logs failures that need attention and hides the cause of unexpected
    /// ones from the caller.
    fn guard<T>(
        &self,
        operation: &'static str,
        body: impl FnOnce() -> PersistenceResult<T>,
    ) -> PersistenceResult<T> {
        body().map_err(|err| match err {
            PersistenceError::VersionConflict { .. } => {
                tracing::error!(
                    operation,
                    error = %err,
                    diagnostics = %self.failure_diagnostics(),
                    "version conflict"
                );
                err
            }
            PersistenceError::DataAccess(_) | PersistenceError::Serialization { .. } => {
                tracing::error!(
                    operation,
                    error = ?err,
                    diagnostics = %self.failure_diagnostics(),
                    "unexpected persistence failure"
                );
                PersistenceError::Unexpected { operation }
            }
            other => other,
        })
    }
}

fn single_result(record: &ResourceRecord, resource: Resource) -> SingleResourceResult {
    SingleResourceResult {
        resource,
        version_id: record.version_id,
        last_updated: record.last_updated,
        deleted: record.deleted,
    }
}

fn hinted_version(previous: &Resource) -> PersistenceResult<i32> {
    previous
        .version_id()
        .and_then(|v| v.parse::<i32>().ok())
        .ok_or_else(|| {
            PersistenceError::invalid_argument(format!(
                "previous resource {} carries no usable meta.versionId",
                previous.url()
            ))
        })
}
