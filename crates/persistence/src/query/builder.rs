//! SQL Query Builder for FHIR Search.
//!
//! Translates a [`SearchQuery`] into statements over the normalized schema.
//! Every filter becomes an `EXISTS` over the parameter table for its type;
//! values within a filter are OR'ed and filters are AND'ed. Only the current,
//! non-deleted version of each logical resource can match.
//!
//! Dictionary lookups happen while building: a parameter name or code system
//! that was never stored means no row can match, so the condition collapses
//! to `1 = 0` without touching the parameter tables.

use helios_database_utils::DatabaseTranslator;
use rusqlite::Connection;

use crate::dao::{ParameterDao, RESOURCE_COLUMNS, RESOURCE_FROM, ResourceDao};
use crate::error::{PersistenceError, PersistenceResult};
use crate::search::{SearchParameterDefinition, SearchParameterRegistry};
use crate::types::{
    IncludeDirective, SearchFilter, SearchModifier, SearchParamType, SearchQuery, SortDirection,
    SortDirective,
};

use super::handlers::{
    DateHandler, NumberHandler, QuantityHandler, ReferenceHandler, StringHandler, SystemMatch,
    TokenHandler, UriHandler,
};
use super::sql::{SqlFragment, SqlParam, SqlQuery};

/// Restricts `R` to the latest version of its logical resource.
const CURRENT_VERSION: &str = "R.version_id = (SELECT MAX(R2.version_id) FROM resources R2
     WHERE R2.resource_type_id = R.resource_type_id AND R2.logical_id = R.logical_id)";

/// Builds search statements against one connection.
pub struct QueryBuilder<'a> {
    conn: &'a Connection,
    translator: &'a dyn DatabaseTranslator,
    parameters: &'a ParameterDao,
    resources: &'a ResourceDao,
    registry: &'a SearchParameterRegistry,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(
        conn: &'a Connection,
        translator: &'a dyn DatabaseTranslator,
        parameters: &'a ParameterDao,
        resources: &'a ResourceDao,
        registry: &'a SearchParameterRegistry,
    ) -> Self {
        Self {
            conn,
            translator,
            parameters,
            resources,
            registry,
        }
    }

    /// Whether [`build_query`](Self::build_query) produces an id-only query
    /// whose rows must be loaded with `search_by_ids`.
    pub fn uses_id_query(query: &SearchQuery) -> bool {
        !query.sort.is_empty() && !query.is_system_level()
    }

    /// `SELECT COUNT(*)` over the matching resources. `None` when no row can
    /// match.
    pub fn build_count_query(&self, query: &SearchQuery) -> PersistenceResult<Option<SqlQuery>> {
        let Some(conditions) = self.build_conditions(query)? else {
            return Ok(None);
        };
        let mut fragment = SqlFragment::new("SELECT COUNT(*) FROM resources R WHERE ");
        fragment.push(conditions);
        Ok(Some(fragment.into()))
    }

    /// One page of matches.
    ///
    /// Sorted type-scoped searches select only `R.resource_id`, ordered by the
    /// sort keys; everything else selects the full resource columns.
    pub fn build_query(&self, query: &SearchQuery, offset: i64, limit: u32) -> PersistenceResult<Option<SqlQuery>> {
        let order_by = self.build_order_by(query)?;
        let Some(conditions) = self.build_conditions(query)? else {
            return Ok(None);
        };

        let mut fragment = if Self::uses_id_query(query) {
            SqlFragment::new("SELECT R.resource_id FROM resources R WHERE ")
        } else {
            SqlFragment::new(format!("SELECT {RESOURCE_COLUMNS} FROM {RESOURCE_FROM} WHERE "))
        };
        fragment.push(conditions);
        fragment.push_sql(" ORDER BY ");
        fragment.push(order_by);
        fragment.push_sql(" ");
        fragment.push_sql(&self.translator.limit_offset(&limit.to_string(), &offset.to_string()));
        Ok(Some(fragment.into()))
    }

    /// Current, non-deleted resources referenced through `include` from the
    /// resources in `page_ids`. `None` when nothing can be included.
    pub fn build_include_query(
        &self,
        include: &IncludeDirective,
        page_ids: &[i64],
    ) -> PersistenceResult<Option<SqlQuery>> {
        let definition = self
            .registry
            .get_param(&include.source_type, &include.search_param)
            .ok_or_else(|| {
                PersistenceError::invalid_argument(format!(
                    "unknown _include parameter '{}:{}'",
                    include.source_type, include.search_param
                ))
            })?;
        if definition.param_type != SearchParamType::Reference {
            return Err(PersistenceError::invalid_argument(format!(
                "_include parameter '{}' is not a reference parameter",
                include.search_param
            )));
        }
        if page_ids.is_empty() {
            return Ok(None);
        }
        let Some(name_id) = self.parameters.read_parameter_name_id(self.conn, &definition.code)? else {
            return Ok(None);
        };

        let placeholders = vec!["?"; page_ids.len()].join(", ");
        let mut params: Vec<SqlParam> = page_ids.iter().map(|id| SqlParam::integer(*id)).collect();
        params.push(SqlParam::integer(name_id));

        let mut sql = format!(
            "SELECT {RESOURCE_COLUMNS} FROM {RESOURCE_FROM}
             WHERE R.is_deleted = 0 AND {CURRENT_VERSION}
               AND EXISTS (SELECT 1 FROM reference_values P
                   WHERE P.resource_id IN ({placeholders}) AND P.parameter_name_id = ?
                     AND P.ref_type = RT.resource_type AND P.ref_logical_id = R.logical_id)"
        );
        if let Some(target) = &include.target_type {
            sql.push_str(" AND RT.resource_type = ?");
            params.push(SqlParam::string(target));
        }
        sql.push_str(" ORDER BY R.resource_id");

        Ok(Some(SqlQuery { sql, params }))
    }

    /// The `WHERE` conditions shared by the count and page queries.
    fn build_conditions(&self, query: &SearchQuery) -> PersistenceResult<Option<SqlFragment>> {
        let mut conditions = Vec::new();

        if let Some(resource_type) = &query.resource_type {
            let Some(type_id) = self.resources.read_resource_type_id(self.conn, resource_type)? else {
                tracing::debug!(resource_type = %resource_type, "no resources of this type stored");
                // filters are still validated so a bad request fails the same way
                for filter in &query.filters {
                    self.definition(query, &filter.name)?;
                }
                return Ok(None);
            };
            conditions.push(SqlFragment::with_params(
                "R.resource_type_id = ?",
                vec![SqlParam::integer(type_id)],
            ));
        }
        conditions.push(SqlFragment::new("R.is_deleted = 0"));
        conditions.push(SqlFragment::new(CURRENT_VERSION));

        for filter in &query.filters {
            if let Some(condition) = self.build_filter(query, filter)? {
                conditions.push(condition);
            }
        }

        Ok(Some(SqlFragment::and_all(conditions)))
    }

    fn definition(&self, query: &SearchQuery, code: &str) -> PersistenceResult<std::sync::Arc<SearchParameterDefinition>> {
        let found = match &query.resource_type {
            Some(resource_type) => self.registry.get_param(resource_type, code),
            None => self.registry.get_universal_param(code),
        };
        found.ok_or_else(|| {
            PersistenceError::invalid_argument(format!(
                "unknown search parameter '{}' for {}",
                code,
                query.resource_type.as_deref().unwrap_or("system-level search")
            ))
        })
    }

    fn build_filter(&self, query: &SearchQuery, filter: &SearchFilter) -> PersistenceResult<Option<SqlFragment>> {
        let definition = self.definition(query, &filter.name)?;
        let modifier = filter.modifier.as_ref();
        if let Some(m) = modifier {
            if !m.is_valid_for(definition.param_type) {
                return Err(PersistenceError::invalid_argument(format!(
                    "modifier ':{}' is not supported for {} parameter '{}'",
                    m, definition.param_type, filter.name
                )));
            }
        }

        let values: Vec<&str> = filter.values.iter().map(String::as_str).filter(|v| !v.is_empty()).collect();
        if values.is_empty() {
            return Ok(None);
        }

        let missing = match (modifier, values.as_slice()) {
            (Some(SearchModifier::Missing), ["true"]) => Some(true),
            (Some(SearchModifier::Missing), ["false"]) => Some(false),
            (Some(SearchModifier::Missing), _) => {
                return Err(PersistenceError::invalid_argument(format!(
                    "':missing' on '{}' must be true or false",
                    filter.name
                )));
            }
            _ => None,
        };

        match filter.name.as_str() {
            // every stored resource has an id and a lastUpdated
            "_id" | "_lastUpdated" if missing.is_some() => {
                return Ok(Some(if missing == Some(true) {
                    SqlFragment::never()
                } else {
                    SqlFragment::always()
                }));
            }
            "_id" => return Ok(Some(Self::build_id_filter(&values, modifier))),
            "_lastUpdated" => {
                let conditions = values
                    .iter()
                    .map(|v| DateHandler::build_sql(v, "R.last_updated", "R.last_updated"))
                    .collect::<PersistenceResult<Vec<_>>>()?;
                return Ok(Some(SqlFragment::or_all(conditions)));
            }
            _ => {}
        }

        let table = table_for(&definition)?;

        if let Some(missing) = missing {
            let Some(name_id) = self.parameters.read_parameter_name_id(self.conn, &definition.code)? else {
                return Ok(Some(if missing { SqlFragment::always() } else { SqlFragment::never() }));
            };
            let keyword = if missing { "NOT EXISTS" } else { "EXISTS" };
            return Ok(Some(SqlFragment::with_params(
                format!(
                    "{keyword} (SELECT 1 FROM {table} P WHERE P.resource_id = R.resource_id AND P.parameter_name_id = ?)"
                ),
                vec![SqlParam::integer(name_id)],
            )));
        }

        let negate = modifier == Some(&SearchModifier::Not);
        let Some(name_id) = self.parameters.read_parameter_name_id(self.conn, &definition.code)? else {
            return Ok(Some(if negate { SqlFragment::always() } else { SqlFragment::never() }));
        };

        let value_conditions = values
            .iter()
            .map(|value| self.build_value(&definition, value, modifier))
            .collect::<PersistenceResult<Vec<_>>>()?;

        let mut fragment = SqlFragment::with_params(
            format!(
                "{} (SELECT 1 FROM {table} P WHERE P.resource_id = R.resource_id AND P.parameter_name_id = ? AND (",
                if negate { "NOT EXISTS" } else { "EXISTS" }
            ),
            vec![SqlParam::integer(name_id)],
        );
        fragment.push(SqlFragment::or_all(value_conditions));
        fragment.push_sql("))");
        Ok(Some(fragment))
    }

    fn build_id_filter(values: &[&str], modifier: Option<&SearchModifier>) -> SqlFragment {
        let placeholders = vec!["?"; values.len()].join(", ");
        let operator = if modifier == Some(&SearchModifier::Not) { "NOT IN" } else { "IN" };
        SqlFragment::with_params(
            format!("R.logical_id {operator} ({placeholders})"),
            values.iter().map(|v| SqlParam::string(*v)).collect(),
        )
    }

    fn build_value(
        &self,
        definition: &SearchParameterDefinition,
        value: &str,
        modifier: Option<&SearchModifier>,
    ) -> PersistenceResult<SqlFragment> {
        match definition.param_type {
            SearchParamType::String => Ok(StringHandler::build_sql(value, modifier)),
            SearchParamType::Token => {
                let (system, code) = TokenHandler::parse(value)?;
                Ok(TokenHandler::build_sql(self.system_match(system)?, code))
            }
            SearchParamType::Number => {
                let (prefix, number) = NumberHandler::parse(value)?;
                NumberHandler::build_sql(prefix, number, "P.number_value")
            }
            SearchParamType::Quantity => {
                let quantity = QuantityHandler::parse(value)?;
                let system = self.system_match(quantity.system)?;
                QuantityHandler::build_sql(&quantity, system)
            }
            SearchParamType::Date => DateHandler::build_sql(value, "P.date_start", "P.date_end"),
            SearchParamType::Reference => Ok(ReferenceHandler::build_sql(value, modifier)),
            SearchParamType::Uri => Ok(UriHandler::build_sql(value)),
            SearchParamType::Composite | SearchParamType::Special => Err(unsupported(definition)),
        }
    }

    fn system_match(&self, system: Option<&str>) -> PersistenceResult<SystemMatch> {
        Ok(match system {
            None => SystemMatch::Any,
            Some("") => SystemMatch::Absent,
            Some(system) => match self.parameters.read_code_system_id(self.conn, system)? {
                Some(id) => SystemMatch::Id(id),
                None => SystemMatch::Unknown,
            },
        })
    }

    /// `ORDER BY` terms, always ending with the surrogate id so paging is
    /// stable.
    fn build_order_by(&self, query: &SearchQuery) -> PersistenceResult<SqlFragment> {
        let mut terms = Vec::new();
        for directive in &query.sort {
            if let Some(term) = self.build_sort_key(query, directive)? {
                terms.push(term);
            }
        }

        let mut order_by = SqlFragment::default();
        for term in terms {
            order_by.push(term);
            order_by.push_sql(", ");
        }
        order_by.push_sql("R.resource_id ASC");
        Ok(order_by)
    }

    fn build_sort_key(&self, query: &SearchQuery, directive: &SortDirective) -> PersistenceResult<Option<SqlFragment>> {
        let direction = match directive.direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };
        match directive.parameter.as_str() {
            "_id" => return Ok(Some(SqlFragment::new(format!("R.logical_id {direction}")))),
            "_lastUpdated" => return Ok(Some(SqlFragment::new(format!("R.last_updated {direction}")))),
            _ if query.is_system_level() => {
                return Err(PersistenceError::invalid_argument(format!(
                    "system-level searches can only sort by _id or _lastUpdated, not '{}'",
                    directive.parameter
                )));
            }
            _ => {}
        }

        let definition = self.definition(query, &directive.parameter)?;
        let table = table_for(&definition)?;
        let column = match (definition.param_type, directive.direction) {
            (SearchParamType::String, _) => "str_value_lcase",
            (SearchParamType::Number, _) => "number_value",
            (SearchParamType::Date, SortDirection::Ascending) => "date_start",
            (SearchParamType::Date, SortDirection::Descending) => "date_end",
            (SearchParamType::Token, _) => "token_value",
            (SearchParamType::Quantity, _) => "quantity_value",
            (SearchParamType::Reference, _) => "ref_value",
            (SearchParamType::Uri, _) => "uri_value",
            (SearchParamType::Composite | SearchParamType::Special, _) => {
                return Err(unsupported(&definition));
            }
        };
        let aggregate = match directive.direction {
            SortDirection::Ascending => "MIN",
            SortDirection::Descending => "MAX",
        };

        let Some(name_id) = self.parameters.read_parameter_name_id(self.conn, &definition.code)? else {
            // nothing indexed under this name; every key would be NULL
            return Ok(None);
        };
        Ok(Some(SqlFragment::with_params(
            format!(
                "(SELECT {aggregate}(P.{column}) FROM {table} P
                  WHERE P.resource_id = R.resource_id AND P.parameter_name_id = ?) {direction} NULLS LAST"
            ),
            vec![SqlParam::integer(name_id)],
        )))
    }
}

fn unsupported(definition: &SearchParameterDefinition) -> PersistenceError {
    PersistenceError::invalid_argument(format!(
        "{} search parameter '{}' is not supported",
        definition.param_type, definition.code
    ))
}

/// Parameter table holding rows of the definition's type.
fn table_for(definition: &SearchParameterDefinition) -> PersistenceResult<&'static str> {
    Ok(match definition.param_type {
        SearchParamType::String => "str_values",
        SearchParamType::Number => "number_values",
        SearchParamType::Date => "date_values",
        SearchParamType::Token => "token_values",
        SearchParamType::Quantity => "quantity_values",
        SearchParamType::Reference => "reference_values",
        SearchParamType::Uri => "uri_values",
        SearchParamType::Composite | SearchParamType::Special => return Err(unsupported(definition)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::cache::{CacheUpdates, PersistenceCaches};
    use crate::schema::initialize_schema;
    use crate::types::{SearchFilter, SortDirective};
    use helios_database_utils::SqliteTranslator;

    struct Fixture {
        conn: Connection,
        translator: Arc<dyn DatabaseTranslator>,
        parameters: ParameterDao,
        resources: ResourceDao,
        registry: SearchParameterRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let translator: Arc<dyn DatabaseTranslator> = Arc::new(SqliteTranslator);
            let caches = Arc::new(PersistenceCaches::default());
            let conn = Connection::open_in_memory().expect("open");
            initialize_schema(&conn, translator.as_ref()).expect("schema");
            Self {
                conn,
                parameters: ParameterDao::new(Arc::clone(&translator), Arc::clone(&caches)),
                resources: ResourceDao::new(Arc::clone(&translator), caches),
                translator,
                registry: SearchParameterRegistry::with_builtin(),
            }
        }

        fn builder(&self) -> QueryBuilder<'_> {
            QueryBuilder::new(
                &self.conn,
                self.translator.as_ref(),
                &self.parameters,
                &self.resources,
                &self.registry,
            )
        }

        fn register_names(&self, names: &[&str]) {
            let mut updates = CacheUpdates::default();
            for name in names {
                self.parameters
                    .read_or_add_parameter_name(&self.conn, name, &mut updates)
                    .expect("name");
            }
            self.conn
                .execute("INSERT INTO resource_types (resource_type) VALUES ('Patient')", [])
                .expect("type");
        }
    }

    #[test]
    fn test_unknown_type_yields_no_query() {
        let fixture = Fixture::new();
        let query = SearchQuery::new("Patient");
        assert!(fixture.builder().build_count_query(&query).expect("build").is_none());
    }

    #[test]
    fn test_unknown_parameter_is_invalid() {
        let fixture = Fixture::new();
        fixture.register_names(&[]);
        let query = SearchQuery::new("Patient").with_filter(SearchFilter::new("shoe-size", ["9"]));
        let err = fixture.builder().build_count_query(&query).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidArgument { .. }));
    }

    #[test]
    fn test_filters_are_exists_clauses() {
        let fixture = Fixture::new();
        fixture.register_names(&["family", "gender"]);
        let query = SearchQuery::new("Patient")
            .with_filter(SearchFilter::new("family", ["Smith", "Jones"]))
            .with_filter(SearchFilter::new("gender", ["male"]));

        let count = fixture.builder().build_count_query(&query).expect("build").expect("query");
        assert!(count.sql.starts_with("SELECT COUNT(*) FROM resources R WHERE "));
        assert_eq!(count.sql.matches("EXISTS (SELECT 1 FROM str_values P").count(), 1);
        assert_eq!(count.sql.matches("EXISTS (SELECT 1 FROM token_values P").count(), 1);
        assert_eq!(count.sql.matches('?').count(), count.params.len());
    }

    #[test]
    fn test_never_indexed_name_matches_nothing() {
        let fixture = Fixture::new();
        fixture.register_names(&[]);
        let query = SearchQuery::new("Patient").with_filter(SearchFilter::new("family", ["Smith"]));
        let count = fixture.builder().build_count_query(&query).expect("build").expect("query");
        assert!(count.sql.contains("1 = 0"));

        let query = SearchQuery::new("Patient")
            .with_filter(SearchFilter::new("family", ["true"]).with_modifier(SearchModifier::Missing));
        let count = fixture.builder().build_count_query(&query).expect("build").expect("query");
        assert!(count.sql.contains("1 = 1"));
    }

    #[test]
    fn test_missing_on_resource_columns() {
        let fixture = Fixture::new();
        fixture.register_names(&[]);
        let missing = |name: &str, value: &str| {
            let query = SearchQuery::new("Patient")
                .with_filter(SearchFilter::new(name, [value]).with_modifier(SearchModifier::Missing));
            fixture.builder().build_count_query(&query)
        };

        let sql = missing("_id", "true").expect("build").expect("query").sql;
        assert!(sql.contains("1 = 0"));
        assert!(!sql.contains("logical_id IN"));
        let sql = missing("_lastUpdated", "false").expect("build").expect("query").sql;
        assert!(sql.contains("1 = 1"));
        assert!(!sql.contains("R.last_updated"));

        let err = missing("_id", "abc").unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidArgument { .. }));
    }

    #[test]
    fn test_sorted_type_search_uses_id_query() {
        let fixture = Fixture::new();
        fixture.register_names(&["birthdate"]);
        let query = SearchQuery::new("Patient").with_sort(SortDirective::parse("-birthdate"));
        assert!(QueryBuilder::uses_id_query(&query));

        let page = fixture.builder().build_query(&query, 20, 10).expect("build").expect("query");
        assert!(page.sql.starts_with("SELECT R.resource_id FROM resources R"));
        assert!(page.sql.contains("MAX(P.date_end)"));
        assert!(page.sql.contains("DESC NULLS LAST, R.resource_id ASC"));
        assert!(page.sql.ends_with("LIMIT 10 OFFSET 20"));
    }

    #[test]
    fn test_system_level_sort_restrictions() {
        let fixture = Fixture::new();
        let ok = SearchQuery::system().with_sort(SortDirective::parse("_lastUpdated"));
        assert!(!QueryBuilder::uses_id_query(&ok));
        let page = fixture.builder().build_query(&ok, 0, 10).expect("build").expect("query");
        assert!(page.sql.contains("ORDER BY R.last_updated ASC, R.resource_id ASC"));

        let bad = SearchQuery::system().with_sort(SortDirective::parse("family"));
        assert!(fixture.builder().build_query(&bad, 0, 10).is_err());

        let bad_filter = SearchQuery::system().with_filter(SearchFilter::new("family", ["x"]));
        assert!(fixture.builder().build_count_query(&bad_filter).is_err());
    }

    #[test]
    fn test_include_requires_reference_parameter() {
        let fixture = Fixture::new();
        let include = IncludeDirective::parse("Observation:status").expect("parse");
        assert!(fixture.builder().build_include_query(&include, &[1]).is_err());

        let include = IncludeDirective::parse("Observation:subject:Patient").expect("parse");
        // name never indexed
        assert!(fixture.builder().build_include_query(&include, &[1]).expect("build").is_none());
    }
}
