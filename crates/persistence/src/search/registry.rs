//! SearchParameter Registry.
//!
//! The registry holds every known SearchParameter definition, indexed by
//! (base resource type, code) and by canonical URL. Parameters whose base is
//! `Resource` or `DomainResource` apply to every resource type.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::SearchParamType;

use super::errors::{LoaderError, RegistryError};
use super::loader::SearchParameterLoader;

/// Base types whose parameters apply to every resource type.
const UNIVERSAL_BASES: [&str; 2] = ["Resource", "DomainResource"];

/// Status of a SearchParameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchParameterStatus {
    #[default]
    Active,
    Draft,
    Retired,
}

impl SearchParameterStatus {
    /// Parse from FHIR status string.
    pub fn from_fhir_status(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(SearchParameterStatus::Active),
            "draft" => Some(SearchParameterStatus::Draft),
            "retired" => Some(SearchParameterStatus::Retired),
            _ => None,
        }
    }

    /// Returns true if this status allows the parameter to be used in searches.
    pub fn is_usable(&self) -> bool {
        *self == SearchParameterStatus::Active
    }
}

/// Where a definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchParameterSource {
    /// Compiled into the crate.
    #[default]
    Builtin,
    /// Parsed from a SearchParameter resource.
    Loaded,
}

/// Definition of a SearchParameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParameterDefinition {
    /// Canonical URL (unique identifier).
    pub url: String,

    /// Parameter code (the URL param name, e.g., "name", "identifier").
    pub code: String,

    pub param_type: SearchParamType,

    /// Path expression selecting the indexed values.
    pub expression: String,

    /// Resource types this parameter applies to.
    pub base: Vec<String>,

    /// Target resource types (for reference parameters).
    pub target: Option<Vec<String>>,

    pub status: SearchParameterStatus,

    pub source: SearchParameterSource,
}

impl SearchParameterDefinition {
    pub fn new(
        url: impl Into<String>,
        code: impl Into<String>,
        param_type: SearchParamType,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            code: code.into(),
            param_type,
            expression: expression.into(),
            base: Vec::new(),
            target: None,
            status: SearchParameterStatus::Active,
            source: SearchParameterSource::Builtin,
        }
    }

    /// Sets the base resource types.
    pub fn with_base<I, S>(mut self, base: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base = base.into_iter().map(Into::into).collect();
        self
    }

    /// Sets target types for reference parameters.
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_status(mut self, status: SearchParameterStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_source(mut self, source: SearchParameterSource) -> Self {
        self.source = source;
        self
    }

    /// Returns whether this parameter applies to the given resource type.
    pub fn applies_to(&self, resource_type: &str) -> bool {
        self.base
            .iter()
            .any(|b| b == resource_type || UNIVERSAL_BASES.contains(&b.as_str()))
    }

    /// Returns whether this parameter applies to every resource type.
    pub fn is_universal(&self) -> bool {
        self.base.iter().any(|b| UNIVERSAL_BASES.contains(&b.as_str()))
    }
}

/// In-memory registry of SearchParameter definitions.
#[derive(Default)]
pub struct SearchParameterRegistry {
    /// Parameters indexed by (base type, param code).
    params_by_type: HashMap<String, HashMap<String, Arc<SearchParameterDefinition>>>,

    /// Parameters indexed by canonical URL.
    params_by_url: HashMap<String, Arc<SearchParameterDefinition>>,
}

impl SearchParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in core parameters.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let count = registry.load_all(&SearchParameterLoader::new());
        tracing::info!(count, "loaded built-in search parameters");
        registry
    }

    pub fn len(&self) -> usize {
        self.params_by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params_by_url.is_empty()
    }

    /// Registers every built-in parameter of `loader`, skipping URLs that are
    /// already registered. Returns the number added.
    pub fn load_all(&mut self, loader: &SearchParameterLoader) -> usize {
        let mut added = 0;
        for param in loader.load_builtin() {
            if !self.params_by_url.contains_key(&param.url) {
                self.register_internal(param);
                added += 1;
            }
        }
        added
    }

    /// Parses SearchParameter resources from JSON and registers them.
    pub fn load_json(&mut self, loader: &SearchParameterLoader, json: &serde_json::Value) -> Result<usize, LoaderError> {
        let params = loader.load_from_json(json)?;
        let mut added = 0;
        for param in params {
            match self.register(param) {
                Ok(()) => added += 1,
                Err(e) => tracing::warn!(error = %e, "skipping SearchParameter"),
            }
        }
        Ok(added)
    }

    /// Active parameters for a resource type, including the universal ones.
    /// A type-specific parameter hides a universal one with the same code.
    pub fn get_active_params(&self, resource_type: &str) -> Vec<Arc<SearchParameterDefinition>> {
        let mut by_code: HashMap<&str, Arc<SearchParameterDefinition>> = HashMap::new();
        for base in UNIVERSAL_BASES.iter().copied().chain(std::iter::once(resource_type)) {
            if let Some(params) = self.params_by_type.get(base) {
                for (code, param) in params {
                    if param.status.is_usable() {
                        by_code.insert(code.as_str(), Arc::clone(param));
                    }
                }
            }
        }
        let mut params: Vec<_> = by_code.into_values().collect();
        params.sort_by(|a, b| a.code.cmp(&b.code));
        params
    }

    /// Looks up an active parameter by resource type and code, falling back to
    /// the universal parameters.
    pub fn get_param(&self, resource_type: &str, code: &str) -> Option<Arc<SearchParameterDefinition>> {
        std::iter::once(resource_type)
            .chain(UNIVERSAL_BASES.iter().copied())
            .filter_map(|base| self.params_by_type.get(base))
            .filter_map(|params| params.get(code))
            .find(|param| param.status.is_usable())
            .cloned()
    }

    /// Looks up an active universal parameter by code.
    pub fn get_universal_param(&self, code: &str) -> Option<Arc<SearchParameterDefinition>> {
        UNIVERSAL_BASES
            .iter()
            .filter_map(|base| self.params_by_type.get(*base))
            .filter_map(|params| params.get(code))
            .find(|param| param.status.is_usable())
            .cloned()
    }

    pub fn get_by_url(&self, url: &str) -> Option<Arc<SearchParameterDefinition>> {
        self.params_by_url.get(url).cloned()
    }

    /// Registers a new parameter.
    pub fn register(&mut self, param: SearchParameterDefinition) -> Result<(), RegistryError> {
        if self.params_by_url.contains_key(&param.url) {
            return Err(RegistryError::DuplicateUrl { url: param.url });
        }
        tracing::debug!(url = %param.url, code = %param.code, "registered search parameter");
        self.register_internal(param);
        Ok(())
    }

    fn register_internal(&mut self, param: SearchParameterDefinition) {
        let param = Arc::new(param);

        self.params_by_url.insert(param.url.clone(), Arc::clone(&param));

        for base in &param.base {
            self.params_by_type
                .entry(base.clone())
                .or_default()
                .insert(param.code.clone(), Arc::clone(&param));
        }
    }

    /// Changes a parameter's status.
    pub fn update_status(&mut self, url: &str, status: SearchParameterStatus) -> Result<(), RegistryError> {
        let old_param = self
            .params_by_url
            .get(url)
            .ok_or_else(|| RegistryError::NotFound {
                identifier: url.to_string(),
            })?;

        let mut updated = (**old_param).clone();
        updated.status = status;
        let updated = Arc::new(updated);

        self.params_by_url.insert(url.to_string(), Arc::clone(&updated));
        for base in &updated.base {
            if let Some(type_params) = self.params_by_type.get_mut(base) {
                type_params.insert(updated.code.clone(), Arc::clone(&updated));
            }
        }
        Ok(())
    }

    /// Removes a parameter.
    pub fn unregister(&mut self, url: &str) -> Result<(), RegistryError> {
        let param = self
            .params_by_url
            .remove(url)
            .ok_or_else(|| RegistryError::NotFound {
                identifier: url.to_string(),
            })?;

        for base in &param.base {
            if let Some(type_params) = self.params_by_type.get_mut(base) {
                type_params.remove(&param.code);
                if type_params.is_empty() {
                    self.params_by_type.remove(base);
                }
            }
        }
        Ok(())
    }

    /// Resource types that have type-specific parameters.
    pub fn resource_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .params_by_type
            .keys()
            .filter(|t| !UNIVERSAL_BASES.contains(&t.as_str()))
            .cloned()
            .collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for SearchParameterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchParameterRegistry")
            .field("params_count", &self.params_by_url.len())
            .field("resource_types", &self.params_by_type.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_param() -> SearchParameterDefinition {
        SearchParameterDefinition::new(
            "http://example.org/sp/test",
            "test",
            SearchParamType::String,
            "Patient.test",
        )
        .with_base(vec!["Patient"])
    }

    #[test]
    fn test_search_parameter_status() {
        assert!(SearchParameterStatus::Active.is_usable());
        assert!(!SearchParameterStatus::Retired.is_usable());
        assert_eq!(
            SearchParameterStatus::from_fhir_status("draft"),
            Some(SearchParameterStatus::Draft)
        );
    }

    #[test]
    fn test_applies_to() {
        let def = test_param();
        assert!(def.applies_to("Patient"));
        assert!(!def.applies_to("Observation"));

        let universal = SearchParameterDefinition::new("u", "_id", SearchParamType::Token, "id")
            .with_base(vec!["Resource"]);
        assert!(universal.applies_to("Observation"));
        assert!(universal.is_universal());
    }

    #[test]
    fn test_registry_operations() {
        let mut registry = SearchParameterRegistry::new();
        registry.register(test_param()).expect("register");
        assert_eq!(registry.len(), 1);
        assert!(registry.get_by_url("http://example.org/sp/test").is_some());
        assert_eq!(registry.get_param("Patient", "test").expect("param").code, "test");

        registry
            .update_status("http://example.org/sp/test", SearchParameterStatus::Retired)
            .expect("status");
        assert!(registry.get_active_params("Patient").is_empty());
        assert!(registry.get_param("Patient", "test").is_none());

        registry.unregister("http://example.org/sp/test").expect("unregister");
        assert!(registry.is_empty());
        assert!(matches!(
            registry.unregister("http://example.org/sp/test"),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_url_error() {
        let mut registry = SearchParameterRegistry::new();
        registry.register(test_param()).expect("register");
        let result = registry.register(test_param());
        assert!(matches!(result, Err(RegistryError::DuplicateUrl { .. })));
    }

    #[test]
    fn test_universal_params_apply_to_every_type() {
        let registry = SearchParameterRegistry::with_builtin();

        let id = registry.get_param("Observation", "_id").expect("_id");
        assert!(id.is_universal());
        assert!(registry.get_param("Observation", "family").is_none());
        assert!(registry.get_universal_param("family").is_none());

        let codes: Vec<String> = registry
            .get_active_params("Patient")
            .iter()
            .map(|p| p.code.clone())
            .collect();
        assert!(codes.contains(&"_lastUpdated".to_string()));
        assert!(codes.contains(&"family".to_string()));
    }
}
