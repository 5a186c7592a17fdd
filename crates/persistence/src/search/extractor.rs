//! SearchParameter Value Extractor.
//!
//! Evaluates every active parameter's expression against a resource and turns
//! the selected nodes into [`ParameterRecord`]s. Extraction is best-effort: a
//! parameter whose expression fails to evaluate is logged and skipped, and the
//! rest of the resource is still indexed.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{ParameterRecord, Resource, SearchParamType};

use super::builder::ParameterBuilder;
use super::path::{PathEvaluator, SimplePathEvaluator};
use super::registry::{SearchParameterDefinition, SearchParameterRegistry};

/// Parameters answered from resource columns rather than index rows.
const COLUMN_PARAMETERS: [&str; 2] = ["_id", "_lastUpdated"];

/// Extracts search parameter rows from resources.
#[derive(Debug, Clone)]
pub struct SearchParameterExtractor {
    registry: Arc<RwLock<SearchParameterRegistry>>,
    evaluator: Arc<dyn PathEvaluator>,
}

impl SearchParameterExtractor {
    /// Creates an extractor using the built-in path evaluator.
    pub fn new(registry: Arc<RwLock<SearchParameterRegistry>>) -> Self {
        Self::with_evaluator(registry, Arc::new(SimplePathEvaluator::new()))
    }

    pub fn with_evaluator(
        registry: Arc<RwLock<SearchParameterRegistry>>,
        evaluator: Arc<dyn PathEvaluator>,
    ) -> Self {
        Self {
            registry,
            evaluator,
        }
    }

    pub fn registry(&self) -> &Arc<RwLock<SearchParameterRegistry>> {
        &self.registry
    }

    /// Extracts the full parameter set for one resource version.
    pub fn extract(&self, resource: &Resource) -> Vec<ParameterRecord> {
        let resource_type = resource.resource_type();
        let params = self.registry.read().get_active_params(resource_type);

        let mut rows = Vec::new();
        for param in params.iter().filter(|p| is_indexed(p)) {
            rows.extend(self.extract_for_param(resource, param));
        }

        tracing::debug!(
            resource_type,
            parameters = params.len(),
            rows = rows.len(),
            "extracted search parameters"
        );
        rows
    }

    /// Rows for a single parameter. Evaluation failures yield no rows.
    pub fn extract_for_param(
        &self,
        resource: &Resource,
        param: &SearchParameterDefinition,
    ) -> Vec<ParameterRecord> {
        let nodes = match self.evaluator.evaluate(resource, &param.expression) {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!(
                    parameter = %param.code,
                    resource_type = resource.resource_type(),
                    error = %e,
                    "skipping search parameter"
                );
                return Vec::new();
            }
        };

        let builder = ParameterBuilder::new(param, resource.resource_type());
        nodes.iter().flat_map(|node| builder.build(node)).collect()
    }
}

fn is_indexed(param: &SearchParameterDefinition) -> bool {
    !param.expression.is_empty()
        && !COLUMN_PARAMETERS.contains(&param.code.as_str())
        && !matches!(param.param_type, SearchParamType::Composite | SearchParamType::Special)
}
