//! Search parameter definitions and value extraction.
//!
//! - [`registry`] - in-memory registry of SearchParameter definitions
//! - [`loader`] - built-in parameters and SearchParameter resource parsing
//! - [`path`] - the path evaluator seam and its simple default implementation
//! - [`builder`] - turns selected path nodes into typed parameter rows
//! - [`extractor`] - runs every active parameter against a resource
//! - [`date`] - partial date/time range expansion
//! - [`errors`] - search-specific error types
//!
//! # Extraction
//!
//! ```text
//! Resource ──> registry.get_active_params(type)
//!                 └── for each definition
//!                       PathEvaluator::evaluate(expression) -> [PathNode]
//!                       ParameterBuilder::build(node)       -> [ParameterRecord]
//! ```
//!
//! A definition whose expression cannot be evaluated is skipped with a
//! warning; the resource is still stored with the rows that could be built.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use helios_persistence_jdbc::search::{SearchParameterExtractor, SearchParameterRegistry};
//! use helios_persistence_jdbc::types::Resource;
//! use parking_lot::RwLock;
//! use serde_json::json;
//!
//! let registry = Arc::new(RwLock::new(SearchParameterRegistry::with_builtin()));
//! let extractor = SearchParameterExtractor::new(registry);
//!
//! let patient = Resource::from_json(json!({
//!     "resourceType": "Patient",
//!     "identifier": [{"system": "http://hospital.org/mrn", "value": "12345"}]
//! })).unwrap();
//!
//! let rows = extractor.extract(&patient);
//! assert!(rows.iter().any(|r| r.name == "identifier"));
//! ```

pub mod builder;
pub mod date;
pub mod errors;
pub mod extractor;
pub mod loader;
pub mod path;
pub mod registry;

pub use builder::ParameterBuilder;
pub use date::{max_instant, min_instant, parse_date_range, parse_time_range};
pub use errors::{LoaderError, PathError, RegistryError};
pub use extractor::SearchParameterExtractor;
pub use loader::SearchParameterLoader;
pub use path::{ElementKind, PathEvaluator, PathNode, PrimitiveValue, SimplePathEvaluator, reference_type};
pub use registry::{
    SearchParameterDefinition, SearchParameterRegistry, SearchParameterSource,
    SearchParameterStatus,
};
