//! Core types for the persistence layer.
//!
//! - [`Resource`] - a validated, immutable FHIR resource value
//! - [`ResourceRecord`], [`ParameterRecord`] - rows as stored in the database
//! - [`SearchQuery`] and friends - a parsed search request
//! - [`PageInfo`] - offset pagination arithmetic
//!
//! # Building a Search Query
//!
//! ```
//! use helios_persistence_jdbc::types::{SearchFilter, SearchQuery, SortDirective};
//!
//! let query = SearchQuery::new("Patient")
//!     .with_filter(SearchFilter::new("family", ["Smith"]))
//!     .with_sort(SortDirective::parse("-_lastUpdated"))
//!     .with_page(2, 20);
//!
//! assert_eq!(query.page_number, 2);
//! assert!(!query.is_system_level());
//! ```

mod pagination;
mod record;
mod resource;
mod search_params;

pub use pagination::{PageInfo, last_page_number, page_offset};
pub use record::{ParameterRecord, ParameterValue, ResourceRecord};
pub use resource::{Resource, format_instant};
pub use search_params::{
    IncludeDirective, SearchFilter, SearchModifier, SearchParamType, SearchPrefix, SearchQuery,
    SortDirection, SortDirective, SummaryMode,
};
