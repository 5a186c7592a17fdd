//! Helios FHIR Server Normalized Persistence
//!
//! This crate stores FHIR resources as compressed, versioned rows in a
//! relational database and indexes their search parameters into a normalized
//! schema, one table per parameter type. Searches are translated into SQL over
//! those tables.
//!
//! # Features
//!
//! - **Versioning**: every create, update and delete appends a version;
//!   concurrent writers of the same version get a version conflict
//! - **Search**: string, token, number, date, reference, quantity and uri
//!   parameters, with modifiers, prefixes, sorting, paging and `_include`
//! - **Normalized dictionaries**: parameter names, code systems and resource
//!   types are stored once and cached in process
//! - **Dialect translation**: database errors are classified through
//!   [`helios_database_utils::DatabaseTranslator`]
//!
//! Available features:
//! - `sqlite` (default) - SQLite through an `r2d2` connection pool
//! - `cli` - the `helios-jdbc-admin` binary
//!
//! # Architecture
//!
//! - [`persistence`] - the [`JdbcPersistence`] facade
//! - [`search`] - search parameter definitions and value extraction
//! - [`query`] - SQL generation for search requests
//! - [`dao`] - data access objects for resources, parameters and dictionaries
//! - [`cache`] - dictionary caches
//! - [`connection`] - connection provisioning and the write unit of work
//! - [`types`] - resources, records and search requests
//! - [`error`] - error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use helios_persistence_jdbc::persistence::{HistoryQuery, JdbcPersistence, PersistenceContext};
//! use helios_persistence_jdbc::types::{Resource, SearchFilter, SearchQuery};
//! use serde_json::json;
//!
//! let persistence = JdbcPersistence::in_memory().unwrap();
//!
//! let patient = Resource::from_json(json!({
//!     "resourceType": "Patient",
//!     "identifier": [{"system": "http://example.org/mrn", "value": "12345"}],
//!     "name": [{"family": "Smith", "given": ["John"]}]
//! })).unwrap();
//! let created = persistence.create(&patient).unwrap();
//! let id = created.logical_id().to_string();
//!
//! let ctx = PersistenceContext::new();
//! let updated = persistence.update(&ctx, &id, &created.resource).unwrap();
//! assert_eq!(updated.version_id, 2);
//!
//! let found = persistence
//!     .search(&SearchQuery::new("Patient")
//!         .with_filter(SearchFilter::new("identifier", ["http://example.org/mrn|12345"])))
//!     .unwrap();
//! assert_eq!(found.total(), 1);
//!
//! let history = persistence.history("Patient", &id, &HistoryQuery::new()).unwrap();
//! assert_eq!(history.page.total_count(), 2);
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

pub mod cache;
pub mod config;
pub mod error;
pub mod payload;
pub mod search;
pub mod types;

#[cfg(feature = "sqlite")]
pub mod connection;
#[cfg(feature = "sqlite")]
pub mod dao;
#[cfg(feature = "sqlite")]
pub mod persistence;
#[cfg(feature = "sqlite")]
pub mod query;
#[cfg(feature = "sqlite")]
pub mod schema;

// Re-export commonly used types at crate root
pub use cache::PersistenceCaches;
pub use config::PersistenceConfig;
pub use error::{PersistenceError, PersistenceResult};
pub use payload::{GzipJsonCodec, PayloadCodec};
pub use types::{Resource, SearchQuery};

#[cfg(feature = "sqlite")]
pub use connection::{ConnectionProvider, SqliteConnectionProvider};
#[cfg(feature = "sqlite")]
pub use persistence::{JdbcPersistence, PersistenceContext};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
