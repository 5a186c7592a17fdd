//! Helios Database Utilities
//!
//! Dialect translation for the Helios FHIR persistence layer. Every supported
//! database product reports failures with its own SQLSTATE values and vendor
//! codes; a [`DatabaseTranslator`] folds those into the portable
//! [`DataAccessError`] taxonomy so the persistence code above it can react to
//! duplicates, lock contention or lost connections without knowing which
//! database it is talking to.
//!
//! Translators also generate the handful of SQL fragments that differ between
//! products (row locking, sequences, pagination, timestamp arithmetic).
//!
//! # Example
//!
//! ```
//! use helios_database_utils::{DatabaseTranslator, DataAccessKind, Db2Translator, SqlError};
//!
//! let translator = Db2Translator;
//! let err = SqlError::new("duplicate row").with_sql_state("23505");
//!
//! assert!(translator.is_duplicate(&err));
//! assert_eq!(translator.translate(err).kind(), DataAccessKind::Duplicate);
//! ```
//!
//! # Features
//!
//! - `sqlite` (default) - conversion from `rusqlite::Error` into [`SqlError`]

pub mod dialect;
pub mod error;
pub mod translator;

pub use dialect::{DerbyTranslator, Db2Translator, PostgresTranslator, SqliteTranslator};
pub use error::{DataAccessError, DataAccessKind, SqlError};
pub use translator::{ConnectionDetails, DatabaseTranslator, DbType, translator_for};
