//! Error types for the persistence layer.
//!
//! Database failures arrive here already classified by the dialect translator
//! (see [`helios_database_utils::DataAccessError`]). This module maps them onto
//! the outcomes callers of the persistence facade care about: the resource is
//! missing, the resource is deleted, another writer won a version race, or the
//! database is unavailable.
//!
//! Display strings never include raw database messages. The translated error is
//! kept as the `source` where one exists, so logs can still show the driver text.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use helios_database_utils::{DataAccessError, DataAccessKind};
use thiserror::Error;

/// The error type for all persistence operations.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// No such logical resource.
    #[error("resource not found: {resource_type}/{logical_id}")]
    NotFound {
        resource_type: String,
        logical_id: String,
    },

    /// The logical resource exists but not at the requested version.
    #[error("version not found: {resource_type}/{logical_id}/_history/{version_id}")]
    VersionNotFound {
        resource_type: String,
        logical_id: String,
        version_id: i32,
    },

    /// The resource (or the requested version) is a soft delete.
    #[error("resource deleted: {resource_type}/{logical_id} (version {version_id})")]
    Deleted {
        resource_type: String,
        logical_id: String,
        version_id: i32,
    },

    /// Another writer stored this version first.
    #[error("version conflict: {resource_type}/{logical_id} version {version_id} cannot be stored")]
    VersionConflict {
        resource_type: String,
        logical_id: String,
        version_id: i32,
        #[source]
        source: Option<DataAccessError>,
    },

    #[error("database connection error")]
    Connection(#[source] DataAccessError),

    #[error("lock wait timed out")]
    LockTimeout(#[source] DataAccessError),

    #[error("deadlock detected")]
    Deadlock(#[source] DataAccessError),

    #[error("data access error: {0}")]
    DataAccess(#[source] DataAccessError),

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Catch-all for failures with no better classification. The cause is
    /// logged where it happens and is not carried.
    #[error("unexpected error while performing the {operation} operation")]
    Unexpected { operation: &'static str },
}

impl PersistenceError {
    pub fn not_found(resource_type: impl Into<String>, logical_id: impl Into<String>) -> Self {
        PersistenceError::NotFound {
            resource_type: resource_type.into(),
            logical_id: logical_id.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        PersistenceError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        PersistenceError::Serialization {
            message: message.into(),
        }
    }

    /// Returns true if the caller may reasonably repeat the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PersistenceError::VersionConflict { .. }
                | PersistenceError::Connection(_)
                | PersistenceError::LockTimeout(_)
                | PersistenceError::Deadlock(_)
        )
    }

    /// Returns true for the conditions a caller is expected to handle as part
    /// of normal operation, as opposed to infrastructure failures.
    pub fn is_client_condition(&self) -> bool {
        matches!(
            self,
            PersistenceError::NotFound { .. }
                | PersistenceError::VersionNotFound { .. }
                | PersistenceError::Deleted { .. }
                | PersistenceError::VersionConflict { .. }
                | PersistenceError::InvalidArgument { .. }
        )
    }
}

impl From<DataAccessError> for PersistenceError {
    fn from(err: DataAccessError) -> Self {
        match err.kind() {
            DataAccessKind::Connection => PersistenceError::Connection(err),
            DataAccessKind::LockTimeout => PersistenceError::LockTimeout(err),
            DataAccessKind::Deadlock => PersistenceError::Deadlock(err),
            _ => PersistenceError::DataAccess(err),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for PersistenceError {
    fn from(err: r2d2::Error) -> Self {
        PersistenceError::Connection(DataAccessError::Connection(
            helios_database_utils::SqlError::new(err.to_string()),
        ))
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::serialization(err.to_string())
    }
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Classifies a driver error with the dialect translator.
#[cfg(feature = "sqlite")]
pub(crate) fn translate_sql(
    translator: &dyn helios_database_utils::DatabaseTranslator,
    err: rusqlite::Error,
) -> PersistenceError {
    translator
        .translate(helios_database_utils::SqlError::from(&err))
        .into()
}
