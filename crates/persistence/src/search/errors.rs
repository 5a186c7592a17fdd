//! Search-specific error types.
//!
//! - [`LoaderError`] - parsing SearchParameter resources
//! - [`RegistryError`] - registry operations
//! - [`PathError`] - evaluating path expressions during extraction

#![allow(missing_docs)]

use thiserror::Error;

use crate::error::PersistenceError;

/// Error during SearchParameter loading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("invalid SearchParameter{}: {message}", url.as_ref().map(|u| format!(" '{}'", u)).unwrap_or_default())]
    InvalidResource { message: String, url: Option<String> },

    #[error("SearchParameter{} missing required field '{field}'", url.as_ref().map(|u| format!(" '{}'", u)).unwrap_or_default())]
    MissingField { field: String, url: Option<String> },

    #[error("invalid SearchParameter JSON: {message}")]
    InvalidJson { message: String },
}

/// Error during registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("SearchParameter with URL '{url}' already registered")]
    DuplicateUrl { url: String },

    #[error("SearchParameter '{identifier}' not found")]
    NotFound { identifier: String },
}

/// Error while evaluating a path expression against a resource.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("cannot parse expression '{expression}': {message}")]
    Parse { expression: String, message: String },

    #[error("function '{function}' is not supported in '{expression}'")]
    UnsupportedFunction { expression: String, function: String },
}

impl From<LoaderError> for PersistenceError {
    fn from(err: LoaderError) -> Self {
        PersistenceError::invalid_argument(err.to_string())
    }
}

impl From<RegistryError> for PersistenceError {
    fn from(err: RegistryError) -> Self {
        PersistenceError::invalid_argument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_error_display() {
        let err = LoaderError::MissingField {
            field: "code".to_string(),
            url: Some("http://example.org/sp".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "SearchParameter 'http://example.org/sp' missing required field 'code'"
        );

        let err = LoaderError::InvalidResource {
            message: "bad type".to_string(),
            url: None,
        };
        assert_eq!(err.to_string(), "invalid SearchParameter: bad type");
    }

    #[test]
    fn test_registry_error_is_invalid_argument() {
        let err: PersistenceError = RegistryError::DuplicateUrl {
            url: "http://example.org/sp".to_string(),
        }
        .into();
        assert!(matches!(err, PersistenceError::InvalidArgument { .. }));
    }
}
