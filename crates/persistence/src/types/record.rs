//! Row-level data transfer types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::SearchParamType;

/// One stored version of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Surrogate key, assigned when the row is inserted.
    pub id: Option<i64>,
    pub resource_type: String,
    pub logical_id: String,
    pub version_id: i32,
    pub last_updated: DateTime<Utc>,
    /// Compressed, serialized resource.
    pub data: Vec<u8>,
    pub deleted: bool,
}

impl ResourceRecord {
    pub fn new(
        resource_type: impl Into<String>,
        logical_id: impl Into<String>,
        version_id: i32,
        last_updated: DateTime<Utc>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            id: None,
            resource_type: resource_type.into(),
            logical_id: logical_id.into(),
            version_id,
            last_updated,
            data,
            deleted: false,
        }
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }
}

/// The indexed value of a search parameter row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ParameterValue {
    String(String),
    Number(Decimal),
    /// Closed range covered by the (possibly partial) date, dateTime or period.
    Date {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Token {
        system: Option<String>,
        code: String,
    },
    Reference {
        reference: String,
        target_type: Option<String>,
        target_id: Option<String>,
    },
    Quantity {
        value: Decimal,
        system: Option<String>,
        code: Option<String>,
    },
    Uri(String),
}

/// A search parameter value extracted from a resource version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    /// Search parameter code, e.g. `identifier`.
    pub name: String,
    /// Type declared by the search parameter definition.
    pub param_type: SearchParamType,
    /// Type of the owning resource.
    pub resource_type: String,
    pub value: ParameterValue,
}

impl ParameterRecord {
    pub fn new(
        name: impl Into<String>,
        param_type: SearchParamType,
        resource_type: impl Into<String>,
        value: ParameterValue,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            resource_type: resource_type.into(),
            value,
        }
    }

    /// The code system string this row refers to, if any.
    pub fn code_system(&self) -> Option<&str> {
        match &self.value {
            ParameterValue::Token { system, .. } | ParameterValue::Quantity { system, .. } => {
                system.as_deref()
            }
            _ => None,
        }
    }
}
