//! FHIR search parameter types.
//!
//! This module defines types for representing a parsed FHIR search: parameter
//! types, modifiers, prefixes, sort and include directives, and the
//! [`SearchQuery`] handed to the query builder.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PersistenceError, PersistenceResult};

/// FHIR search parameter types.
///
/// See: https://build.fhir.org/search.html#ptypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    /// A simple string, like a name or description.
    String,
    /// A search against a URI.
    Uri,
    /// A search for a number.
    Number,
    /// A search for a date, dateTime, or period.
    Date,
    /// A quantity, with a number and units.
    Quantity,
    /// A code from a code system or value set.
    Token,
    /// A reference to another resource.
    Reference,
    /// A composite search parameter that combines others.
    Composite,
    /// Special search parameters.
    Special,
}

impl fmt::Display for SearchParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchParamType::String => write!(f, "string"),
            SearchParamType::Uri => write!(f, "uri"),
            SearchParamType::Number => write!(f, "number"),
            SearchParamType::Date => write!(f, "date"),
            SearchParamType::Quantity => write!(f, "quantity"),
            SearchParamType::Token => write!(f, "token"),
            SearchParamType::Reference => write!(f, "reference"),
            SearchParamType::Composite => write!(f, "composite"),
            SearchParamType::Special => write!(f, "special"),
        }
    }
}

impl FromStr for SearchParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(SearchParamType::String),
            "uri" => Ok(SearchParamType::Uri),
            "number" => Ok(SearchParamType::Number),
            "date" => Ok(SearchParamType::Date),
            "quantity" => Ok(SearchParamType::Quantity),
            "token" => Ok(SearchParamType::Token),
            "reference" => Ok(SearchParamType::Reference),
            "composite" => Ok(SearchParamType::Composite),
            "special" => Ok(SearchParamType::Special),
            _ => Err(format!("unknown search parameter type: {}", s)),
        }
    }
}

impl SearchParamType {
    /// Types whose values accept comparison prefixes.
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            SearchParamType::Number | SearchParamType::Date | SearchParamType::Quantity
        )
    }
}

/// Search modifiers supported by the query builder.
///
/// See: https://build.fhir.org/search.html#modifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchModifier {
    /// Exact string match (string parameters).
    Exact,
    /// Contains substring (string parameters).
    Contains,
    /// Negation - exclude matches.
    Not,
    /// Match if value is missing.
    Missing,
    /// Restrict the reference target type (reference parameters).
    Type(String),
}

impl fmt::Display for SearchModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchModifier::Exact => write!(f, "exact"),
            SearchModifier::Contains => write!(f, "contains"),
            SearchModifier::Not => write!(f, "not"),
            SearchModifier::Missing => write!(f, "missing"),
            SearchModifier::Type(t) => write!(f, "{}", t),
        }
    }
}

impl SearchModifier {
    /// Parses a modifier string, returning None for unknown modifiers.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exact" => Some(SearchModifier::Exact),
            "contains" => Some(SearchModifier::Contains),
            "not" => Some(SearchModifier::Not),
            "missing" => Some(SearchModifier::Missing),
            _ => {
                // Check if it's a resource type modifier
                if s.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
                    Some(SearchModifier::Type(s.to_string()))
                } else {
                    None
                }
            }
        }
    }

    /// Returns true if this modifier is valid for the given parameter type.
    pub fn is_valid_for(&self, param_type: SearchParamType) -> bool {
        match self {
            SearchModifier::Exact | SearchModifier::Contains => {
                param_type == SearchParamType::String
            }
            SearchModifier::Not => param_type == SearchParamType::Token,
            SearchModifier::Missing => true,
            SearchModifier::Type(_) => param_type == SearchParamType::Reference,
        }
    }
}

/// Comparison prefixes for search parameters.
///
/// See: https://build.fhir.org/search.html#prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    /// Equal (default).
    #[default]
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Less than or equal.
    Le,
    /// Starts after.
    Sa,
    /// Ends before.
    Eb,
    /// Approximately equal.
    Ap,
}

impl FromStr for SearchPrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(SearchPrefix::Eq),
            "ne" => Ok(SearchPrefix::Ne),
            "gt" => Ok(SearchPrefix::Gt),
            "lt" => Ok(SearchPrefix::Lt),
            "ge" => Ok(SearchPrefix::Ge),
            "le" => Ok(SearchPrefix::Le),
            "sa" => Ok(SearchPrefix::Sa),
            "eb" => Ok(SearchPrefix::Eb),
            "ap" => Ok(SearchPrefix::Ap),
            _ => Err(format!("unknown search prefix: {}", s)),
        }
    }
}

impl SearchPrefix {
    /// Extracts a prefix from the beginning of a value string.
    ///
    /// Returns the prefix and the remaining value.
    pub fn extract(value: &str) -> (Self, &str) {
        if value.len() > 2 && value.is_char_boundary(2) {
            if let Ok(p) = value[..2].parse() {
                return (p, &value[2..]);
            }
        }
        (SearchPrefix::Eq, value)
    }
}

/// One search criterion. Values are kept raw (prefix included) and are OR'ed
/// together; separate filters are AND'ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// The parameter code (e.g., "name", "identifier").
    pub name: String,

    /// Modifier, if any.
    pub modifier: Option<SearchModifier>,

    /// Raw values.
    pub values: Vec<String>,
}

impl SearchFilter {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            modifier: None,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_modifier(mut self, modifier: SearchModifier) -> Self {
        self.modifier = Some(modifier);
        self
    }
}

/// Sort direction for _sort parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Ascending,
    /// Descending order.
    Descending,
}

/// A sort directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDirective {
    /// The parameter to sort by.
    pub parameter: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl SortDirective {
    /// Parses a sort parameter value (e.g., "-date" for descending).
    pub fn parse(s: &str) -> Self {
        if let Some(stripped) = s.strip_prefix('-') {
            Self {
                parameter: stripped.to_string(),
                direction: SortDirection::Descending,
            }
        } else {
            Self {
                parameter: s.to_string(),
                direction: SortDirection::Ascending,
            }
        }
    }
}

/// Include directive for _include.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeDirective {
    /// The source resource type.
    pub source_type: String,

    /// The search parameter (reference) to follow.
    pub search_param: String,

    /// Optional target resource type filter.
    pub target_type: Option<String>,
}

impl IncludeDirective {
    /// Parses `Source:param[:Target]`.
    pub fn parse(s: &str) -> PersistenceResult<Self> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(source), Some(param), target, None) if !source.is_empty() && !param.is_empty() => {
                Ok(Self {
                    source_type: source.to_string(),
                    search_param: param.to_string(),
                    target_type: target.filter(|t| !t.is_empty()).map(String::from),
                })
            }
            _ => Err(PersistenceError::invalid_argument(format!(
                "invalid _include value '{}'",
                s
            ))),
        }
    }
}

/// The `_summary` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMode {
    True,
    Text,
    Data,
    Count,
    False,
}

impl FromStr for SummaryMode {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "true" => Ok(SummaryMode::True),
            "text" => Ok(SummaryMode::Text),
            "data" => Ok(SummaryMode::Data),
            "count" => Ok(SummaryMode::Count),
            "false" => Ok(SummaryMode::False),
            other => Err(PersistenceError::invalid_argument(format!(
                "invalid _summary value '{}'",
                other
            ))),
        }
    }
}

/// A parsed search request.
///
/// A `resource_type` of `None` is a system-level search across all types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub resource_type: Option<String>,
    pub filters: Vec<SearchFilter>,
    pub sort: Vec<SortDirective>,
    /// 1-based page number.
    pub page_number: u32,
    /// Requested page size; the configured default applies when `None`.
    pub page_size: Option<u32>,
    pub includes: Vec<IncludeDirective>,
    pub summary: Option<SummaryMode>,
    pub elements: Option<Vec<String>>,
}

impl SearchQuery {
    /// A search scoped to one resource type.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            ..Self::system()
        }
    }

    /// A system-level search.
    pub fn system() -> Self {
        Self {
            resource_type: None,
            filters: Vec::new(),
            sort: Vec::new(),
            page_number: 1,
            page_size: None,
            includes: Vec::new(),
            summary: None,
            elements: None,
        }
    }

    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_sort(mut self, sort: SortDirective) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn with_page(mut self, page_number: u32, page_size: u32) -> Self {
        self.page_number = page_number.max(1);
        self.page_size = Some(page_size);
        self
    }

    pub fn with_include(mut self, include: IncludeDirective) -> Self {
        self.includes.push(include);
        self
    }

    pub fn with_summary(mut self, summary: SummaryMode) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn with_elements<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elements = Some(elements.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_system_level(&self) -> bool {
        self.resource_type.is_none()
    }

    pub fn is_count_only(&self) -> bool {
        self.summary == Some(SummaryMode::Count)
    }

    /// Builds a query from decoded query-string pairs.
    ///
    /// Control parameters (`_sort`, `_count`, `_page`, `_summary`, `_elements`,
    /// `_include`) are interpreted; everything else becomes a filter, with
    /// `name:modifier` split and comma-separated values OR'ed.
    ///
    /// ```
    /// use helios_persistence_jdbc::types::{SearchModifier, SearchQuery, SummaryMode};
    ///
    /// let query = SearchQuery::from_params(
    ///     Some("Patient"),
    ///     &[("family:exact", "Smith"), ("gender", "male,female"), ("_count", "5"), ("_sort", "-birthdate")],
    /// ).unwrap();
    ///
    /// assert_eq!(query.filters.len(), 2);
    /// assert_eq!(query.filters[0].modifier, Some(SearchModifier::Exact));
    /// assert_eq!(query.filters[1].values, vec!["male", "female"]);
    /// assert_eq!(query.page_size, Some(5));
    /// assert_eq!(query.sort[0].parameter, "birthdate");
    /// ```
    pub fn from_params(
        resource_type: Option<&str>,
        params: &[(&str, &str)],
    ) -> PersistenceResult<Self> {
        let mut query = match resource_type {
            Some(rt) => SearchQuery::new(rt),
            None => SearchQuery::system(),
        };

        for (name, value) in params {
            match *name {
                "_sort" => {
                    query
                        .sort
                        .extend(value.split(',').filter(|s| !s.is_empty()).map(SortDirective::parse));
                }
                "_count" => query.page_size = Some(parse_positive(name, value)?),
                "_page" => query.page_number = parse_positive(name, value)?,
                "_summary" => query.summary = Some(value.parse()?),
                "_elements" => {
                    query.elements = Some(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect(),
                    )
                }
                "_include" => query.includes.push(IncludeDirective::parse(value)?),
                _ => {
                    let (code, modifier) = match name.split_once(':') {
                        Some((code, m)) => {
                            let modifier = SearchModifier::parse(m).ok_or_else(|| {
                                PersistenceError::invalid_argument(format!(
                                    "unsupported modifier '{}' on '{}'",
                                    m, code
                                ))
                            })?;
                            (code, Some(modifier))
                        }
                        None => (*name, None),
                    };
                    query.filters.push(SearchFilter {
                        name: code.to_string(),
                        modifier,
                        values: value.split(',').map(String::from).collect(),
                    });
                }
            }
        }

        Ok(query)
    }
}

fn parse_positive(name: &str, value: &str) -> PersistenceResult<u32> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(PersistenceError::invalid_argument(format!(
            "{} must be a positive integer, got '{}'",
            name, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_extract() {
        assert_eq!(SearchPrefix::extract("ge2020-01-01"), (SearchPrefix::Ge, "2020-01-01"));
        assert_eq!(SearchPrefix::extract("2020"), (SearchPrefix::Eq, "2020"));
        assert_eq!(SearchPrefix::extract("ap5.4"), (SearchPrefix::Ap, "5.4"));
        // a bare prefix is a value, not a prefix
        assert_eq!(SearchPrefix::extract("lt"), (SearchPrefix::Eq, "lt"));
    }

    #[test]
    fn test_modifier_parse() {
        assert_eq!(SearchModifier::parse("exact"), Some(SearchModifier::Exact));
        assert_eq!(
            SearchModifier::parse("Patient"),
            Some(SearchModifier::Type("Patient".to_string()))
        );
        assert_eq!(SearchModifier::parse("below"), None);
        assert!(!SearchModifier::Exact.is_valid_for(SearchParamType::Token));
    }

    #[test]
    fn test_include_parse() {
        let include = IncludeDirective::parse("Observation:subject:Patient").unwrap();
        assert_eq!(include.source_type, "Observation");
        assert_eq!(include.search_param, "subject");
        assert_eq!(include.target_type.as_deref(), Some("Patient"));

        assert!(IncludeDirective::parse("Observation").is_err());
        assert!(IncludeDirective::parse("a:b:c:d").is_err());
    }

    #[test]
    fn test_from_params_control_parameters() {
        let query = SearchQuery::from_params(
            None,
            &[("_summary", "count"), ("_page", "3"), ("_elements", "name, gender")],
        )
        .unwrap();

        assert!(query.is_system_level());
        assert!(query.is_count_only());
        assert_eq!(query.page_number, 3);
        assert_eq!(query.elements, Some(vec!["name".to_string(), "gender".to_string()]));
    }

    #[test]
    fn test_from_params_rejects_bad_values() {
        assert!(SearchQuery::from_params(Some("Patient"), &[("_count", "0")]).is_err());
        assert!(SearchQuery::from_params(Some("Patient"), &[("_summary", "maybe")]).is_err());
        assert!(SearchQuery::from_params(Some("Patient"), &[("name:fuzzy", "x")]).is_err());
    }
}
