//! Per-type value conditions.
//!
//! Each handler turns one search value into a condition over the parameter
//! table aliased `P`. The query builder OR's the conditions of one filter and
//! wraps them in an `EXISTS` over the table.

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::{PersistenceError, PersistenceResult};
use crate::search::parse_date_range;
use crate::types::{SearchModifier, SearchPrefix, format_instant};

use super::sql::{SqlFragment, SqlParam};

/// How a token or quantity value constrains the code system column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SystemMatch {
    /// No system given; any system matches.
    Any,
    /// `|code`: the row must have no system.
    Absent,
    Id(i64),
    /// A system that was never stored; nothing matches.
    Unknown,
}

impl SystemMatch {
    fn condition(&self) -> Option<SqlFragment> {
        match self {
            SystemMatch::Any => None,
            SystemMatch::Absent => Some(SqlFragment::new("P.code_system_id IS NULL")),
            SystemMatch::Id(id) => Some(SqlFragment::with_params(
                "P.code_system_id = ?",
                vec![SqlParam::integer(*id)],
            )),
            SystemMatch::Unknown => Some(SqlFragment::never()),
        }
    }
}

fn invalid(kind: &str, value: &str) -> PersistenceError {
    PersistenceError::invalid_argument(format!("invalid {} search value '{}'", kind, value))
}

/// Escapes `LIKE` wildcards with `\`.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// String values: case-insensitive prefix match by default.
pub(crate) struct StringHandler;

impl StringHandler {
    pub fn build_sql(value: &str, modifier: Option<&SearchModifier>) -> SqlFragment {
        match modifier {
            Some(SearchModifier::Exact) => {
                SqlFragment::with_params("P.str_value = ?", vec![SqlParam::string(value)])
            }
            Some(SearchModifier::Contains) => SqlFragment::with_params(
                "P.str_value_lcase LIKE ? ESCAPE '\\'",
                vec![SqlParam::string(format!("%{}%", escape_like(&value.to_lowercase())))],
            ),
            _ => SqlFragment::with_params(
                "P.str_value_lcase LIKE ? ESCAPE '\\'",
                vec![SqlParam::string(format!("{}%", escape_like(&value.to_lowercase())))],
            ),
        }
    }
}

/// Token values: `system|code`, `|code`, `code` or `system|`.
pub(crate) struct TokenHandler;

impl TokenHandler {
    /// Splits a token value into its optional system part and code.
    /// The system part is `Some("")` for `|code`.
    pub fn parse(value: &str) -> PersistenceResult<(Option<&str>, Option<&str>)> {
        let (system, code) = match value.split_once('|') {
            Some((system, code)) => (Some(system), Some(code).filter(|c| !c.is_empty())),
            None => (None, Some(value)),
        };
        if code.is_none() && system.is_none_or(str::is_empty) {
            return Err(invalid("token", value));
        }
        Ok((system, code))
    }

    pub fn build_sql(system: SystemMatch, code: Option<&str>) -> SqlFragment {
        let code = code.map(|c| SqlFragment::with_params("P.token_value = ?", vec![SqlParam::string(c)]));
        let combined = SqlFragment::and_all(system.condition().into_iter().chain(code));
        if combined.is_empty() {
            SqlFragment::always()
        } else {
            combined
        }
    }
}

/// Number values with comparison prefixes.
///
/// Equality honours the precision of the search value: `100` matches
/// `[99.5, 100.5)` and `100.0` matches `[99.95, 100.05)`.
pub(crate) struct NumberHandler;

impl NumberHandler {
    pub fn parse(value: &str) -> PersistenceResult<(SearchPrefix, Decimal)> {
        let (prefix, number) = SearchPrefix::extract(value);
        let number = Decimal::from_str(number)
            .or_else(|_| Decimal::from_scientific(number))
            .map_err(|_| invalid("number", value))?;
        Ok((prefix, number))
    }

    pub fn build_sql(prefix: SearchPrefix, number: Decimal, column: &str) -> PersistenceResult<SqlFragment> {
        let float = |d: Decimal| {
            d.to_f64()
                .map(SqlParam::float)
                .ok_or_else(|| invalid("number", &d.to_string()))
        };
        let compare = |op: &str| -> PersistenceResult<SqlFragment> {
            Ok(SqlFragment::with_params(format!("{column} {op} ?"), vec![float(number)?]))
        };
        let between = |low: Decimal, high: Decimal| -> PersistenceResult<SqlFragment> {
            Ok(SqlFragment::with_params(
                format!("{column} >= ? AND {column} < ?"),
                vec![float(low)?, float(high)?],
            ))
        };

        // bounds past the decimal range are not representable search values
        let bounds = |margin: Decimal| -> PersistenceResult<(Decimal, Decimal)> {
            number
                .checked_sub(margin)
                .zip(number.checked_add(margin))
                .ok_or_else(|| invalid("number", &number.to_string()))
        };

        let half = Decimal::try_new(5, number.scale() + 1).unwrap_or(Decimal::ZERO);
        match prefix {
            SearchPrefix::Eq => {
                let (low, high) = bounds(half)?;
                between(low, high)
            }
            SearchPrefix::Ne => {
                let (low, high) = bounds(half)?;
                let range = between(low, high)?;
                Ok(SqlFragment::with_params(format!("NOT ({})", range.sql), range.params))
            }
            SearchPrefix::Gt | SearchPrefix::Sa => compare(">"),
            SearchPrefix::Lt | SearchPrefix::Eb => compare("<"),
            SearchPrefix::Ge => compare(">="),
            SearchPrefix::Le => compare("<="),
            SearchPrefix::Ap => {
                let margin = (number * Decimal::new(1, 1)).abs();
                let (low, high) = bounds(margin)?;
                Ok(SqlFragment::with_params(
                    format!("{column} >= ? AND {column} <= ?"),
                    vec![float(low)?, float(high)?],
                ))
            }
        }
    }
}

/// A parsed `[prefix]number|system|code` quantity value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct QuantityValue<'v> {
    pub prefix: SearchPrefix,
    pub number: Decimal,
    pub system: Option<&'v str>,
    pub code: Option<&'v str>,
}

pub(crate) struct QuantityHandler;

impl QuantityHandler {
    pub fn parse(value: &str) -> PersistenceResult<QuantityValue<'_>> {
        let mut parts = value.splitn(3, '|');
        let number = parts.next().unwrap_or_default();
        let (prefix, number) = NumberHandler::parse(number).map_err(|_| invalid("quantity", value))?;
        let system = parts.next().filter(|s| !s.is_empty());
        let code = parts.next().filter(|s| !s.is_empty());
        Ok(QuantityValue {
            prefix,
            number,
            system,
            code,
        })
    }

    pub fn build_sql(value: &QuantityValue<'_>, system: SystemMatch) -> PersistenceResult<SqlFragment> {
        let number = NumberHandler::build_sql(value.prefix, value.number, "P.quantity_value")?;
        let code = value
            .code
            .map(|c| SqlFragment::with_params("P.code = ?", vec![SqlParam::string(c)]));
        Ok(SqlFragment::and_all(
            std::iter::once(number).chain(system.condition()).chain(code),
        ))
    }
}

/// Date values compared as ranges.
///
/// The indexed value covers `[start, end]` and so does the search value
/// `[s, e]`. For `_lastUpdated` both columns are the same instant column.
pub(crate) struct DateHandler;

impl DateHandler {
    pub fn build_sql(value: &str, start_column: &str, end_column: &str) -> PersistenceResult<SqlFragment> {
        let (prefix, date) = SearchPrefix::extract(value);
        let (s, e) = parse_date_range(date).ok_or_else(|| invalid("date", value))?;
        let (s, e) = (SqlParam::string(format_instant(&s)), SqlParam::string(format_instant(&e)));

        let fragment = match prefix {
            SearchPrefix::Eq => SqlFragment::with_params(
                format!("{start_column} >= ? AND {end_column} <= ?"),
                vec![s, e],
            ),
            SearchPrefix::Ne => SqlFragment::with_params(
                format!("NOT ({start_column} >= ? AND {end_column} <= ?)"),
                vec![s, e],
            ),
            SearchPrefix::Gt => SqlFragment::with_params(format!("{end_column} > ?"), vec![e]),
            SearchPrefix::Lt => SqlFragment::with_params(format!("{start_column} < ?"), vec![s]),
            SearchPrefix::Ge => SqlFragment::with_params(format!("{end_column} >= ?"), vec![s]),
            SearchPrefix::Le => SqlFragment::with_params(format!("{start_column} <= ?"), vec![e]),
            SearchPrefix::Sa => SqlFragment::with_params(format!("{start_column} > ?"), vec![e]),
            SearchPrefix::Eb => SqlFragment::with_params(format!("{end_column} < ?"), vec![s]),
            SearchPrefix::Ap => SqlFragment::with_params(
                format!("{start_column} <= ? AND {end_column} >= ?"),
                vec![e, s],
            ),
        };
        Ok(fragment)
    }
}

/// Reference values: `Type/id`, a bare `id`, or an absolute URL.
pub(crate) struct ReferenceHandler;

impl ReferenceHandler {
    pub fn build_sql(value: &str, modifier: Option<&SearchModifier>) -> SqlFragment {
        let type_filter = match modifier {
            Some(SearchModifier::Type(ty)) => Some(ty.as_str()),
            _ => None,
        };

        if value.contains("://") || value.starts_with("urn:") {
            return SqlFragment::with_params("P.ref_value = ?", vec![SqlParam::string(value)]);
        }

        let (ty, id) = match value.split_once('/') {
            Some((ty, id)) => (Some(ty), id.split('/').next().unwrap_or(id)),
            None => (type_filter, value),
        };

        match ty {
            Some(ty) if type_filter.is_none_or(|t| t == ty) => SqlFragment::with_params(
                "P.ref_type = ? AND P.ref_logical_id = ?",
                vec![SqlParam::string(ty), SqlParam::string(id)],
            ),
            Some(_) => SqlFragment::never(),
            None => SqlFragment::with_params("P.ref_logical_id = ?", vec![SqlParam::string(id)]),
        }
    }
}

pub(crate) struct UriHandler;

impl UriHandler {
    pub fn build_sql(value: &str) -> SqlFragment {
        SqlFragment::with_params("P.uri_value = ?", vec![SqlParam::string(value)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floats(fragment: &SqlFragment) -> Vec<f64> {
        fragment
            .params
            .iter()
            .filter_map(|p| match p {
                SqlParam::Float(f) => Some(*f),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_string_modifiers() {
        let prefix = StringHandler::build_sql("Sm_th", None);
        assert_eq!(prefix.sql, "P.str_value_lcase LIKE ? ESCAPE '\\'");
        assert_eq!(prefix.params, vec![SqlParam::string("sm\\_th%")]);

        let exact = StringHandler::build_sql("Smith", Some(&SearchModifier::Exact));
        assert_eq!(exact.sql, "P.str_value = ?");

        let contains = StringHandler::build_sql("MIT", Some(&SearchModifier::Contains));
        assert_eq!(contains.params, vec![SqlParam::string("%mit%")]);
    }

    #[test]
    fn test_token_forms() {
        assert_eq!(TokenHandler::parse("http://loinc.org|1234").unwrap(), (Some("http://loinc.org"), Some("1234")));
        assert_eq!(TokenHandler::parse("|1234").unwrap(), (Some(""), Some("1234")));
        assert_eq!(TokenHandler::parse("1234").unwrap(), (None, Some("1234")));
        assert_eq!(TokenHandler::parse("http://loinc.org|").unwrap(), (Some("http://loinc.org"), None));
        assert!(TokenHandler::parse("|").is_err());

        assert_eq!(
            TokenHandler::build_sql(SystemMatch::Absent, Some("x")).sql,
            "(P.code_system_id IS NULL) AND (P.token_value = ?)"
        );
        assert_eq!(TokenHandler::build_sql(SystemMatch::Unknown, Some("x")).sql, "(1 = 0) AND (P.token_value = ?)");
        assert_eq!(TokenHandler::build_sql(SystemMatch::Id(4), None).params, vec![SqlParam::integer(4)]);
    }

    #[test]
    fn test_number_precision() {
        let (prefix, number) = NumberHandler::parse("100").unwrap();
        let eq = NumberHandler::build_sql(prefix, number, "P.number_value").unwrap();
        assert_eq!(floats(&eq), vec![99.5, 100.5]);

        let (prefix, number) = NumberHandler::parse("100.0").unwrap();
        let eq = NumberHandler::build_sql(prefix, number, "P.number_value").unwrap();
        let bounds = floats(&eq);
        assert!((bounds[0] - 99.95).abs() < 1e-9);
        assert!((bounds[1] - 100.05).abs() < 1e-9);

        let (prefix, number) = NumberHandler::parse("gt0.8").unwrap();
        assert_eq!(prefix, SearchPrefix::Gt);
        let gt = NumberHandler::build_sql(prefix, number, "P.number_value").unwrap();
        assert_eq!(gt.sql, "P.number_value > ?");

        assert!(NumberHandler::parse("ten").is_err());
    }

    #[test]
    fn test_number_at_decimal_limits() {
        let max = Decimal::MAX.to_string();
        let (prefix, number) = NumberHandler::parse(&max).unwrap();
        let err = NumberHandler::build_sql(prefix, number, "P.number_value").unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidArgument { .. }));

        let (prefix, number) = NumberHandler::parse(&format!("ap{}", Decimal::MIN)).unwrap();
        assert!(NumberHandler::build_sql(prefix, number, "P.number_value").is_err());

        // open comparisons need no margin
        let (prefix, number) = NumberHandler::parse(&format!("gt{}", max)).unwrap();
        assert!(NumberHandler::build_sql(prefix, number, "P.number_value").is_ok());

        let raw = format!("{}||mg", max);
        let q = QuantityHandler::parse(&raw).unwrap();
        assert!(QuantityHandler::build_sql(&q, SystemMatch::Any).is_err());
    }

    #[test]
    fn test_quantity_parse() {
        let q = QuantityHandler::parse("le5.4|http://unitsofmeasure.org|mg").unwrap();
        assert_eq!(q.prefix, SearchPrefix::Le);
        assert_eq!(q.number, Decimal::new(54, 1));
        assert_eq!(q.system, Some("http://unitsofmeasure.org"));
        assert_eq!(q.code, Some("mg"));

        let q = QuantityHandler::parse("5.4||mg").unwrap();
        assert_eq!(q.system, None);
        let sql = QuantityHandler::build_sql(&q, SystemMatch::Any).unwrap();
        assert!(sql.sql.contains("P.code = ?"));
    }

    #[test]
    fn test_date_prefixes() {
        let eq = DateHandler::build_sql("2020", "P.date_start", "P.date_end").unwrap();
        assert_eq!(eq.sql, "P.date_start >= ? AND P.date_end <= ?");
        assert_eq!(
            eq.params,
            vec![
                SqlParam::string("2020-01-01T00:00:00.000000Z"),
                SqlParam::string("2020-12-31T23:59:59.999999Z")
            ]
        );

        let ge = DateHandler::build_sql("ge2020-06", "P.date_start", "P.date_end").unwrap();
        assert_eq!(ge.sql, "P.date_end >= ?");
        assert_eq!(ge.params, vec![SqlParam::string("2020-06-01T00:00:00.000000Z")]);

        assert!(DateHandler::build_sql("gtyesterday", "a", "b").is_err());
    }

    #[test]
    fn test_reference_forms() {
        let typed = ReferenceHandler::build_sql("Patient/123", None);
        assert_eq!(typed.params, vec![SqlParam::string("Patient"), SqlParam::string("123")]);

        let bare = ReferenceHandler::build_sql("123", None);
        assert_eq!(bare.sql, "P.ref_logical_id = ?");

        let modified = ReferenceHandler::build_sql("123", Some(&SearchModifier::Type("Patient".into())));
        assert_eq!(modified.sql, "P.ref_type = ? AND P.ref_logical_id = ?");

        let conflicting = ReferenceHandler::build_sql("Group/1", Some(&SearchModifier::Type("Patient".into())));
        assert_eq!(conflicting, SqlFragment::never());

        let absolute = ReferenceHandler::build_sql("http://other.org/fhir/Patient/1", None);
        assert_eq!(absolute.sql, "P.ref_value = ?");
    }
}
