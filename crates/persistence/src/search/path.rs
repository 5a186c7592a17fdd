//! Path expression evaluation for search parameter extraction.
//!
//! [`PathEvaluator`] is the seam for a full expression engine. The default
//! [`SimplePathEvaluator`] understands the subset used by search parameter
//! definitions:
//!
//! - dotted paths with an optional leading resource type (`Patient.name.given`)
//! - unions (`Organization.name | Organization.alias`)
//! - type filters (`value.ofType(Quantity)`, `value.as(Quantity)`, `(value as Quantity)`)
//! - polymorphic elements (`effective` finds `effectiveDateTime` or `effectivePeriod`)
//! - `where(resolve() is Type)` on references
//!
//! Other `where(...)` criteria and `resolve()` are skipped, so their path
//! yields a superset of what a full engine would return.

use std::fmt::Debug;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::types::Resource;

use super::errors::PathError;

/// A primitive leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveValue {
    Boolean(bool),
    String(String),
    Integer(i64),
    Decimal(Decimal),
    DateTime(String),
    Time(String),
}

/// The FHIR data type of a complex element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    CodeableConcept,
    Coding,
    Identifier,
    Reference,
    Quantity,
    Period,
    HumanName,
    Address,
    ContactPoint,
    Other,
}

impl ElementKind {
    /// Maps a FHIR type name (either case) to a kind.
    pub fn from_type_name(name: &str) -> Option<Self> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "codeableconcept" => ElementKind::CodeableConcept,
            "coding" => ElementKind::Coding,
            "identifier" => ElementKind::Identifier,
            "reference" => ElementKind::Reference,
            "quantity" | "simplequantity" | "age" | "count" | "distance" | "duration" | "money" => {
                ElementKind::Quantity
            }
            "period" => ElementKind::Period,
            "humanname" => ElementKind::HumanName,
            "address" => ElementKind::Address,
            "contactpoint" => ElementKind::ContactPoint,
            _ => return None,
        };
        Some(kind)
    }

    /// Guesses the kind of an untyped JSON object from its keys.
    pub fn infer(obj: &serde_json::Map<String, Value>) -> Self {
        let has = |k: &str| obj.contains_key(k);
        if has("reference") {
            ElementKind::Reference
        } else if has("coding") {
            ElementKind::CodeableConcept
        } else if has("value") && obj.get("value").is_some_and(Value::is_number) {
            ElementKind::Quantity
        } else if has("value") && is_contact_system(obj.get("system")) {
            ElementKind::ContactPoint
        } else if has("value") && (has("system") || has("type") || has("assigner") || has("use")) {
            ElementKind::Identifier
        } else if has("code") && (has("system") || has("display")) {
            ElementKind::Coding
        } else if has("start") || has("end") {
            ElementKind::Period
        } else if has("family") || has("given") {
            ElementKind::HumanName
        } else if has("line") || has("city") || has("postalCode") || has("country") {
            ElementKind::Address
        } else {
            ElementKind::Other
        }
    }
}

fn is_contact_system(system: Option<&Value>) -> bool {
    matches!(
        system.and_then(Value::as_str),
        Some("phone" | "fax" | "email" | "pager" | "url" | "sms" | "other")
    )
}

/// One value selected by a path expression.
#[derive(Debug, Clone, PartialEq)]
pub enum PathNode {
    Primitive(PrimitiveValue),
    Element { kind: ElementKind, value: Value },
}

/// Evaluates path expressions against resources.
pub trait PathEvaluator: Send + Sync + Debug {
    fn evaluate(&self, resource: &Resource, expression: &str) -> Result<Vec<PathNode>, PathError>;
}

/// The built-in evaluator for simple path expressions.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimplePathEvaluator;

impl SimplePathEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl PathEvaluator for SimplePathEvaluator {
    fn evaluate(&self, resource: &Resource, expression: &str) -> Result<Vec<PathNode>, PathError> {
        let mut nodes = Vec::new();
        for branch in split_top_level(expression, '|') {
            let path = parse_path(expression, branch)?;
            if let Some(qualifier) = &path.qualifier {
                if qualifier != resource.resource_type()
                    && qualifier != "Resource"
                    && qualifier != "DomainResource"
                {
                    continue;
                }
            }
            let mut selected = Vec::new();
            navigate(resource.content(), None, &path.segments, &mut selected);
            nodes.extend(selected.into_iter().filter_map(|(value, hint)| to_node(value, hint)));
        }
        Ok(nodes)
    }
}

/// A parsed union branch.
#[derive(Debug, Clone, PartialEq)]
struct ParsedPath {
    /// Leading resource type, when the branch starts with one.
    qualifier: Option<String>,
    segments: Vec<PathSegment>,
}

/// A segment of a parsed path expression.
#[derive(Debug, Clone, PartialEq)]
enum PathSegment {
    /// A field name to navigate to.
    Field(String),
    /// A type filter (from `ofType()`/`as`).
    TypeFilter(String),
    /// Keeps references whose target has this type.
    ReferenceTarget(String),
}

fn parse_path(expression: &str, branch: &str) -> Result<ParsedPath, PathError> {
    let mut text = branch.trim();
    while text.starts_with('(') && matching_paren(text, 0) == Some(text.len() - 1) {
        text = text[1..text.len() - 1].trim();
    }
    if text.is_empty() {
        return Err(PathError::Parse {
            expression: expression.to_string(),
            message: "empty path".to_string(),
        });
    }

    // infix cast: `value as Quantity`
    if let Some((lhs, ty)) = text.rsplit_once(" as ") {
        if !ty.contains(['.', '(', ')']) {
            let mut path = parse_path(expression, lhs)?;
            path.segments.push(PathSegment::TypeFilter(ty.trim().to_string()));
            return Ok(path);
        }
    }

    let mut parts = split_top_level(text, '.').into_iter().map(str::trim).peekable();
    let qualifier = match parts.peek() {
        Some(first) if first.chars().next().is_some_and(|c| c.is_ascii_uppercase()) && !first.contains('(') => {
            parts.next().map(String::from)
        }
        _ => None,
    };

    let mut segments = Vec::new();
    for part in parts {
        let Some(open) = part.find('(') else {
            if part.is_empty() {
                return Err(PathError::Parse {
                    expression: expression.to_string(),
                    message: "empty path segment".to_string(),
                });
            }
            segments.push(PathSegment::Field(part.to_string()));
            continue;
        };

        let function = &part[..open];
        let close = matching_paren(part, open).ok_or_else(|| PathError::Parse {
            expression: expression.to_string(),
            message: "unbalanced parentheses".to_string(),
        })?;
        let argument = part[open + 1..close].trim();

        match function {
            "ofType" | "as" => segments.push(PathSegment::TypeFilter(argument.to_string())),
            "where" => {
                if let Some(target) = argument.strip_prefix("resolve() is ") {
                    segments.push(PathSegment::ReferenceTarget(target.trim().to_string()));
                }
            }
            "resolve" => {}
            other => {
                return Err(PathError::UnsupportedFunction {
                    expression: expression.to_string(),
                    function: other.to_string(),
                });
            }
        }
    }

    Ok(ParsedPath { qualifier, segments })
}

/// Splits on `sep` outside parentheses and quotes.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth -= 1,
            c if c == sep && depth == 0 && !quoted => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Index of the parenthesis closing the one at `open`.
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Walks `segments` from `value`, collecting each selected value together
/// with the type name it is known to have, if any.
fn navigate<'a>(
    value: &'a Value,
    hint: Option<String>,
    segments: &[PathSegment],
    out: &mut Vec<(&'a Value, Option<String>)>,
) {
    if let Value::Array(items) = value {
        for item in items {
            navigate(item, hint.clone(), segments, out);
        }
        return;
    }

    let Some((segment, remaining)) = segments.split_first() else {
        out.push((value, hint));
        return;
    };

    match segment {
        PathSegment::Field(name) => {
            let Value::Object(obj) = value else {
                return;
            };
            if let Some(child) = obj.get(name) {
                navigate(child, None, remaining, out);
                return;
            }
            // value[x]: valueQuantity, valueString, ...
            for (key, child) in obj {
                if let Some(suffix) = key.strip_prefix(name.as_str()) {
                    if suffix.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
                        navigate(child, Some(suffix.to_string()), remaining, out);
                    }
                }
            }
        }
        PathSegment::TypeFilter(type_name) => match hint {
            Some(known) if !known.eq_ignore_ascii_case(type_name) => {}
            _ => navigate(value, Some(type_name.clone()), remaining, out),
        },
        PathSegment::ReferenceTarget(target) => {
            let reference = value.get("reference").and_then(Value::as_str);
            let matches = match reference.and_then(reference_type) {
                Some(ty) => ty == target,
                // keep references whose target type cannot be determined
                None => value.get("type").and_then(Value::as_str).is_none_or(|t| t == target),
            };
            if matches {
                navigate(value, hint, remaining, out);
            }
        }
    }
}

/// The resource type of a relative or absolute literal reference.
pub fn reference_type(reference: &str) -> Option<&str> {
    let mut parts = reference.trim_end_matches('/').rsplit('/');
    let _id = parts.next()?;
    let ty = parts.next()?;
    if ty == "_history" {
        // Type/id/_history/vid
        parts.next()?;
        return parts.next().filter(|t| is_type_name(t));
    }
    Some(ty).filter(|t| is_type_name(t))
}

fn is_type_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_uppercase()) && chars.all(|c| c.is_ascii_alphanumeric())
}

fn to_node(value: &Value, hint: Option<String>) -> Option<PathNode> {
    let hint = hint.map(|h| h.to_ascii_lowercase());
    match value {
        Value::Object(obj) => {
            let kind = hint
                .as_deref()
                .and_then(ElementKind::from_type_name)
                .unwrap_or_else(|| ElementKind::infer(obj));
            Some(PathNode::Element {
                kind,
                value: value.clone(),
            })
        }
        Value::Bool(b) => Some(PathNode::Primitive(PrimitiveValue::Boolean(*b))),
        Value::Number(n) => {
            let primitive = match n.as_i64() {
                Some(i) if hint.as_deref() != Some("decimal") => PrimitiveValue::Integer(i),
                _ => PrimitiveValue::Decimal(Decimal::from_str(&n.to_string()).ok()?),
            };
            Some(PathNode::Primitive(primitive))
        }
        Value::String(s) => {
            let primitive = match hint.as_deref() {
                Some("datetime" | "date" | "instant") => PrimitiveValue::DateTime(s.clone()),
                Some("time") => PrimitiveValue::Time(s.clone()),
                _ => PrimitiveValue::String(s.clone()),
            };
            Some(PathNode::Primitive(primitive))
        }
        Value::Null | Value::Array(_) => None,
    }
}
