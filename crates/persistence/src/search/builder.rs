//! Conversion of selected path nodes into typed parameter rows.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::types::{ParameterRecord, ParameterValue, SearchParamType};

use super::date::{max_instant, min_instant, parse_date_range, parse_time_range};
use super::path::{ElementKind, PathNode, PrimitiveValue, reference_type};
use super::registry::SearchParameterDefinition;

/// Builds the parameter rows for one search parameter of one resource.
#[derive(Debug, Clone, Copy)]
pub struct ParameterBuilder<'a> {
    definition: &'a SearchParameterDefinition,
    resource_type: &'a str,
}

impl<'a> ParameterBuilder<'a> {
    pub fn new(definition: &'a SearchParameterDefinition, resource_type: &'a str) -> Self {
        Self {
            definition,
            resource_type,
        }
    }

    /// Rows for one selected node. Nodes that carry no indexable value for
    /// the parameter's type produce no rows.
    pub fn build(&self, node: &PathNode) -> Vec<ParameterRecord> {
        let values = match node {
            PathNode::Primitive(primitive) => self.primitive(primitive).into_iter().collect(),
            PathNode::Element { kind, value } => self.element(self.declared_kind(*kind, value), value),
        };
        values
            .into_iter()
            .filter_map(|v| self.conform(v))
            .map(|v| self.record(v))
            .collect()
    }

    /// Sparse elements whose keys are not enough to recognize them are read
    /// as the element type the parameter's declared type implies.
    fn declared_kind(&self, kind: ElementKind, value: &Value) -> ElementKind {
        if kind != ElementKind::Other {
            return kind;
        }
        let has = |key: &str| value.get(key).is_some();
        match self.param_type() {
            SearchParamType::Token if has("value") => ElementKind::Identifier,
            SearchParamType::Token if has("code") => ElementKind::Coding,
            SearchParamType::Quantity | SearchParamType::Number if has("value") => ElementKind::Quantity,
            SearchParamType::Date if has("start") || has("end") => ElementKind::Period,
            _ => kind,
        }
    }

    /// Keeps values stored in the table of the declared parameter type.
    /// Numbers and quantities convert into each other; anything else that
    /// does not match is dropped.
    fn conform(&self, value: ParameterValue) -> Option<ParameterValue> {
        match (self.param_type(), value) {
            (SearchParamType::Number, ParameterValue::Quantity { value, .. }) => {
                Some(ParameterValue::Number(value))
            }
            (SearchParamType::Quantity, ParameterValue::Number(value)) => Some(ParameterValue::Quantity {
                value,
                system: None,
                code: None,
            }),
            (param_type, value) if stored_as(param_type, &value) => Some(value),
            (param_type, value) => {
                tracing::trace!(
                    parameter = %self.definition.code,
                    ?param_type,
                    ?value,
                    "dropping value that does not match the parameter type"
                );
                None
            }
        }
    }

    fn param_type(&self) -> SearchParamType {
        self.definition.param_type
    }

    fn record(&self, value: ParameterValue) -> ParameterRecord {
        ParameterRecord::new(&self.definition.code, self.param_type(), self.resource_type, value)
    }

    fn primitive(&self, primitive: &PrimitiveValue) -> Option<ParameterValue> {
        match primitive {
            PrimitiveValue::Boolean(b) => Some(token(None, if *b { "true" } else { "false" })),
            PrimitiveValue::Integer(i) => Some(ParameterValue::Number(Decimal::from(*i))),
            PrimitiveValue::Decimal(d) => Some(ParameterValue::Number(*d)),
            PrimitiveValue::DateTime(s) => date(s),
            PrimitiveValue::Time(s) => {
                parse_time_range(s).map(|(start, end)| ParameterValue::Date { start, end })
            }
            PrimitiveValue::String(s) => self.typed_string(s),
        }
    }

    /// A string is interpreted by the declared parameter type.
    fn typed_string(&self, s: &str) -> Option<ParameterValue> {
        if s.is_empty() {
            return None;
        }
        match self.param_type() {
            SearchParamType::String => Some(ParameterValue::String(s.to_string())),
            SearchParamType::Token => Some(token(None, s)),
            SearchParamType::Uri => Some(ParameterValue::Uri(s.to_string())),
            SearchParamType::Reference => Some(reference(s)),
            SearchParamType::Date => date(s),
            SearchParamType::Number => Decimal::from_str(s).ok().map(ParameterValue::Number),
            SearchParamType::Quantity | SearchParamType::Composite | SearchParamType::Special => None,
        }
    }

    fn element(&self, kind: ElementKind, value: &Value) -> Vec<ParameterValue> {
        let text = |key: &str| value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty());
        let mut rows = Vec::new();

        match kind {
            ElementKind::CodeableConcept => {
                if let Some(codings) = value.get("coding").and_then(Value::as_array) {
                    rows.extend(codings.iter().filter_map(coding));
                }
                if self.param_type() == SearchParamType::String {
                    rows.extend(text("text").map(|t| ParameterValue::String(t.to_string())));
                }
            }
            ElementKind::Coding => rows.extend(coding(value)),
            ElementKind::Identifier => {
                if let Some(code) = text("value") {
                    rows.push(token(text("system"), code));
                }
            }
            ElementKind::ContactPoint => {
                if let Some(code) = text("value") {
                    rows.push(token(None, code));
                }
            }
            ElementKind::Reference => rows.extend(text("reference").map(reference)),
            ElementKind::Quantity => {
                let number = value.get("value").and_then(|v| match v {
                    Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
                    Value::String(s) => Decimal::from_str(s).ok(),
                    _ => None,
                });
                if let Some(number) = number {
                    rows.push(ParameterValue::Quantity {
                        value: number,
                        system: text("system").map(String::from),
                        code: text("code").or_else(|| text("unit")).map(String::from),
                    });
                }
            }
            ElementKind::Period => {
                let start = text("start").and_then(parse_date_range).map(|(s, _)| s);
                let end = text("end").and_then(parse_date_range).map(|(_, e)| e);
                if start.is_some() || end.is_some() {
                    rows.push(ParameterValue::Date {
                        start: start.unwrap_or_else(min_instant),
                        end: end.unwrap_or_else(max_instant),
                    });
                }
            }
            ElementKind::HumanName => {
                rows.extend(strings(value, &["family", "given", "prefix", "suffix", "text"]));
            }
            ElementKind::Address => {
                rows.extend(strings(
                    value,
                    &["line", "city", "district", "state", "postalCode", "country", "text"],
                ));
            }
            ElementKind::Other => {
                tracing::debug!(
                    parameter = %self.definition.code,
                    resource_type = self.resource_type,
                    "no index rows for unrecognized element"
                );
            }
        }

        rows
    }
}

fn stored_as(param_type: SearchParamType, value: &ParameterValue) -> bool {
    matches!(
        (param_type, value),
        (SearchParamType::String, ParameterValue::String(_))
            | (SearchParamType::Number, ParameterValue::Number(_))
            | (SearchParamType::Date, ParameterValue::Date { .. })
            | (SearchParamType::Token, ParameterValue::Token { .. })
            | (SearchParamType::Reference, ParameterValue::Reference { .. })
            | (SearchParamType::Quantity, ParameterValue::Quantity { .. })
            | (SearchParamType::Uri, ParameterValue::Uri(_))
    )
}

fn token(system: Option<&str>, code: &str) -> ParameterValue {
    ParameterValue::Token {
        system: system.map(String::from),
        code: code.to_string(),
    }
}

fn coding(value: &Value) -> Option<ParameterValue> {
    let code = value.get("code").and_then(Value::as_str).filter(|c| !c.is_empty())?;
    Some(token(value.get("system").and_then(Value::as_str), code))
}

fn date(s: &str) -> Option<ParameterValue> {
    parse_date_range(s).map(|(start, end)| ParameterValue::Date { start, end })
}

/// A literal reference, with type and id split out when they can be read from
/// it. Contained (`#id`) and `urn:` references keep only the literal.
fn reference(literal: &str) -> ParameterValue {
    let (target_type, target_id) = match reference_type(literal) {
        Some(ty) => {
            let after_type = literal
                .rsplit_once(&format!("{}/", ty))
                .map(|(_, rest)| rest)
                .unwrap_or_default();
            let id = after_type.split('/').next().filter(|id| !id.is_empty());
            (Some(ty.to_string()), id.map(String::from))
        }
        None => (None, None),
    };
    ParameterValue::Reference {
        reference: literal.to_string(),
        target_type,
        target_id,
    }
}

fn strings(value: &Value, keys: &[&str]) -> Vec<ParameterValue> {
    let mut out = Vec::new();
    for key in keys {
        match value.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => out.push(ParameterValue::String(s.clone())),
            Some(Value::Array(items)) => out.extend(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(|s| ParameterValue::String(s.to_string())),
            ),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(code: &str, param_type: SearchParamType) -> SearchParameterDefinition {
        SearchParameterDefinition::new(format!("http://example.org/{code}"), code, param_type, "x")
            .with_base(vec!["Patient"])
    }

    fn element(kind: ElementKind, value: Value) -> PathNode {
        PathNode::Element { kind, value }
    }

    #[test]
    fn test_codeable_concept_yields_token_per_coding() {
        let def = definition("code", SearchParamType::Token);
        let rows = ParameterBuilder::new(&def, "Observation").build(&element(
            ElementKind::CodeableConcept,
            json!({
                "coding": [
                    {"system": "http://loinc.org", "code": "1234-5"},
                    {"system": "http://snomed.info/sct", "code": "999"},
                    {"display": "no code"}
                ],
                "text": "Glucose"
            }),
        ));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].code_system(), Some("http://loinc.org"));
        assert!(rows.iter().all(|r| r.resource_type == "Observation"));
    }

    #[test]
    fn test_codeable_concept_text_for_string_params() {
        let def = definition("code-text", SearchParamType::String);
        let rows = ParameterBuilder::new(&def, "Observation").build(&element(
            ElementKind::CodeableConcept,
            json!({"coding": [{"code": "a"}], "text": "Glucose"}),
        ));
        assert!(rows.iter().any(|r| r.value == ParameterValue::String("Glucose".into())));
    }

    #[test]
    fn test_boolean_and_typed_strings() {
        let def = definition("active", SearchParamType::Token);
        let rows = ParameterBuilder::new(&def, "Patient").build(&PathNode::Primitive(PrimitiveValue::Boolean(true)));
        assert_eq!(rows[0].value, token(None, "true"));

        let def = definition("birthdate", SearchParamType::Date);
        let rows = ParameterBuilder::new(&def, "Patient")
            .build(&PathNode::Primitive(PrimitiveValue::String("1980-01".into())));
        assert!(matches!(rows[0].value, ParameterValue::Date { .. }));

        let rows = ParameterBuilder::new(&def, "Patient")
            .build(&PathNode::Primitive(PrimitiveValue::String("not a date".into())));
        assert!(rows.is_empty());
    }

    #[test]
    fn test_human_name_strings() {
        let def = definition("name", SearchParamType::String);
        let rows = ParameterBuilder::new(&def, "Patient").build(&element(
            ElementKind::HumanName,
            json!({"family": "Smith", "given": ["John", "Q"], "prefix": ["Dr"]}),
        ));
        let values: Vec<_> = rows.iter().map(|r| r.value.clone()).collect();
        assert_eq!(values.len(), 4);
        assert!(values.contains(&ParameterValue::String("Smith".into())));
        assert!(values.contains(&ParameterValue::String("Q".into())));
    }

    #[test]
    fn test_open_period() {
        let def = definition("date", SearchParamType::Date);
        let rows = ParameterBuilder::new(&def, "Encounter")
            .build(&element(ElementKind::Period, json!({"start": "2024-01-01"})));
        match &rows[0].value {
            ParameterValue::Date { end, .. } => assert_eq!(*end, max_instant()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_quantity_falls_back_to_unit() {
        let def = definition("value-quantity", SearchParamType::Quantity);
        let rows = ParameterBuilder::new(&def, "Observation")
            .build(&element(ElementKind::Quantity, json!({"value": 5.4, "unit": "mg"})));
        assert_eq!(
            rows[0].value,
            ParameterValue::Quantity {
                value: Decimal::new(54, 1),
                system: None,
                code: Some("mg".into())
            }
        );
    }

    #[test]
    fn test_sparse_identifier_and_coding() {
        let def = definition("identifier", SearchParamType::Token);
        let rows = ParameterBuilder::new(&def, "Patient")
            .build(&element(ElementKind::Other, json!({"value": "12345"})));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, token(None, "12345"));

        let def = definition("class", SearchParamType::Token);
        let rows = ParameterBuilder::new(&def, "Encounter")
            .build(&element(ElementKind::Other, json!({"code": "AMB"})));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, token(None, "AMB"));

        // a string parameter gives no meaning to the same shape
        let def = definition("alias", SearchParamType::String);
        let rows = ParameterBuilder::new(&def, "Organization")
            .build(&element(ElementKind::Other, json!({"code": "AMB"})));
        assert!(rows.is_empty());
    }

    #[test]
    fn test_values_follow_declared_type() {
        let def = definition("code-text", SearchParamType::String);
        let rows = ParameterBuilder::new(&def, "Observation").build(&element(
            ElementKind::CodeableConcept,
            json!({"coding": [{"system": "http://loinc.org", "code": "1234-5"}], "text": "Glucose"}),
        ));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, ParameterValue::String("Glucose".into()));
        assert!(rows.iter().all(|r| r.param_type == SearchParamType::String));

        let def = definition("flag", SearchParamType::String);
        let rows = ParameterBuilder::new(&def, "Patient").build(&PathNode::Primitive(PrimitiveValue::Boolean(true)));
        assert!(rows.is_empty());

        let def = definition("probability", SearchParamType::Number);
        let rows = ParameterBuilder::new(&def, "RiskAssessment")
            .build(&element(ElementKind::Quantity, json!({"value": 0.25, "unit": "%"})));
        assert_eq!(rows[0].value, ParameterValue::Number(Decimal::new(25, 2)));

        let def = definition("value-quantity", SearchParamType::Quantity);
        let rows = ParameterBuilder::new(&def, "Observation").build(&PathNode::Primitive(PrimitiveValue::Integer(7)));
        assert_eq!(
            rows[0].value,
            ParameterValue::Quantity {
                value: Decimal::from(7),
                system: None,
                code: None
            }
        );
    }

    #[test]
    fn test_reference_parsing() {
        assert_eq!(
            reference("Patient/123"),
            ParameterValue::Reference {
                reference: "Patient/123".into(),
                target_type: Some("Patient".into()),
                target_id: Some("123".into())
            }
        );
        assert_eq!(
            reference("http://other.org/fhir/Organization/o1/_history/3"),
            ParameterValue::Reference {
                reference: "http://other.org/fhir/Organization/o1/_history/3".into(),
                target_type: Some("Organization".into()),
                target_id: Some("o1".into())
            }
        );
        assert!(matches!(
            reference("#c1"),
            ParameterValue::Reference { target_type: None, target_id: None, .. }
        ));
    }
}
