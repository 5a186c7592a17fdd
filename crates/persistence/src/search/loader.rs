//! SearchParameter Loader.
//!
//! Provides the built-in core parameters and parses SearchParameter resources
//! supplied as a Bundle, a JSON array, or a single resource.

use std::path::Path;

use serde_json::Value;

use crate::types::SearchParamType;

use super::errors::LoaderError;
use super::registry::{SearchParameterDefinition, SearchParameterSource, SearchParameterStatus};

const SP_BASE: &str = "http://hl7.org/fhir/SearchParameter";

/// Loader for SearchParameter definitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct SearchParameterLoader;

impl SearchParameterLoader {
    pub fn new() -> Self {
        Self
    }

    /// The core parameters known without any configuration.
    pub fn load_builtin(&self) -> Vec<SearchParameterDefinition> {
        core_search_parameters()
    }

    /// Loads SearchParameter resources from a JSON bundle, array or single
    /// resource. Entries of other resource types are ignored.
    pub fn load_from_json(&self, json: &Value) -> Result<Vec<SearchParameterDefinition>, LoaderError> {
        let is_search_parameter =
            |v: &Value| v.get("resourceType").and_then(Value::as_str) == Some("SearchParameter");

        let candidates: Vec<&Value> = if let Some(entries) = json.get("entry").and_then(Value::as_array) {
            entries.iter().filter_map(|e| e.get("resource")).collect()
        } else if let Some(array) = json.as_array() {
            array.iter().collect()
        } else {
            vec![json]
        };

        candidates
            .into_iter()
            .filter(|v| is_search_parameter(v))
            .map(|v| self.parse_resource(v))
            .collect()
    }

    /// Loads SearchParameter resources from a JSON file.
    pub fn load_file(&self, path: &Path) -> Result<Vec<SearchParameterDefinition>, LoaderError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoaderError::InvalidJson {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        let json: Value = serde_json::from_str(&content).map_err(|e| LoaderError::InvalidJson {
            message: format!("{}: {}", path.display(), e),
        })?;
        self.load_from_json(&json)
    }

    /// Parses one SearchParameter resource.
    pub fn parse_resource(&self, resource: &Value) -> Result<SearchParameterDefinition, LoaderError> {
        let url = resource
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| LoaderError::MissingField {
                field: "url".to_string(),
                url: None,
            })?
            .to_string();

        let field = |name: &str| {
            resource
                .get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| LoaderError::MissingField {
                    field: name.to_string(),
                    url: Some(url.clone()),
                })
        };

        let code = field("code")?.to_string();
        let type_str = field("type")?;
        let param_type = type_str
            .parse::<SearchParamType>()
            .map_err(|message| LoaderError::InvalidResource {
                message,
                url: Some(url.clone()),
            })?;

        let expression = resource
            .get("expression")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if expression.is_empty() && param_type != SearchParamType::Composite && !code.starts_with('_') {
            return Err(LoaderError::MissingField {
                field: "expression".to_string(),
                url: Some(url),
            });
        }

        let strings = |name: &str| -> Option<Vec<String>> {
            resource.get(name).and_then(Value::as_array).map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
        };

        let base = strings("base").unwrap_or_default();
        if base.is_empty() {
            return Err(LoaderError::MissingField {
                field: "base".to_string(),
                url: Some(url),
            });
        }

        let status = resource
            .get("status")
            .and_then(Value::as_str)
            .and_then(SearchParameterStatus::from_fhir_status)
            .unwrap_or_default();

        Ok(SearchParameterDefinition {
            url,
            code,
            param_type,
            expression,
            base,
            target: strings("target"),
            status,
            source: SearchParameterSource::Loaded,
        })
    }
}

fn param(
    base: &str,
    code: &str,
    param_type: SearchParamType,
    expression: &str,
) -> SearchParameterDefinition {
    let name = code.trim_start_matches('_');
    SearchParameterDefinition::new(format!("{SP_BASE}/{base}-{name}"), code, param_type, expression)
        .with_base(vec![base])
}

fn core_search_parameters() -> Vec<SearchParameterDefinition> {
    use SearchParamType::*;

    vec![
        // Every resource type. The resource type prefix is omitted because it
        // would never match a concrete type.
        param("Resource", "_id", Token, "id"),
        param("Resource", "_lastUpdated", Date, "meta.lastUpdated"),
        param("Resource", "_tag", Token, "meta.tag"),
        param("Resource", "_profile", Uri, "meta.profile"),
        param("Resource", "_security", Token, "meta.security"),
        // Patient
        param("Patient", "active", Token, "Patient.active"),
        param("Patient", "address", String, "Patient.address"),
        param("Patient", "address-city", String, "Patient.address.city"),
        param("Patient", "birthdate", Date, "Patient.birthDate"),
        param("Patient", "family", String, "Patient.name.family"),
        param("Patient", "gender", Token, "Patient.gender"),
        param("Patient", "general-practitioner", Reference, "Patient.generalPractitioner")
            .with_targets(vec!["Practitioner", "Organization"]),
        param("Patient", "given", String, "Patient.name.given"),
        param("Patient", "identifier", Token, "Patient.identifier"),
        param("Patient", "name", String, "Patient.name"),
        param("Patient", "organization", Reference, "Patient.managingOrganization")
            .with_targets(vec!["Organization"]),
        param("Patient", "telecom", Token, "Patient.telecom"),
        // Observation
        param("Observation", "category", Token, "Observation.category"),
        param("Observation", "code", Token, "Observation.code"),
        param("Observation", "date", Date, "Observation.effective"),
        param("Observation", "encounter", Reference, "Observation.encounter")
            .with_targets(vec!["Encounter"]),
        param("Observation", "patient", Reference, "Observation.subject.where(resolve() is Patient)")
            .with_targets(vec!["Patient"]),
        param("Observation", "performer", Reference, "Observation.performer"),
        param("Observation", "status", Token, "Observation.status"),
        param("Observation", "subject", Reference, "Observation.subject"),
        param("Observation", "value-quantity", Quantity, "Observation.value.ofType(Quantity)"),
        param("Observation", "value-string", String, "Observation.value.ofType(string)"),
        // Encounter
        param("Encounter", "class", Token, "Encounter.class"),
        param("Encounter", "date", Date, "Encounter.period"),
        param("Encounter", "patient", Reference, "Encounter.subject.where(resolve() is Patient)")
            .with_targets(vec!["Patient"]),
        param("Encounter", "service-provider", Reference, "Encounter.serviceProvider")
            .with_targets(vec!["Organization"]),
        param("Encounter", "status", Token, "Encounter.status"),
        param("Encounter", "subject", Reference, "Encounter.subject"),
        param("Encounter", "type", Token, "Encounter.type"),
        // Organization
        param("Organization", "active", Token, "Organization.active"),
        param("Organization", "address", String, "Organization.address"),
        param("Organization", "identifier", Token, "Organization.identifier"),
        param("Organization", "name", String, "Organization.name | Organization.alias"),
        param("Organization", "partof", Reference, "Organization.partOf")
            .with_targets(vec!["Organization"]),
        param("Organization", "type", Token, "Organization.type"),
        // Practitioner
        param("Practitioner", "active", Token, "Practitioner.active"),
        param("Practitioner", "address", String, "Practitioner.address"),
        param("Practitioner", "family", String, "Practitioner.name.family"),
        param("Practitioner", "given", String, "Practitioner.name.given"),
        param("Practitioner", "identifier", Token, "Practitioner.identifier"),
        param("Practitioner", "name", String, "Practitioner.name"),
        param("Practitioner", "telecom", Token, "Practitioner.telecom"),
        // RiskAssessment
        param("RiskAssessment", "probability", Number, "RiskAssessment.prediction.probability"),
    ]
}
