//! The immutable FHIR resource value.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{PersistenceError, PersistenceResult};

/// A FHIR resource as a validated, immutable JSON value.
///
/// Construction goes through [`Resource::from_json`], which guarantees the
/// value is a JSON object with a non-empty `resourceType`. Operations that
/// change identity or metadata return a new `Resource`.
///
/// # Examples
///
/// ```
/// use helios_persistence_jdbc::types::Resource;
/// use serde_json::json;
///
/// let patient = Resource::from_json(json!({
///     "resourceType": "Patient",
///     "name": [{"family": "Smith"}]
/// })).unwrap();
///
/// assert_eq!(patient.resource_type(), "Patient");
/// assert!(patient.id().is_none());
///
/// assert!(Resource::from_json(json!({"name": "no type"})).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Resource {
    #[serde(skip)]
    resource_type: String,
    content: Value,
}

impl Resource {
    /// Validates and wraps a JSON resource.
    pub fn from_json(content: Value) -> PersistenceResult<Self> {
        let obj = content
            .as_object()
            .ok_or_else(|| PersistenceError::invalid_argument("resource must be a JSON object"))?;

        let resource_type = obj
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| PersistenceError::invalid_argument("resource is missing resourceType"))?;

        if !is_valid_type_name(resource_type) {
            return Err(PersistenceError::invalid_argument(format!(
                "invalid resourceType '{}'",
                resource_type
            )));
        }

        if obj.len() == 1 {
            return Err(PersistenceError::invalid_argument(format!(
                "{} resource has no content",
                resource_type
            )));
        }

        Ok(Self {
            resource_type: resource_type.to_string(),
            content,
        })
    }

    /// Parses a JSON document into a resource.
    pub fn parse(json: &str) -> PersistenceResult<Self> {
        Self::from_json(serde_json::from_str(json)?)
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn id(&self) -> Option<&str> {
        self.content.get("id").and_then(Value::as_str)
    }

    /// `meta.versionId`, if present.
    pub fn version_id(&self) -> Option<&str> {
        self.meta_field("versionId")
    }

    /// `meta.lastUpdated`, if present.
    pub fn last_updated(&self) -> Option<&str> {
        self.meta_field("lastUpdated")
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn into_content(self) -> Value {
        self.content
    }

    /// Returns `Type/id`, or just the type when there is no id.
    pub fn url(&self) -> String {
        match self.id() {
            Some(id) => format!("{}/{}", self.resource_type, id),
            None => self.resource_type.clone(),
        }
    }

    /// Returns a copy with `id`, `meta.versionId` and `meta.lastUpdated`
    /// replaced. Other `meta` elements are kept.
    pub fn with_identity(
        &self,
        logical_id: &str,
        version_id: i32,
        last_updated: DateTime<Utc>,
    ) -> Resource {
        let mut content = self.content.clone();
        if let Value::Object(obj) = &mut content {
            obj.insert("id".to_string(), Value::String(logical_id.to_string()));

            let meta = obj
                .entry("meta")
                .or_insert_with(|| Value::Object(Map::new()));
            if !meta.is_object() {
                *meta = Value::Object(Map::new());
            }
            if let Value::Object(meta) = meta {
                meta.insert("versionId".to_string(), Value::String(version_id.to_string()));
                meta.insert(
                    "lastUpdated".to_string(),
                    Value::String(format_instant(&last_updated)),
                );
            }
        }

        Resource {
            resource_type: self.resource_type.clone(),
            content,
        }
    }

    /// The stand-in rendered for a deleted version: type, id and meta only.
    pub fn deleted_marker(&self) -> Resource {
        let mut marker = Map::new();
        marker.insert(
            "resourceType".to_string(),
            Value::String(self.resource_type.clone()),
        );
        if let Some(obj) = self.content.as_object() {
            for key in ["id", "meta"] {
                if let Some(value) = obj.get(key) {
                    marker.insert(key.to_string(), value.clone());
                }
            }
        }
        Resource {
            resource_type: self.resource_type.clone(),
            content: Value::Object(marker),
        }
    }

    /// Returns a copy keeping only `resourceType`, `id`, `meta` and the named
    /// top-level elements. A choice element name such as `value` also keeps
    /// its typed form (`valueQuantity`).
    pub fn retain_elements<S: AsRef<str>>(&self, elements: &[S]) -> Resource {
        let Some(obj) = self.content.as_object() else {
            return self.clone();
        };

        let filtered: Map<String, Value> = obj
            .iter()
            .filter(|(key, _)| {
                matches!(key.as_str(), "resourceType" | "id" | "meta")
                    || elements.iter().any(|e| element_matches(key, e.as_ref()))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Resource {
            resource_type: self.resource_type.clone(),
            content: Value::Object(filtered),
        }
    }

    /// Returns a copy without the named top-level elements. `resourceType`,
    /// `id` and `meta` are never removed.
    pub fn without_elements<S: AsRef<str>>(&self, elements: &[S]) -> Resource {
        let Some(obj) = self.content.as_object() else {
            return self.clone();
        };

        let filtered: Map<String, Value> = obj
            .iter()
            .filter(|(key, _)| {
                matches!(key.as_str(), "resourceType" | "id" | "meta")
                    || !elements.iter().any(|e| element_matches(key, e.as_ref()))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Resource {
            resource_type: self.resource_type.clone(),
            content: Value::Object(filtered),
        }
    }

    fn meta_field(&self, name: &str) -> Option<&str> {
        self.content
            .get("meta")
            .and_then(|m| m.get(name))
            .and_then(Value::as_str)
    }
}

impl TryFrom<Value> for Resource {
    type Error = PersistenceError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Resource::from_json(value)
    }
}

fn is_valid_type_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

fn element_matches(key: &str, element: &str) -> bool {
    if key == element {
        return true;
    }
    // value[x] style choice elements
    key.strip_prefix(element)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_uppercase())
}

/// Formats an instant the way it is stamped into `meta.lastUpdated`.
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn patient() -> Resource {
        Resource::from_json(json!({
            "resourceType": "Patient",
            "id": "client-id",
            "meta": {"profile": ["http://example.org/profile"]},
            "text": {"status": "generated"},
            "name": [{"family": "Smith"}],
            "deceasedBoolean": false
        }))
        .unwrap()
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(Resource::from_json(json!([1, 2])).is_err());
        assert!(Resource::from_json(json!({"resourceType": "patient", "id": "1"})).is_err());
        assert!(Resource::from_json(json!({"resourceType": ""})).is_err());
        assert!(Resource::from_json(json!({"resourceType": "Patient"})).is_err());
    }

    #[test]
    fn test_with_identity_preserves_meta() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let stamped = patient().with_identity("abc", 3, at);

        assert_eq!(stamped.id(), Some("abc"));
        assert_eq!(stamped.version_id(), Some("3"));
        assert_eq!(stamped.last_updated(), Some("2024-05-01T12:00:00.000000Z"));
        assert_eq!(
            stamped.content()["meta"]["profile"][0],
            "http://example.org/profile"
        );
        // original is untouched
        assert_eq!(patient().id(), Some("client-id"));
    }

    #[test]
    fn test_deleted_marker() {
        let marker = patient().deleted_marker();
        let obj = marker.content().as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert!(obj.contains_key("meta"));
        assert!(!obj.contains_key("name"));
    }

    #[test]
    fn test_retain_elements() {
        let subset = patient().retain_elements(&["name", "deceased"]);
        let obj = subset.content().as_object().unwrap();
        assert!(obj.contains_key("name"));
        assert!(obj.contains_key("deceasedBoolean"));
        assert!(obj.contains_key("id"));
        assert!(!obj.contains_key("text"));
    }

    #[test]
    fn test_without_elements() {
        let stripped = patient().without_elements(&["text", "deceased", "id"]);
        let obj = stripped.content().as_object().unwrap();
        assert!(!obj.contains_key("text"));
        assert!(!obj.contains_key("deceasedBoolean"));
        assert!(obj.contains_key("name"));
        assert!(obj.contains_key("id"));
    }

    #[test]
    fn test_url() {
        assert_eq!(patient().url(), "Patient/client-id");
    }
}
