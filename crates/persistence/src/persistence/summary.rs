//! `_summary` and `_elements` views of returned resources.

use crate::types::{Resource, SearchQuery, SummaryMode};

/// Summary elements of the resource types with built-in search parameters.
fn summary_elements(resource_type: &str) -> Option<&'static [&'static str]> {
    let elements: &'static [&'static str] = match resource_type {
        "Patient" => &[
            "identifier", "active", "name", "telecom", "gender", "birthDate", "deceased",
            "address", "managingOrganization", "link",
        ],
        "Observation" => &[
            "identifier", "basedOn", "partOf", "status", "category", "code", "subject", "focus",
            "encounter", "effective", "issued", "performer", "value", "dataAbsentReason",
            "interpretation", "hasMember", "derivedFrom",
        ],
        "Encounter" => &[
            "identifier", "status", "class", "type", "serviceType", "priority", "subject",
            "episodeOfCare", "basedOn", "participant", "appointment", "period", "reasonCode",
            "reasonReference", "diagnosis", "account", "location", "serviceProvider", "partOf",
        ],
        "Organization" => &["identifier", "active", "type", "name", "alias", "partOf"],
        "Practitioner" => &["identifier", "active", "name", "telecom", "address", "gender", "birthDate"],
        _ => return None,
    };
    Some(elements)
}

/// Applies the query's `_elements` or, when absent, its `_summary` mode.
pub(crate) fn apply(resource: Resource, query: &SearchQuery) -> Resource {
    if let Some(elements) = &query.elements {
        return resource.retain_elements(elements);
    }
    match query.summary {
        Some(SummaryMode::True) => match summary_elements(resource.resource_type()) {
            Some(elements) => resource.retain_elements(elements),
            None => resource.without_elements(&["text", "contained"]),
        },
        Some(SummaryMode::Text) => resource.retain_elements(&["text"]),
        Some(SummaryMode::Data) => resource.without_elements(&["text"]),
        Some(SummaryMode::Count) | Some(SummaryMode::False) | None => resource,
    }
}
