//! Shared fixtures for the integration tests.
//!
//! Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Value, json};

use helios_persistence_jdbc::config::SqliteConfig;
use helios_persistence_jdbc::persistence::{JdbcPersistence, SingleResourceResult};
use helios_persistence_jdbc::search::{SearchParameterExtractor, SearchParameterRegistry};
use helios_persistence_jdbc::types::Resource;
use helios_persistence_jdbc::{
    ConnectionProvider, GzipJsonCodec, PersistenceCaches, PersistenceConfig,
    SqliteConnectionProvider,
};

/// A facade over a fresh in-memory database.
pub fn create_persistence() -> JdbcPersistence {
    JdbcPersistence::in_memory().expect("Failed to create in-memory persistence")
}

/// A facade assembled from its parts, returning the provider too so tests can
/// inspect the tables directly.
pub fn create_with_provider() -> (JdbcPersistence, Arc<SqliteConnectionProvider>) {
    let provider = Arc::new(SqliteConnectionProvider::in_memory().expect("Failed to open pool"));
    provider.init_schema().expect("Failed to initialize schema");

    let registry = Arc::new(RwLock::new(SearchParameterRegistry::with_builtin()));
    let persistence = JdbcPersistence::new(
        Arc::clone(&provider) as Arc<dyn ConnectionProvider>,
        Arc::new(PersistenceCaches::default()),
        SearchParameterExtractor::new(registry),
        Arc::new(GzipJsonCodec::default()),
        PersistenceConfig::default(),
    );
    (persistence, provider)
}

/// A facade over a database file, for tests that need several connections.
pub fn create_file_persistence(path: &Path) -> JdbcPersistence {
    let config = PersistenceConfig {
        sqlite: SqliteConfig::file(path.to_string_lossy()),
        ..PersistenceConfig::default()
    };
    JdbcPersistence::open(config).expect("Failed to open file persistence")
}

pub fn resource(value: Value) -> Resource {
    Resource::from_json(value).expect("Invalid test resource")
}

pub fn patient(family: &str) -> Resource {
    resource(json!({
        "resourceType": "Patient",
        "name": [{"family": family, "given": ["Test"]}],
        "gender": "female"
    }))
}

pub fn patient_with_identifiers(family: &str, identifiers: &[(&str, &str)]) -> Resource {
    let identifiers: Vec<Value> = identifiers
        .iter()
        .map(|(system, value)| json!({"system": system, "value": value}))
        .collect();
    resource(json!({
        "resourceType": "Patient",
        "identifier": identifiers,
        "name": [{"family": family}]
    }))
}

pub fn observation(patient_id: &str, code: &str, value: f64) -> Resource {
    resource(json!({
        "resourceType": "Observation",
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": code}]},
        "subject": {"reference": format!("Patient/{}", patient_id)},
        "effectiveDateTime": "2024-03-15T10:30:00Z",
        "valueQuantity": {
            "value": value,
            "unit": "mmHg",
            "system": "http://unitsofmeasure.org",
            "code": "mm[Hg]"
        }
    }))
}

pub fn family_of(resource: &Resource) -> Option<&str> {
    resource.content()["name"][0]["family"].as_str()
}

/// Asserts the stamped identity of a stored version.
pub fn assert_version(result: &SingleResourceResult, expected: i32) {
    assert_eq!(
        result.version_id, expected,
        "Version mismatch: expected {}, got {}",
        expected, result.version_id
    );
    assert_eq!(
        result.resource.version_id(),
        Some(expected.to_string().as_str()),
        "meta.versionId does not match the stored version"
    );
}
