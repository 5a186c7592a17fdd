//! Create, read, update and delete through the persistence facade.

#![cfg(feature = "sqlite")]

mod common;

use serde_json::json;

use helios_persistence_jdbc::{ConnectionProvider, PersistenceError};
use helios_persistence_jdbc::persistence::PersistenceContext;
use helios_persistence_jdbc::types::format_instant;

use common::*;

// ============================================================================
// Create
// ============================================================================

/// A created resource reads back as version 1 and not deleted.
#[test]
fn test_create_then_read() {
    let persistence = create_persistence();
    let created = persistence.create(&patient("Smith")).expect("create");

    assert_version(&created, 1);
    assert!(!created.deleted);
    assert_eq!(
        created.resource.last_updated(),
        Some(format_instant(&created.last_updated).as_str())
    );

    let read = persistence
        .read(&PersistenceContext::new(), "Patient", created.logical_id())
        .expect("read");
    assert_version(&read, 1);
    assert!(!read.deleted);
    assert_eq!(read.resource, created.resource);
    assert_eq!(read.last_updated, created.last_updated);
}

/// Reading an unknown id is not-found, not an unexpected failure.
#[test]
fn test_read_unknown() {
    let persistence = create_persistence();
    let err = persistence
        .read(&PersistenceContext::new(), "Patient", "does-not-exist")
        .expect_err("unknown id");
    assert!(matches!(err, PersistenceError::NotFound { .. }));
    assert!(err.is_client_condition());
}

/// Each created resource gets its own logical id.
#[test]
fn test_create_assigns_distinct_ids() {
    let persistence = create_persistence();
    let a = persistence.create(&patient("A")).expect("create a");
    let b = persistence.create(&patient("B")).expect("create b");
    assert_ne!(a.logical_id(), b.logical_id());
}

// ============================================================================
// Update
// ============================================================================

/// N updates produce versions 2..=N+1.
#[test]
fn test_updates_increment_version() {
    let persistence = create_persistence();
    let ctx = PersistenceContext::new();
    let created = persistence.create(&patient("Smith")).expect("create");
    let id = created.logical_id().to_string();

    for n in 2..=5 {
        let updated = persistence
            .update(&ctx, &id, &patient(&format!("Smith{}", n)))
            .expect("update");
        assert_version(&updated, n);
    }

    let read = persistence.read(&ctx, "Patient", &id).expect("read");
    assert_version(&read, 5);
    assert_eq!(family_of(&read.resource), Some("Smith5"));
}

/// Update of an id that was never stored creates it at version 1.
#[test]
fn test_update_as_create() {
    let persistence = create_persistence();
    let updated = persistence
        .update(&PersistenceContext::new(), "client-chosen", &patient("New"))
        .expect("update-as-create");

    assert_version(&updated, 1);
    assert_eq!(updated.logical_id(), "client-chosen");
}

/// A hint saying there is no previous version forces version 1, which
/// conflicts with a stored resource.
#[test]
fn test_empty_hint_conflicts_with_stored_resource() {
    let persistence = create_persistence();
    let ctx = PersistenceContext::new();
    persistence.update(&ctx, "p1", &patient("First")).expect("create via update");

    let hinted = PersistenceContext::new().with_previous_resource(None);
    let err = persistence
        .update(&hinted, "p1", &patient("Second"))
        .expect_err("stale empty hint");
    assert!(matches!(err, PersistenceError::VersionConflict { version_id: 1, .. }));
    assert!(err.is_retryable());
}

// ============================================================================
// Delete
// ============================================================================

/// Delete appends a flagged version; deleting again changes nothing.
#[test]
fn test_delete_is_idempotent() {
    let persistence = create_persistence();
    let created = persistence.create(&patient("Smith")).expect("create");
    let id = created.logical_id().to_string();

    let deleted = persistence.delete("Patient", &id).expect("delete");
    assert_version(&deleted, 2);
    assert!(deleted.deleted);

    let again = persistence.delete("Patient", &id).expect("delete again");
    assert_eq!(again.version_id, 2);
    assert!(again.deleted);
    assert_eq!(again.last_updated, deleted.last_updated);
}

/// A deleted resource reads as deleted unless the context asks for it.
#[test]
fn test_read_deleted() {
    let persistence = create_persistence();
    let created = persistence.create(&patient("Smith")).expect("create");
    let id = created.logical_id().to_string();
    persistence.delete("Patient", &id).expect("delete");

    let err = persistence
        .read(&PersistenceContext::new(), "Patient", &id)
        .expect_err("deleted");
    assert!(matches!(err, PersistenceError::Deleted { version_id: 2, .. }));

    let ctx = PersistenceContext::new().with_include_deleted(true);
    let read = persistence.read(&ctx, "Patient", &id).expect("include deleted");
    assert!(read.deleted);
    // the deleted version keeps the previous content
    assert_eq!(family_of(&read.resource), Some("Smith"));
}

/// Deleting an unknown resource is not-found.
#[test]
fn test_delete_unknown() {
    let persistence = create_persistence();
    let err = persistence.delete("Patient", "missing").expect_err("unknown");
    assert!(matches!(err, PersistenceError::NotFound { .. }));
}

/// Updating a deleted resource brings it back as the next version.
#[test]
fn test_update_after_delete() {
    let persistence = create_persistence();
    let ctx = PersistenceContext::new();
    let created = persistence.create(&patient("Smith")).expect("create");
    let id = created.logical_id().to_string();
    persistence.delete("Patient", &id).expect("delete");

    let revived = persistence.update(&ctx, &id, &patient("Smith")).expect("update");
    assert_version(&revived, 3);
    assert!(!persistence.read(&ctx, "Patient", &id).expect("read").deleted);
}

// ============================================================================
// Indexing
// ============================================================================

/// A patient with two identifiers stores two token rows for `identifier`.
#[test]
fn test_two_identifiers_two_token_rows() {
    let (persistence, provider) = create_with_provider();
    let created = persistence
        .create(&patient_with_identifiers(
            "Smith",
            &[("http://example.org/mrn", "A-1"), ("http://example.org/ssn", "999")],
        ))
        .expect("create");

    let conn = provider.connection().expect("connection");
    let mut stmt = conn
        .prepare(
            "SELECT T.token_value, C.code_system_name
             FROM token_values T
             JOIN parameter_names N ON N.parameter_name_id = T.parameter_name_id
             JOIN code_systems C ON C.code_system_id = T.code_system_id
             JOIN resources R ON R.resource_id = T.resource_id
             WHERE N.parameter_name = 'identifier' AND R.logical_id = ?1
             ORDER BY T.token_value",
        )
        .expect("prepare");
    let rows: Vec<(String, String)> = stmt
        .query_map([created.logical_id()], |row| Ok((row.get(0)?, row.get(1)?)))
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("rows");

    assert_eq!(
        rows,
        vec![
            ("999".to_string(), "http://example.org/ssn".to_string()),
            ("A-1".to_string(), "http://example.org/mrn".to_string()),
        ]
    );
}

/// Only the newest version keeps parameter rows.
#[test]
fn test_parameters_follow_latest_version() {
    let (persistence, provider) = create_with_provider();
    let ctx = PersistenceContext::new();
    let created = persistence.create(&patient("Before")).expect("create");
    let id = created.logical_id().to_string();
    persistence.update(&ctx, &id, &patient("After")).expect("update");

    // the in-memory pool has one connection; release it before the next write
    let conn = provider.connection().expect("connection");
    let families: Vec<String> = conn
        .prepare(
            "SELECT S.str_value FROM str_values S
             JOIN parameter_names N ON N.parameter_name_id = S.parameter_name_id
             WHERE N.parameter_name = 'family'",
        )
        .expect("prepare")
        .query_map([], |row| row.get(0))
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("rows");
    assert_eq!(families, vec!["After".to_string()]);
    drop(conn);

    // deleting leaves no parameters at all
    persistence.delete("Patient", &id).expect("delete");
    let conn = provider.connection().expect("connection");
    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM str_values", [], |row| row.get(0))
        .expect("count");
    assert_eq!(remaining, 0);
}

/// Resources keep elements the index knows nothing about.
#[test]
fn test_payload_round_trip_keeps_unknown_elements() {
    let persistence = create_persistence();
    let created = persistence
        .create(&resource(json!({
            "resourceType": "Basic",
            "code": {"text": "custom"},
            "extension": [{"url": "http://example.org/x", "valueString": "y"}]
        })))
        .expect("create");

    let read = persistence
        .read(&PersistenceContext::new(), "Basic", created.logical_id())
        .expect("read");
    assert_eq!(read.resource.content()["extension"][0]["valueString"], "y");
}
