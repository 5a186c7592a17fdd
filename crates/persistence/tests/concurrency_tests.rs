//! Concurrent writers against a file-backed database.

#![cfg(feature = "sqlite")]

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::TempDir;

use helios_persistence_jdbc::PersistenceError;
use helios_persistence_jdbc::persistence::{HistoryQuery, PersistenceContext};
use helios_persistence_jdbc::types::SearchQuery;

use common::*;

/// Two writers that both saw version 1 race to store version 2: exactly one
/// wins and the other gets a version conflict.
#[test]
fn test_version_two_race() {
    let dir = TempDir::new().expect("tempdir");
    let persistence = Arc::new(create_file_persistence(&dir.path().join("race.db")));

    let created = persistence.create(&patient("Racer")).expect("create");
    let id = created.logical_id().to_string();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["Left", "Right"]
        .into_iter()
        .map(|family| {
            let persistence = Arc::clone(&persistence);
            let barrier = Arc::clone(&barrier);
            let previous = created.resource.clone();
            let id = id.clone();
            thread::spawn(move || {
                let ctx = PersistenceContext::new().with_previous_resource(Some(previous));
                barrier.wait();
                persistence.update(&ctx, &id, &patient(family))
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("writer thread panicked"))
        .collect();

    let successes: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(successes.len(), 1, "exactly one writer stores version 2");
    assert_version(successes[0], 2);

    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(PersistenceError::VersionConflict { version_id: 2, .. })))
        .count();
    assert_eq!(conflicts, 1, "the other writer sees a version conflict");

    let history = persistence
        .history("Patient", &id, &HistoryQuery::new())
        .expect("history");
    assert_eq!(history.page.total_count(), 2);
}

/// Many threads creating resources at once share the dictionaries without
/// losing a write.
#[test]
fn test_concurrent_creates() {
    let dir = TempDir::new().expect("tempdir");
    let persistence = Arc::new(create_file_persistence(&dir.path().join("creates.db")));
    let threads = 4;
    let per_thread = 5;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let persistence = Arc::clone(&persistence);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for n in 0..per_thread {
                    let system = format!("http://example.org/system-{}", t);
                    let value = format!("{}-{}", t, n);
                    persistence
                        .create(&patient_with_identifiers("Crowd", &[(system.as_str(), value.as_str())]))
                        .expect("concurrent create");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("creator thread panicked");
    }

    let outcome = persistence
        .search(&SearchQuery::from_params(Some("Patient"), &[("family", "Crowd")]).expect("parse"))
        .expect("search");
    assert_eq!(outcome.total(), (threads * per_thread) as i64);

    let one = persistence
        .search(
            &SearchQuery::from_params(Some("Patient"), &[("identifier", "http://example.org/system-2|2-3")])
                .expect("parse"),
        )
        .expect("search");
    assert_eq!(one.total(), 1);

    let report = persistence.cache_diagnostics().expect("diagnostics");
    assert!(report.contains("code_systems cache: no discrepancies"));
}

/// Readers see a consistent current version while a writer updates.
#[test]
fn test_reads_during_updates() {
    let dir = TempDir::new().expect("tempdir");
    let persistence = Arc::new(create_file_persistence(&dir.path().join("reads.db")));
    let id = persistence.create(&patient("V1")).expect("create").logical_id().to_string();

    let writer = {
        let persistence = Arc::clone(&persistence);
        let id = id.clone();
        thread::spawn(move || {
            let ctx = PersistenceContext::new();
            for n in 2..=10 {
                persistence
                    .update(&ctx, &id, &patient(&format!("V{}", n)))
                    .expect("update");
            }
        })
    };

    let ctx = PersistenceContext::new();
    let mut last_seen = 0;
    for _ in 0..20 {
        let read = persistence.read(&ctx, "Patient", &id).expect("read");
        assert!(read.version_id >= last_seen, "versions never go backwards");
        assert_eq!(family_of(&read.resource), Some(format!("V{}", read.version_id).as_str()));
        last_seen = read.version_id;
    }
    writer.join().expect("writer thread panicked");

    let read = persistence.read(&ctx, "Patient", &id).expect("final read");
    assert_version(&read, 10);
}
