//! In-process dictionary caches.
//!
//! Parameter names, code systems and resource types are normalized into small
//! integer-keyed tables. These caches mirror those tables so the hot insert and
//! search paths rarely need a dictionary lookup.
//!
//! The caches are advisory. Every lookup path falls back to the database on a
//! miss, so an entry that is missing, or even one that disagrees with the
//! database, costs a query but never produces a wrong row. Disagreements are
//! reported by [`DictionaryCache::report_discrepancies`] for diagnostics.
//!
//! Entries created or first read inside a transaction are staged in
//! [`CacheUpdates`] and only promoted with [`PersistenceCaches::promote`] after
//! that transaction commits; a rolled-back insert must not leave an id behind.

mod updates;

pub use updates::CacheUpdates;

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::config::CacheConfig;

/// A concurrent string-to-id cache for one dictionary table.
#[derive(Debug)]
pub struct DictionaryCache {
    name: &'static str,
    enabled: bool,
    entries: DashMap<String, i64>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DictionaryCache {
    pub fn new(name: &'static str, enabled: bool) -> Self {
        Self {
            name,
            enabled,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Looks up `key`. A disabled cache always misses.
    pub fn get(&self, key: &str) -> Option<i64> {
        if !self.enabled {
            return None;
        }
        match self.entries.get(key) {
            Some(id) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(*id)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Adds or replaces an entry. No-op when disabled.
    pub fn put(&self, key: impl Into<String>, id: i64) {
        if self.enabled {
            self.entries.insert(key.into(), id);
        }
    }

    pub fn put_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, i64)>,
    {
        if !self.enabled {
            return;
        }
        for (key, id) in entries {
            self.entries.insert(key, id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Sorted snapshot of the cache contents.
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Human-readable dump of the cache contents.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let (hits, misses) = self.stats();
        let _ = writeln!(
            out,
            "{} cache (enabled={}, entries={}, hits={}, misses={})",
            self.name,
            self.enabled,
            self.len(),
            hits,
            misses
        );
        for (key, id) in self.snapshot() {
            let _ = writeln!(out, "    {} = {}", key, id);
        }
        out
    }

    /// Compares the cache against the authoritative dictionary contents and
    /// describes every entry whose id differs or that the database lacks.
    pub fn report_discrepancies(&self, database: &HashMap<String, i64>) -> String {
        let mut out = String::new();
        let mut count = 0usize;
        for (key, cached) in self.snapshot() {
            match database.get(&key) {
                Some(db_id) if *db_id == cached => {}
                Some(db_id) => {
                    count += 1;
                    let _ = writeln!(
                        out,
                        "    {}: cached id {} != database id {}",
                        key, cached, db_id
                    );
                }
                None => {
                    count += 1;
                    let _ = writeln!(out, "    {}: cached id {} not in database", key, cached);
                }
            }
        }
        if count == 0 {
            format!("{} cache: no discrepancies\n", self.name)
        } else {
            format!("{} cache: {} discrepancies\n{}", self.name, count, out)
        }
    }
}

/// The process-wide set of dictionary caches.
///
/// Build one per process (or per persistence facade) and share it with `Arc`.
#[derive(Debug)]
pub struct PersistenceCaches {
    pub parameter_names: DictionaryCache,
    pub code_systems: DictionaryCache,
    pub resource_types: DictionaryCache,
}

impl PersistenceCaches {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            parameter_names: DictionaryCache::new("parameter_names", config.parameter_names),
            code_systems: DictionaryCache::new("code_systems", config.code_systems),
            resource_types: DictionaryCache::new("resource_types", config.resource_types),
        }
    }

    /// Publishes ids staged by a committed transaction.
    pub fn promote(&self, updates: CacheUpdates) {
        if updates.is_empty() {
            return;
        }
        tracing::debug!(
            parameter_names = updates.parameter_names.len(),
            code_systems = updates.code_systems.len(),
            resource_types = updates.resource_types.len(),
            "promoting committed dictionary ids into caches"
        );
        self.parameter_names.put_all(updates.parameter_names);
        self.code_systems.put_all(updates.code_systems);
        self.resource_types.put_all(updates.resource_types);
    }

    /// Dumps all three caches.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.parameter_names.dump());
        out.push_str(&self.code_systems.dump());
        out.push_str(&self.resource_types.dump());
        out
    }
}

impl Default for PersistenceCaches {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_get_put() {
        let cache = DictionaryCache::new("parameter_names", true);
        assert_eq!(cache.get("name"), None);
        cache.put("name", 7);
        assert_eq!(cache.get("name"), Some(7));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_disabled_cache_always_misses() {
        let cache = DictionaryCache::new("code_systems", false);
        cache.put("http://loinc.org", 1);
        assert_eq!(cache.get("http://loinc.org"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_report_discrepancies() {
        let cache = DictionaryCache::new("parameter_names", true);
        cache.put("name", 1);
        cache.put("gender", 2);
        cache.put("ghost", 9);

        let mut db = HashMap::new();
        db.insert("name".to_string(), 1);
        db.insert("gender".to_string(), 3);

        let report = cache.report_discrepancies(&db);
        assert!(report.starts_with("parameter_names cache: 2 discrepancies"));
        assert!(report.contains("gender: cached id 2 != database id 3"));
        assert!(report.contains("ghost: cached id 9 not in database"));
        assert!(!report.contains("name: cached"));
    }

    #[test]
    fn test_no_discrepancies() {
        let cache = DictionaryCache::new("resource_types", true);
        cache.put("Patient", 1);
        let db = HashMap::from([("Patient".to_string(), 1)]);
        assert_eq!(cache.report_discrepancies(&db), "resource_types cache: no discrepancies\n");
    }

    #[test]
    fn test_dump_lists_entries_sorted() {
        let cache = DictionaryCache::new("code_systems", true);
        cache.put("b", 2);
        cache.put("a", 1);
        let dump = cache.dump();
        let a = dump.find("a = 1").unwrap();
        let b = dump.find("b = 2").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_promote() {
        let caches = PersistenceCaches::default();
        let mut updates = CacheUpdates::default();
        updates.parameter_names.insert("name".to_string(), 4);
        updates.resource_types.insert("Patient".to_string(), 1);

        caches.promote(updates);
        assert_eq!(caches.parameter_names.get("name"), Some(4));
        assert_eq!(caches.resource_types.get("Patient"), Some(1));
        assert!(caches.code_systems.is_empty());
    }

    #[test]
    fn test_concurrent_population() {
        let cache = Arc::new(DictionaryCache::new("parameter_names", true));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..100 {
                        cache.put(format!("param-{}", i), i);
                        assert_eq!(cache.get(&format!("param-{}", i)), Some(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 100);
    }
}
