//! Per-call options and the result types of the persistence facade.

use chrono::{DateTime, Utc};

use crate::types::{PageInfo, Resource};

/// Options a caller passes with each facade operation.
///
/// ```
/// use helios_persistence_jdbc::persistence::PersistenceContext;
///
/// let ctx = PersistenceContext::new().with_include_deleted(true);
/// assert!(ctx.include_deleted());
/// assert!(ctx.previous_resource().is_none());
///
/// // "the caller already knows there is no previous version"
/// let ctx = PersistenceContext::new().with_previous_resource(None);
/// assert_eq!(ctx.previous_resource(), Some(None));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistenceContext {
    include_deleted: bool,
    previous_resource: Option<Option<Resource>>,
}

impl PersistenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return deleted resources from `read`/`vread` instead of failing.
    pub fn with_include_deleted(mut self, include_deleted: bool) -> Self {
        self.include_deleted = include_deleted;
        self
    }

    /// The version the caller already fetched before an update. `None` means
    /// the caller looked and found nothing.
    pub fn with_previous_resource(mut self, previous: Option<Resource>) -> Self {
        self.previous_resource = Some(previous);
        self
    }

    pub fn include_deleted(&self) -> bool {
        self.include_deleted
    }

    /// `None` when no hint was given; `Some(None)` when the hint says there is
    /// no previous version.
    pub fn previous_resource(&self) -> Option<Option<&Resource>> {
        self.previous_resource.as_ref().map(Option::as_ref)
    }
}

/// A single stored version.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleResourceResult {
    /// The resource as stored, with `id` and `meta` stamped.
    pub resource: Resource,
    pub version_id: i32,
    pub last_updated: DateTime<Utc>,
    pub deleted: bool,
}

impl SingleResourceResult {
    pub fn logical_id(&self) -> &str {
        self.resource.id().unwrap_or_default()
    }
}

/// Paging and filtering for a history request.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    /// Only versions stored at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// 1-based.
    pub page_number: u32,
    pub page_size: Option<u32>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            since: None,
            page_number: 1,
            page_size: None,
        }
    }
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_page(mut self, page_number: u32, page_size: u32) -> Self {
        self.page_number = page_number.max(1);
        self.page_size = Some(page_size);
        self
    }
}

/// One page of a resource's history, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryOutcome {
    /// Deleted versions appear as deletion markers (type, id and meta only).
    pub resources: Vec<Resource>,
    pub page: PageInfo,
    /// Version numbers on this page that are soft deletes.
    pub deleted_versions: Vec<i32>,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub resources: Vec<Resource>,
    /// Resources pulled in by `_include`, not counted in the page.
    pub included: Vec<Resource>,
    pub page: PageInfo,
}

impl SearchOutcome {
    pub fn total(&self) -> i64 {
        self.page.total_count()
    }
}
