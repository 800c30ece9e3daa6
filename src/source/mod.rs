//! History source interfaces and paging helpers.
//!
//! Ownership model:
//! - `HistorySource` builds the grouped history query for a set of
//!   `ScanParameters` and hands back a `PageWindow`.
//! - `PageWindow` exposes fetch-by-index over the materialized result. For
//!   fixed parameters and page index the fetched page must be identical across
//!   executions; resumption relies on it.
//! - `PagedScanner` is the scan-facing wrapper that adds range checks and
//!   timing logs on top of any source.

use chrono::NaiveDate;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::constants::scan::DEFAULT_NAME_MARKER;
use crate::errors::ReconcileError;
use crate::keys::CompositeKey;
use crate::types::{FieldValue, SourceId, SummaryKey};

/// Job-level filter criteria; fixed for the life of a job.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanParameters {
    /// Subsidiary ids to include; empty means all.
    pub subs: Vec<FieldValue>,
    /// Accounting book ids to include; empty means all.
    pub books: Vec<FieldValue>,
    /// Asset type ids to include; empty means all.
    pub asset_types: Vec<FieldValue>,
    /// Only history dated on or before this day is scanned.
    pub date: Option<NaiveDate>,
}

impl ScanParameters {
    /// Parse the serialized job parameters. Blank input yields the defaults.
    pub fn from_json(raw: &str) -> Result<Self, ReconcileError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(|err| ReconcileError::InvalidParameters(err.to_string()))
    }

    /// Serialize for checkpoint parameters.
    pub fn to_json(&self) -> Result<String, ReconcileError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One page of distinct history keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    /// Zero-based page position within the window.
    pub index: usize,
    /// Keys in query order.
    pub keys: Vec<SummaryKey>,
}

/// Materialized, paginated result of one history query.
pub trait PageWindow: Send {
    /// Number of pages in the window.
    fn page_count(&self) -> usize;
    /// Number of grouped rows across all pages.
    fn record_count(&self) -> usize;
    /// Fetch page `page_index`. Deterministic and side-effect free.
    fn fetch(&self, page_index: usize) -> Result<Page, ReconcileError>;
}

/// Paginated history query collaborator.
pub trait HistorySource: Send + Sync {
    /// Stable source identifier used in logs and errors.
    fn id(&self) -> &str;
    /// Build and run the grouped history query.
    ///
    /// Return `Ok(None)` when no query can be constructed for `params`.
    fn open(&self, params: &ScanParameters) -> Result<Option<Box<dyn PageWindow>>, ReconcileError>;
}

/// Scan-facing wrapper around a `HistorySource`.
pub struct PagedScanner {
    source: Arc<dyn HistorySource>,
}

impl PagedScanner {
    /// Wrap `source`.
    pub fn new(source: Arc<dyn HistorySource>) -> Self {
        Self { source }
    }

    /// Open the page window for `params`.
    pub fn open(&self, params: &ScanParameters) -> Result<Option<ScanWindow>, ReconcileError> {
        let started = Instant::now();
        let window = self.source.open(params)?;
        debug!(
            "[reconcile:scan] history query on '{}' opened in {} ms",
            self.source.id(),
            started.elapsed().as_millis()
        );
        Ok(window.map(|inner| {
            debug!(
                "[reconcile:scan] history results={} pages={}",
                inner.record_count(),
                inner.page_count()
            );
            ScanWindow {
                source_id: self.source.id().to_string(),
                inner,
            }
        }))
    }
}

/// Opened page window with range checks and fetch timing.
pub struct ScanWindow {
    source_id: SourceId,
    inner: Box<dyn PageWindow>,
}

impl ScanWindow {
    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.inner.page_count()
    }

    /// Number of grouped rows.
    pub fn record_count(&self) -> usize {
        self.inner.record_count()
    }

    /// Fetch `page_index`, rejecting indexes past the last page.
    pub fn fetch(&self, page_index: usize) -> Result<Page, ReconcileError> {
        let page_count = self.inner.page_count();
        if page_index >= page_count {
            return Err(ReconcileError::PageFetch {
                page_index,
                reason: format!(
                    "source '{}' has only {page_count} pages",
                    self.source_id
                ),
            });
        }
        let started = Instant::now();
        let page = self.inner.fetch(page_index)?;
        debug!(
            "[reconcile:scan] fetch ({page_index}) returned {} keys in {} ms",
            page.keys.len(),
            started.elapsed().as_millis()
        );
        Ok(page)
    }
}

/// One depreciation history row as seen by the grouped query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryRecord {
    /// Summary key the row groups under.
    pub name: SummaryKey,
    /// Subsidiary column.
    pub subsidiary: Option<FieldValue>,
    /// Accounting book column.
    pub book: Option<FieldValue>,
    /// Asset type column.
    pub asset_type: Option<FieldValue>,
    /// History date used by the as-of filter.
    pub date: Option<NaiveDate>,
}

impl HistoryRecord {
    /// Build a record whose columns are taken from its own key.
    ///
    /// Malformed keys produce a record with only the name set.
    pub fn from_key(name: impl Into<SummaryKey>) -> Self {
        let name = name.into();
        let decoded = CompositeKey::decode(&name).unwrap_or_default();
        Self {
            name,
            subsidiary: decoded.subsidiary,
            book: decoded.book,
            asset_type: decoded.asset_type,
            date: decoded.period_date,
        }
    }

    fn matches(&self, params: &ScanParameters) -> bool {
        if self.name.is_empty() || self.name.contains(DEFAULT_NAME_MARKER) {
            return false;
        }
        if !member_of(&params.subs, self.subsidiary.as_ref())
            || !member_of(&params.books, self.book.as_ref())
            || !member_of(&params.asset_types, self.asset_type.as_ref())
        {
            return false;
        }
        match (params.date, self.date) {
            (Some(as_of), Some(date)) => date <= as_of,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Empty `allowed` accepts every value; otherwise the value must be listed.
pub(crate) fn member_of(allowed: &[FieldValue], value: Option<&FieldValue>) -> bool {
    allowed.is_empty() || value.is_some_and(|value| allowed.contains(value))
}

/// In-memory history source for tests and small datasets.
pub struct InMemoryHistorySource {
    id: SourceId,
    records: Arc<Vec<HistoryRecord>>,
    page_size: usize,
}

impl InMemoryHistorySource {
    /// Create a source paging `records` by `page_size`.
    pub fn new(id: impl Into<SourceId>, records: Vec<HistoryRecord>, page_size: usize) -> Self {
        Self {
            id: id.into(),
            records: Arc::new(records),
            page_size,
        }
    }
}

impl HistorySource for InMemoryHistorySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&self, params: &ScanParameters) -> Result<Option<Box<dyn PageWindow>>, ReconcileError> {
        if self.page_size == 0 {
            return Err(ReconcileError::SourceUnavailable {
                source_id: self.id.clone(),
                reason: "page size must be greater than zero".into(),
            });
        }
        let grouped: IndexSet<&str> = self
            .records
            .iter()
            .filter(|record| record.matches(params))
            .map(|record| record.name.as_str())
            .collect();
        let keys: Vec<SummaryKey> = grouped.into_iter().map(str::to_string).collect();
        Ok(Some(Box::new(InMemoryWindow {
            keys,
            page_size: self.page_size,
        })))
    }
}

struct InMemoryWindow {
    keys: Vec<SummaryKey>,
    page_size: usize,
}

impl PageWindow for InMemoryWindow {
    fn page_count(&self) -> usize {
        self.keys.len().div_ceil(self.page_size)
    }

    fn record_count(&self) -> usize {
        self.keys.len()
    }

    fn fetch(&self, page_index: usize) -> Result<Page, ReconcileError> {
        let start = page_index.saturating_mul(self.page_size);
        if start >= self.keys.len() {
            return Err(ReconcileError::PageFetch {
                page_index,
                reason: "page index out of range".into(),
            });
        }
        let end = (start + self.page_size).min(self.keys.len());
        Ok(Page {
            index: page_index,
            keys: self.keys[start..end].to_vec(),
        })
    }
}
