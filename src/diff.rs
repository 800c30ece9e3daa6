//! Per-page difference between history keys and existing summaries.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::index::{AggregateIndex, IndexQuery};
use crate::keys::SummaryFilters;
use crate::source::{Page, ScanParameters};
use crate::types::SummaryKey;

/// Build the summary query for one page.
///
/// Page-derived dimension filters are combined with the job-level
/// subsidiary/book/asset-type filters, the inactive exclusion, and, when the
/// job carries an as-of date, an on-or-before bound.
pub fn build_index_query(filters: &SummaryFilters, params: &ScanParameters) -> IndexQuery {
    IndexQuery {
        subsidiaries: params.subs.clone(),
        books: params.books.clone(),
        asset_types: params.asset_types.clone(),
        departments: filters.departments.iter().cloned().collect(),
        classes: filters.classes.iter().cloned().collect(),
        locations: filters.locations.iter().cloned().collect(),
        projects: filters.projects.iter().cloned().collect(),
        depreciation_accounts: filters.depreciation_accounts.iter().cloned().collect(),
        charge_accounts: filters.charge_accounts.iter().cloned().collect(),
        on_or_after: filters.max_period_date,
        on_or_before: params.date,
        exclude_inactive: true,
    }
}

/// Computes the keys of a page that have no summary yet.
pub struct DiffEngine {
    index: Arc<dyn AggregateIndex>,
    result_cap: usize,
}

impl DiffEngine {
    /// Create an engine querying `index` for at most `result_cap` names per page.
    pub fn new(index: Arc<dyn AggregateIndex>, result_cap: usize) -> Self {
        Self { index, result_cap }
    }

    /// Page keys with no exact-name match in the page's summary query result.
    ///
    /// Order follows the page.
    pub fn missing(
        &self,
        page: &Page,
        params: &ScanParameters,
    ) -> Result<Vec<SummaryKey>, crate::errors::ReconcileError> {
        let filters = SummaryFilters::extract(page.keys.iter().map(String::as_str));
        let query = build_index_query(&filters, params);
        let existing = self.index.search(&query, self.result_cap)?;
        if existing.len() >= self.result_cap {
            warn!(
                "[reconcile:diff] summary query for page {} hit the result cap ({}); existing summaries may be reported missing",
                page.index, self.result_cap
            );
        }
        let existing: HashSet<&str> = existing.iter().map(String::as_str).collect();
        let missing: Vec<SummaryKey> = page
            .keys
            .iter()
            .filter(|key| !existing.contains(key.as_str()))
            .cloned()
            .collect();
        debug!(
            "[reconcile:diff] page {} keys={} existing={} missing={}",
            page.index,
            page.keys.len(),
            existing.len(),
            missing.len()
        );
        Ok(missing)
    }
}
