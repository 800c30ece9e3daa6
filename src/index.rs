//! Summary index query model and collaborators.

use chrono::NaiveDate;
use indexmap::IndexSet;
use std::sync::RwLock;

use crate::errors::ReconcileError;
use crate::keys::CompositeKey;
use crate::source::member_of;
use crate::types::{FieldValue, SummaryKey};

/// Filter criteria for one summary existence query.
///
/// Empty lists do not constrain; a non-empty list requires the summary's value
/// to be present and listed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexQuery {
    /// Allowed subsidiary ids.
    pub subsidiaries: Vec<FieldValue>,
    /// Allowed accounting book ids.
    pub books: Vec<FieldValue>,
    /// Allowed asset type ids.
    pub asset_types: Vec<FieldValue>,
    /// Allowed department ids.
    pub departments: Vec<FieldValue>,
    /// Allowed class ids.
    pub classes: Vec<FieldValue>,
    /// Allowed location ids.
    pub locations: Vec<FieldValue>,
    /// Allowed project ids.
    pub projects: Vec<FieldValue>,
    /// Allowed depreciation account ids.
    pub depreciation_accounts: Vec<FieldValue>,
    /// Allowed charge account ids.
    pub charge_accounts: Vec<FieldValue>,
    /// Summary depreciation date must be on or after this day.
    pub on_or_after: Option<NaiveDate>,
    /// Summary depreciation date must be on or before this day.
    pub on_or_before: Option<NaiveDate>,
    /// Skip summaries flagged inactive.
    pub exclude_inactive: bool,
}

impl IndexQuery {
    /// True if a summary with `key` decoded fields and `inactive` flag matches.
    pub fn matches(&self, key: &CompositeKey, inactive: bool) -> bool {
        if self.exclude_inactive && inactive {
            return false;
        }
        let dimensions = [
            (&self.subsidiaries, &key.subsidiary),
            (&self.books, &key.book),
            (&self.asset_types, &key.asset_type),
            (&self.departments, &key.department),
            (&self.classes, &key.class),
            (&self.locations, &key.location),
            (&self.projects, &key.project),
            (&self.depreciation_accounts, &key.depreciation_account),
            (&self.charge_accounts, &key.charge_account),
        ];
        if !dimensions
            .iter()
            .all(|(allowed, value)| member_of(allowed, value.as_ref()))
        {
            return false;
        }
        if self.on_or_after.is_none() && self.on_or_before.is_none() {
            return true;
        }
        let Some(date) = key.period_date else {
            return false;
        };
        self.on_or_after.is_none_or(|from| date >= from)
            && self.on_or_before.is_none_or(|to| date <= to)
    }
}

/// Summary index search collaborator.
pub trait AggregateIndex: Send + Sync {
    /// Distinct names of summaries matching `query`, at most `cap` of them.
    fn search(&self, query: &IndexQuery, cap: usize) -> Result<Vec<SummaryKey>, ReconcileError>;
}

/// One existing summary record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SummaryRecord {
    /// Summary name; the same composite key text history rows group under.
    pub name: SummaryKey,
    /// Inactive summaries are skipped by queries that exclude them.
    pub inactive: bool,
}

impl SummaryRecord {
    /// Active summary named `name`.
    pub fn active(name: impl Into<SummaryKey>) -> Self {
        Self {
            name: name.into(),
            inactive: false,
        }
    }

    /// Inactive summary named `name`.
    pub fn inactive(name: impl Into<SummaryKey>) -> Self {
        Self {
            name: name.into(),
            inactive: true,
        }
    }
}

/// In-memory summary index for tests and small datasets.
///
/// Dimension columns are read from each summary's decoded name; summaries
/// with malformed names never match.
#[derive(Debug, Default)]
pub struct InMemoryAggregateIndex {
    records: RwLock<Vec<SummaryRecord>>,
}

impl InMemoryAggregateIndex {
    /// Create an index over `records`.
    pub fn new(records: Vec<SummaryRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Add a summary, e.g. to simulate another process creating it mid-job.
    pub fn insert(&self, record: SummaryRecord) -> Result<(), ReconcileError> {
        self.records
            .write()
            .map_err(|_| ReconcileError::IndexQuery("summary index lock poisoned".into()))?
            .push(record);
        Ok(())
    }
}

impl AggregateIndex for InMemoryAggregateIndex {
    fn search(&self, query: &IndexQuery, cap: usize) -> Result<Vec<SummaryKey>, ReconcileError> {
        let records = self
            .records
            .read()
            .map_err(|_| ReconcileError::IndexQuery("summary index lock poisoned".into()))?;
        let mut names: IndexSet<&str> = IndexSet::new();
        for record in records.iter() {
            if names.len() >= cap {
                break;
            }
            let Some(key) = CompositeKey::decode(&record.name) else {
                continue;
            };
            if query.matches(&key, record.inactive) {
                names.insert(record.name.as_str());
            }
        }
        Ok(names.into_iter().map(str::to_string).collect())
    }
}
