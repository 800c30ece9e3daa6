//! Composite summary keys and the per-page filters derived from them.

use chrono::NaiveDate;
use indexmap::IndexSet;

pub use crate::constants::keys::{KEY_DELIMITER, KEY_FIELD_COUNT, PERIOD_DATE_FORMAT};
use crate::constants::keys::{
    FIELD_ASSET_TYPE, FIELD_BOOK, FIELD_CHARGE_ACCOUNT, FIELD_CLASS, FIELD_DEPARTMENT,
    FIELD_DEPRECIATION_ACCOUNT, FIELD_LOCATION, FIELD_PERIOD_DATE, FIELD_PROJECT,
    FIELD_SUBSIDIARY,
};
use crate::types::FieldValue;

/// True if `key` splits into exactly `KEY_FIELD_COUNT` fields.
pub fn is_well_formed(key: &str) -> bool {
    key.split(KEY_DELIMITER).count() == KEY_FIELD_COUNT
}

/// Decoded summary key. Absent dimensions are `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompositeKey {
    /// Subsidiary id.
    pub subsidiary: Option<FieldValue>,
    /// Accounting book id.
    pub book: Option<FieldValue>,
    /// Asset type id.
    pub asset_type: Option<FieldValue>,
    /// Department id.
    pub department: Option<FieldValue>,
    /// Class id.
    pub class: Option<FieldValue>,
    /// Location id.
    pub location: Option<FieldValue>,
    /// Project id.
    pub project: Option<FieldValue>,
    /// Depreciation account id.
    pub depreciation_account: Option<FieldValue>,
    /// Charge account id.
    pub charge_account: Option<FieldValue>,
    /// Period end date (`YYYY-MM-DD`).
    pub period_date: Option<NaiveDate>,
}

impl CompositeKey {
    /// Decode `key`, or `None` when the field count is wrong.
    ///
    /// Empty fields and unparsable period dates decode to `None`.
    pub fn decode(key: &str) -> Option<Self> {
        let fields: Vec<&str> = key.split(KEY_DELIMITER).collect();
        if fields.len() != KEY_FIELD_COUNT {
            return None;
        }
        let field = |idx: usize| {
            let value = fields[idx].trim();
            (!value.is_empty()).then(|| value.to_string())
        };
        Some(Self {
            subsidiary: field(FIELD_SUBSIDIARY),
            book: field(FIELD_BOOK),
            asset_type: field(FIELD_ASSET_TYPE),
            department: field(FIELD_DEPARTMENT),
            class: field(FIELD_CLASS),
            location: field(FIELD_LOCATION),
            project: field(FIELD_PROJECT),
            depreciation_account: field(FIELD_DEPRECIATION_ACCOUNT),
            charge_account: field(FIELD_CHARGE_ACCOUNT),
            period_date: parse_period_date(fields[FIELD_PERIOD_DATE]),
        })
    }

    /// Render the key text (e.g. `1|1|7|3||12||401|402|2024-06-30`).
    pub fn encode(&self) -> String {
        let period = self
            .period_date
            .map(|date| date.format(PERIOD_DATE_FORMAT).to_string())
            .unwrap_or_default();
        let fields: [&str; KEY_FIELD_COUNT] = [
            self.subsidiary.as_deref().unwrap_or(""),
            self.book.as_deref().unwrap_or(""),
            self.asset_type.as_deref().unwrap_or(""),
            self.department.as_deref().unwrap_or(""),
            self.class.as_deref().unwrap_or(""),
            self.location.as_deref().unwrap_or(""),
            self.project.as_deref().unwrap_or(""),
            self.depreciation_account.as_deref().unwrap_or(""),
            self.charge_account.as_deref().unwrap_or(""),
            &period,
        ];
        let separator = KEY_DELIMITER.to_string();
        fields.join(separator.as_str())
    }
}

/// Parse a `YYYY-MM-DD` period date; blank or invalid text yields `None`.
pub fn parse_period_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, PERIOD_DATE_FORMAT).ok()
}

/// Distinct dimension values seen across one page of keys.
///
/// Each set keeps first-seen order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SummaryFilters {
    /// Departments seen.
    pub departments: IndexSet<FieldValue>,
    /// Classes seen.
    pub classes: IndexSet<FieldValue>,
    /// Locations seen.
    pub locations: IndexSet<FieldValue>,
    /// Projects seen.
    pub projects: IndexSet<FieldValue>,
    /// Depreciation accounts seen.
    pub depreciation_accounts: IndexSet<FieldValue>,
    /// Charge accounts seen.
    pub charge_accounts: IndexSet<FieldValue>,
    /// Latest period date seen; replaced only by a strictly later date.
    pub max_period_date: Option<NaiveDate>,
}

impl SummaryFilters {
    /// Union the dimension values of every well-formed key in `keys`.
    pub fn extract<'a, I>(keys: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut filters = Self::default();
        for key in keys {
            if let Some(decoded) = CompositeKey::decode(key) {
                filters.absorb(decoded);
            }
        }
        filters
    }

    fn absorb(&mut self, key: CompositeKey) {
        insert_present(&mut self.departments, key.department);
        insert_present(&mut self.classes, key.class);
        insert_present(&mut self.locations, key.location);
        insert_present(&mut self.projects, key.project);
        insert_present(&mut self.depreciation_accounts, key.depreciation_account);
        insert_present(&mut self.charge_accounts, key.charge_account);
        if let Some(date) = key.period_date {
            match self.max_period_date {
                Some(current) if date <= current => {}
                _ => self.max_period_date = Some(date),
            }
        }
    }
}

fn insert_present(set: &mut IndexSet<FieldValue>, value: Option<FieldValue>) {
    if let Some(value) = value {
        set.insert(value);
    }
}
