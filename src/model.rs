use serde::{Deserialize, Serialize};

pub const COL_LOCATION: &str = "Location";
pub const COL_RATE_WB: &str = "Rate (WB)";
pub const COL_YEAR_WB: &str = "Year";
pub const COL_RATE_ITU: &str = "Rate (ITU)";
pub const COL_YEAR_ITU: &str = "Year.1";
pub const COL_USERS_CIA: &str = "Users (CIA)";
pub const COL_YEAR_CIA: &str = "Year.2";
pub const COL_NOTES: &str = "Notes";

/// Column order of the unified dataset. Fixed; sources are mapped onto it by name.
pub const EXPECTED_COLUMNS: [&str; 8] = [
    COL_LOCATION,
    COL_RATE_WB,
    COL_YEAR_WB,
    COL_RATE_ITU,
    COL_YEAR_ITU,
    COL_USERS_CIA,
    COL_YEAR_CIA,
    COL_NOTES,
];

pub const INDEX_LABEL: &str = "S/N";

/// One row as read from a source file. Year fields are still raw decimals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub location: Option<String>,
    pub rate_wb: Option<f64>,
    pub year_wb: Option<f64>,
    pub rate_itu: Option<f64>,
    pub year_itu: Option<f64>,
    pub users_cia: Option<i64>,
    pub year_cia: Option<f64>,
    pub notes: Option<String>,
}

/// Concatenation of every source's rows, in scan order.
#[derive(Debug, Clone, Default)]
pub struct UnifiedDataset {
    pub rows: Vec<RawRecord>,
    pub sources: Vec<SourceEntry>,
}

impl UnifiedDataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A row after year coercion. `None` is an absent value, never zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageRecord {
    pub location: Option<String>,
    pub rate_wb: Option<f64>,
    pub year_wb: Option<i32>,
    pub rate_itu: Option<f64>,
    pub year_itu: Option<i32>,
    pub users_cia: Option<i64>,
    pub year_cia: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransformedDataset {
    pub index_label: &'static str,
    pub rows: Vec<UsageRecord>,
}

impl TransformedDataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Rows paired with their zero-based positional index.
    pub fn indexed(&self) -> impl Iterator<Item = (usize, &UsageRecord)> {
        self.rows.iter().enumerate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceEntry {
    pub path: String,
    pub rows: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RelationalOutcome {
    Loaded {
        store: String,
        table: String,
        cleared: u64,
        inserted: u64,
    },
    Skipped {
        store: String,
        reason: String,
    },
    RolledBack {
        store: String,
        table: String,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub state: String,
    pub failed_phase: Option<String>,
    pub error: Option<String>,
    pub schema_policy: String,
    pub sources: Vec<SourceEntry>,
    pub output_path: String,
    pub rows_written: usize,
    pub relational: Option<RelationalOutcome>,
}
