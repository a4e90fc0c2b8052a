use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use csv::StringRecord;
use tracing::{debug, info, warn};

use crate::cli::SchemaPolicy;
use crate::error::{EtlError, EtlResult};
use crate::model::{
    COL_LOCATION, COL_NOTES, COL_RATE_ITU, COL_RATE_WB, COL_USERS_CIA, COL_YEAR_CIA, COL_YEAR_ITU,
    COL_YEAR_WB, EXPECTED_COLUMNS, RawRecord, SourceEntry, UnifiedDataset,
};
use crate::util::sha256_file;

const MISSING_TOKENS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "-nan", "null", "NULL", "None", "#N/A", "<NA>",
];

/// Reads every source into one dataset seeded with the expected schema.
///
/// Rows are appended in source order. The first unreadable source aborts the
/// whole extraction.
pub fn extract_all(sources: &[PathBuf], policy: SchemaPolicy) -> EtlResult<UnifiedDataset> {
    debug!(columns = ?EXPECTED_COLUMNS, "expected unified schema");

    let mut dataset = UnifiedDataset::default();
    for path in sources {
        let rows = extract_file(path, policy)?;
        let sha256 = sha256_file(path).map_err(|source| EtlError::SourceRead {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), rows = rows.len(), "extracted source");
        dataset.sources.push(SourceEntry {
            path: path.display().to_string(),
            rows: rows.len(),
            sha256,
        });
        dataset.rows.extend(rows);
    }

    Ok(dataset)
}

pub fn extract_file(path: &Path, policy: SchemaPolicy) -> EtlResult<Vec<RawRecord>> {
    let read_error = |source: anyhow::Error| EtlError::SourceRead {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))
        .map_err(read_error)?;

    let headers = reader
        .headers()
        .context("failed to read header row")
        .map_err(read_error)?
        .clone();
    let layout = ColumnLayout::from_headers(&headers);

    if layout.matched() == 0 {
        return Err(read_error(anyhow!(
            "header row contains none of the expected columns (wrong delimiter?)"
        )));
    }

    let missing = layout.missing();
    if !missing.is_empty() {
        match policy {
            SchemaPolicy::Strict => {
                return Err(EtlError::SchemaMismatch {
                    path: path.to_path_buf(),
                    missing,
                });
            }
            SchemaPolicy::Lenient => {
                warn!(path = %path.display(), missing = ?missing, "source lacks expected columns; reading them as null");
            }
        }
    }
    if !layout.extra.is_empty() {
        warn!(path = %path.display(), ignored = ?layout.extra, "ignoring columns outside the unified schema");
    }

    let mut rows = Vec::new();
    for (offset, record) in reader.records().enumerate() {
        // Line 1 is the header.
        let line = offset + 2;
        let record = record
            .with_context(|| format!("malformed row at line {line}"))
            .map_err(read_error)?;
        let row = layout
            .parse_row(&record)
            .with_context(|| format!("invalid value at line {line}"))
            .map_err(read_error)?;
        rows.push(row);
    }

    Ok(rows)
}

/// Disambiguates repeated header names by suffixing `.1`, `.2`, ... in order
/// of appearance, so three `Year` columns read as `Year`, `Year.1`, `Year.2`.
pub fn dedupe_headers(headers: &StringRecord) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut names = Vec::with_capacity(headers.len());

    for raw in headers.iter() {
        let base = raw.trim().to_string();
        let mut name = base.clone();
        if let Some(next) = seen.get(&base).copied() {
            let mut suffix = next;
            name = format!("{base}.{suffix}");
            while seen.contains_key(&name) {
                suffix += 1;
                name = format!("{base}.{suffix}");
            }
            seen.insert(base, suffix + 1);
        }
        seen.entry(name.clone()).or_insert(1);
        names.push(name);
    }

    names
}

#[derive(Debug, Default)]
struct ColumnLayout {
    positions: HashMap<&'static str, usize>,
    extra: Vec<String>,
}

impl ColumnLayout {
    fn from_headers(headers: &StringRecord) -> Self {
        let mut layout = Self::default();
        for (position, name) in dedupe_headers(headers).into_iter().enumerate() {
            match EXPECTED_COLUMNS.iter().find(|expected| **expected == name) {
                Some(expected) => {
                    layout.positions.insert(*expected, position);
                }
                None => layout.extra.push(name),
            }
        }
        layout
    }

    fn matched(&self) -> usize {
        self.positions.len()
    }

    fn missing(&self) -> Vec<String> {
        EXPECTED_COLUMNS
            .iter()
            .filter(|name| !self.positions.contains_key(*name))
            .map(|name| name.to_string())
            .collect()
    }

    fn cell<'r>(&self, record: &'r StringRecord, column: &'static str) -> Option<&'r str> {
        let position = self.positions.get(column)?;
        let value = record.get(*position)?.trim();
        if MISSING_TOKENS.iter().any(|token| *token == value) {
            None
        } else {
            Some(value)
        }
    }

    fn decimal(&self, record: &StringRecord, column: &'static str) -> Result<Option<f64>> {
        match self.cell(record, column) {
            Some(value) => parse_decimal(value).with_context(|| format!("column {column:?}")),
            None => Ok(None),
        }
    }

    fn text(&self, record: &StringRecord, column: &'static str) -> Option<String> {
        self.cell(record, column).map(ToOwned::to_owned)
    }

    fn parse_row(&self, record: &StringRecord) -> Result<RawRecord> {
        let users_cia = match self.cell(record, COL_USERS_CIA) {
            Some(value) => {
                parse_count(value).with_context(|| format!("column {COL_USERS_CIA:?}"))?
            }
            None => None,
        };

        Ok(RawRecord {
            location: self.text(record, COL_LOCATION),
            rate_wb: self.decimal(record, COL_RATE_WB)?,
            year_wb: self.decimal(record, COL_YEAR_WB)?,
            rate_itu: self.decimal(record, COL_RATE_ITU)?,
            year_itu: self.decimal(record, COL_YEAR_ITU)?,
            users_cia,
            year_cia: self.decimal(record, COL_YEAR_CIA)?,
            notes: self.text(record, COL_NOTES),
        })
    }
}

/// Any NaN spelling the float parser accepts is missing; infinities are not
/// valid measurements.
fn parse_decimal(value: &str) -> Result<Option<f64>> {
    let decimal = value
        .parse::<f64>()
        .with_context(|| format!("not a number: {value:?}"))?;
    if decimal.is_nan() {
        return Ok(None);
    }
    if decimal.is_infinite() {
        bail!("not a finite number: {value:?}");
    }
    Ok(Some(decimal))
}

fn parse_count(value: &str) -> Result<Option<i64>> {
    if let Ok(count) = value.parse::<i64>() {
        return Ok(Some(count));
    }

    match parse_decimal(value)? {
        Some(decimal) if decimal.fract() == 0.0 && decimal.abs() < i64::MAX as f64 => {
            Ok(Some(decimal as i64))
        }
        Some(_) => bail!("not a whole count: {value:?}"),
        None => Ok(None),
    }
}
