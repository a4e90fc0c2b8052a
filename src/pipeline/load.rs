use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::error::{EtlError, EtlResult};
use crate::model::{EXPECTED_COLUMNS, RelationalOutcome, TransformedDataset};
use crate::store::{StoreConnector, TableStore};
use crate::util::{ensure_parent_directory, staging_path};

/// Writes the flat file, then mirrors the rows into the relational store.
///
/// The file is synced and in place before any connection is attempted. An
/// unreachable store is reported as [`RelationalOutcome::Skipped`]; a failed
/// transaction is rolled back and returned as [`EtlError::Transaction`].
pub struct SinkWriter<'a> {
    output_path: &'a Path,
    table: &'a str,
    connector: &'a dyn StoreConnector,
}

impl<'a> SinkWriter<'a> {
    pub fn new(output_path: &'a Path, table: &'a str, connector: &'a dyn StoreConnector) -> Self {
        Self {
            output_path,
            table,
            connector,
        }
    }

    pub fn write_csv(&self, dataset: &TransformedDataset) -> EtlResult<usize> {
        write_csv(self.output_path, dataset).map_err(|source| EtlError::OutputWrite {
            path: self.output_path.to_path_buf(),
            source,
        })?;
        info!(path = %self.output_path.display(), rows = dataset.len(), "data saved to CSV");
        Ok(dataset.len())
    }

    pub fn load_relational(&self, dataset: &TransformedDataset) -> EtlResult<RelationalOutcome> {
        let store_name = self.connector.name().to_string();

        let mut store = match self.connector.connect() {
            Ok(store) => store,
            Err(source) => {
                let err = EtlError::Connection {
                    store: store_name.clone(),
                    source,
                };
                warn!(error = %err, "skipping relational load");
                return Ok(RelationalOutcome::Skipped {
                    store: store_name,
                    reason: format!("{err:#}"),
                });
            }
        };

        let replaced = replace_contents(store.as_mut(), self.table, dataset);
        if replaced.is_err() {
            if let Err(err) = store.rollback() {
                warn!(error = %format!("{err:#}"), "rollback failed");
            }
        }
        if let Err(err) = store.close() {
            warn!(error = %format!("{err:#}"), "failed to release store connection");
        }

        let (cleared, inserted) = replaced.map_err(|source| EtlError::Transaction {
            table: self.table.to_string(),
            source,
        })?;

        info!(
            store = %store_name,
            table = %self.table,
            cleared,
            inserted,
            "replaced relational table contents"
        );
        Ok(RelationalOutcome::Loaded {
            store: store_name,
            table: self.table.to_string(),
            cleared,
            inserted,
        })
    }
}

/// Create-if-absent, clear, insert, commit. The caller rolls back on error.
fn replace_contents(
    store: &mut dyn TableStore,
    table: &str,
    dataset: &TransformedDataset,
) -> Result<(u64, u64)> {
    store.begin()?;
    store.create_table_if_absent(table)?;
    let cleared = store.clear(table)?;
    let inserted = store.insert_rows(table, &dataset.rows)?;
    store.commit()?;
    Ok((cleared, inserted))
}

pub fn write_csv(path: &Path, dataset: &TransformedDataset) -> Result<()> {
    ensure_parent_directory(path)?;

    let staged = staging_path(path);
    let file = File::create(&staged)
        .with_context(|| format!("failed to create {}", staged.display()))?;
    let mut writer = csv::Writer::from_writer(file);

    let mut header = Vec::with_capacity(EXPECTED_COLUMNS.len() + 1);
    header.push(dataset.index_label);
    header.extend(EXPECTED_COLUMNS);
    writer.write_record(&header).context("failed to write header")?;

    for (index, row) in dataset.indexed() {
        writer
            .write_record([
                index.to_string(),
                row.location.clone().unwrap_or_default(),
                format_decimal(row.rate_wb),
                format_integer(row.year_wb),
                format_decimal(row.rate_itu),
                format_integer(row.year_itu),
                format_integer(row.users_cia),
                format_integer(row.year_cia),
                row.notes.clone().unwrap_or_default(),
            ])
            .with_context(|| format!("failed to write row {index}"))?;
    }

    let file = writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("failed to flush {}: {}", staged.display(), err.error()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", staged.display()))?;
    drop(file);

    fs::rename(&staged, path)
        .with_context(|| format!("failed to move {} into place", path.display()))
}

/// Integral decimals keep a trailing `.0` so rates read back as decimals.
fn format_decimal(value: Option<f64>) -> String {
    match value {
        Some(value) if value.is_finite() && value.fract() == 0.0 => format!("{value:.1}"),
        Some(value) => value.to_string(),
        None => String::new(),
    }
}

fn format_integer<T: ToString>(value: Option<T>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}
