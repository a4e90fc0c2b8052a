use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use super::{ColumnKind, StoreConnector, TABLE_COLUMNS, TableStore, column_list};
use crate::model::UsageRecord;

/// Embedded file-backed store.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StoreConnector for SqliteConnector {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn connect(&self) -> Result<Box<dyn TableStore>> {
        Ok(Box::new(SqliteStore::open(&self.path)?))
    }
}

pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        configure_connection(&connection)?;
        Ok(Self { connection })
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn sql_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Name | ColumnKind::Text => "TEXT",
        ColumnKind::Float => "REAL",
        ColumnKind::Integer | ColumnKind::BigInteger => "INTEGER",
    }
}

fn create_table_sql(table: &str) -> String {
    let columns = TABLE_COLUMNS
        .iter()
        .map(|(name, kind)| format!("  {name} {}", sql_type(*kind)))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE IF NOT EXISTS {table} (\n  id INTEGER PRIMARY KEY AUTOINCREMENT,\n{columns}\n)")
}

// `Connection::transaction` borrows the connection for the guard's lifetime,
// which cannot span separate begin/commit calls, so transaction control is
// issued as statements.
impl TableStore for SqliteStore {
    fn begin(&mut self) -> Result<()> {
        self.connection
            .execute_batch("BEGIN IMMEDIATE")
            .context("failed to begin transaction")
    }

    fn create_table_if_absent(&mut self, table: &str) -> Result<()> {
        self.connection
            .execute_batch(&create_table_sql(table))
            .with_context(|| format!("failed to create table {table}"))
    }

    fn clear(&mut self, table: &str) -> Result<u64> {
        let deleted = self
            .connection
            .execute(&format!("DELETE FROM {table}"), [])
            .with_context(|| format!("failed to clear table {table}"))?;
        Ok(deleted as u64)
    }

    fn insert_rows(&mut self, table: &str, rows: &[UsageRecord]) -> Result<u64> {
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            column_list()
        );
        let mut statement = self
            .connection
            .prepare(&sql)
            .with_context(|| format!("failed to prepare insert into {table}"))?;

        let mut inserted = 0_u64;
        for (index, row) in rows.iter().enumerate() {
            statement
                .execute(params![
                    row.location.as_deref(),
                    row.rate_wb,
                    row.year_wb,
                    row.rate_itu,
                    row.year_itu,
                    row.users_cia,
                    row.year_cia,
                    row.notes.as_deref(),
                ])
                .with_context(|| format!("failed to insert row {index} into {table}"))?;
            inserted += 1;
        }

        Ok(inserted)
    }

    fn commit(&mut self) -> Result<()> {
        self.connection
            .execute_batch("COMMIT")
            .context("failed to commit transaction")
    }

    fn rollback(&mut self) -> Result<()> {
        if self.connection.is_autocommit() {
            return Ok(());
        }
        self.connection
            .execute_batch("ROLLBACK")
            .context("failed to roll back transaction")
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.connection
            .close()
            .map_err(|(_, err)| err)
            .context("failed to close sqlite connection")
    }
}
