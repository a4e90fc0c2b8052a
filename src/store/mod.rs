//! Relational sinks for the transformed dataset.
//!
//! Each backend exposes the same capability set so the load step can drive a
//! full replace (create-if-absent, clear, bulk insert) inside one transaction
//! without knowing which engine it talks to.

use anyhow::Result;

use crate::cli::StoreKind;
use crate::config::EtlConfig;
use crate::model::UsageRecord;

#[cfg(feature = "postgres")]
mod postgres;
mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PostgresConnector;
pub use sqlite::{SqliteConnector, SqliteStore};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ColumnKind {
    /// Bounded-length text; engines without a bound fall back to `Text`.
    Name,
    Text,
    Float,
    Integer,
    BigInteger,
}

/// Relational column names, in insert order, mirroring the unified schema.
pub const TABLE_COLUMNS: [(&str, ColumnKind); 8] = [
    ("location", ColumnKind::Name),
    ("rate_wb", ColumnKind::Float),
    ("year_wb", ColumnKind::Integer),
    ("rate_itu", ColumnKind::Float),
    ("year_itu", ColumnKind::Integer),
    ("users_cia", ColumnKind::BigInteger),
    ("year_cia", ColumnKind::Integer),
    ("notes", ColumnKind::Text),
];

pub fn column_list() -> String {
    TABLE_COLUMNS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// An open connection able to replace a table's contents transactionally.
pub trait TableStore {
    fn begin(&mut self) -> Result<()>;

    fn create_table_if_absent(&mut self, table: &str) -> Result<()>;

    /// Deletes every row, returning how many were removed.
    fn clear(&mut self, table: &str) -> Result<u64>;

    fn insert_rows(&mut self, table: &str, rows: &[UsageRecord]) -> Result<u64>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Releases the connection.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Opens a [`TableStore`] on demand.
pub trait StoreConnector {
    fn name(&self) -> &str;

    fn connect(&self) -> Result<Box<dyn TableStore>>;
}

pub fn connector_for(config: &EtlConfig) -> Box<dyn StoreConnector> {
    match config.store {
        StoreKind::Sqlite => Box::new(SqliteConnector::new(&config.sqlite_path)),
        StoreKind::Postgres => postgres_connector(config),
    }
}

#[cfg(feature = "postgres")]
fn postgres_connector(config: &EtlConfig) -> Box<dyn StoreConnector> {
    Box::new(PostgresConnector::new(config.db.clone()))
}

#[cfg(not(feature = "postgres"))]
fn postgres_connector(_config: &EtlConfig) -> Box<dyn StoreConnector> {
    Box::new(Unavailable {
        name: StoreKind::Postgres.as_str(),
    })
}

/// Stand-in for a backend compiled out of this build; every connect fails.
#[cfg(not(feature = "postgres"))]
struct Unavailable {
    name: &'static str,
}

#[cfg(not(feature = "postgres"))]
impl StoreConnector for Unavailable {
    fn name(&self) -> &str {
        self.name
    }

    fn connect(&self) -> Result<Box<dyn TableStore>> {
        anyhow::bail!(
            "{} support is not compiled in; rebuild with `--features {}`",
            self.name,
            self.name
        )
    }
}
