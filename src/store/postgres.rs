use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use super::{ColumnKind, StoreConnector, TABLE_COLUMNS, TableStore, column_list};
use crate::config::DbConfig;
use crate::model::UsageRecord;

/// Relational server store. Calls are driven to completion on a private
/// current-thread runtime so the pipeline itself stays synchronous.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    config: DbConfig,
}

impl PostgresConnector {
    pub fn new(config: DbConfig) -> Self {
        Self { config }
    }
}

impl StoreConnector for PostgresConnector {
    fn name(&self) -> &str {
        "postgres"
    }

    fn connect(&self) -> Result<Box<dyn TableStore>> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start database runtime")?;

        info!(
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.name,
            user = %self.config.user,
            "connecting to PostgreSQL"
        );
        let options = PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .database(&self.config.name)
            .username(&self.config.user)
            .password(&self.config.password);
        let connection = runtime
            .block_on(PgConnection::connect_with(&options))
            .with_context(|| {
                format!(
                    "failed to connect to {}:{}/{}",
                    self.config.host, self.config.port, self.config.name
                )
            })?;

        Ok(Box::new(PostgresStore {
            runtime,
            connection,
        }))
    }
}

struct PostgresStore {
    runtime: Runtime,
    connection: PgConnection,
}

impl PostgresStore {
    fn execute_raw(&mut self, sql: &str) -> Result<u64> {
        let result = self.runtime.block_on(self.connection.execute(sql))?;
        Ok(result.rows_affected())
    }
}

fn sql_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Name => "VARCHAR(255)",
        ColumnKind::Text => "TEXT",
        ColumnKind::Float => "FLOAT",
        ColumnKind::Integer => "INTEGER",
        ColumnKind::BigInteger => "BIGINT",
    }
}

fn create_table_sql(table: &str) -> String {
    let columns = TABLE_COLUMNS
        .iter()
        .map(|(name, kind)| format!("  {name} {}", sql_type(*kind)))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE IF NOT EXISTS {table} (\n  id SERIAL PRIMARY KEY,\n{columns}\n)")
}

impl TableStore for PostgresStore {
    fn begin(&mut self) -> Result<()> {
        self.execute_raw("BEGIN").context("failed to begin transaction")?;
        Ok(())
    }

    fn create_table_if_absent(&mut self, table: &str) -> Result<()> {
        self.execute_raw(&create_table_sql(table))
            .with_context(|| format!("failed to create table {table}"))?;
        Ok(())
    }

    fn clear(&mut self, table: &str) -> Result<u64> {
        self.execute_raw(&format!("DELETE FROM {table}"))
            .with_context(|| format!("failed to clear table {table}"))
    }

    fn insert_rows(&mut self, table: &str, rows: &[UsageRecord]) -> Result<u64> {
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            column_list()
        );

        let mut inserted = 0_u64;
        for (index, row) in rows.iter().enumerate() {
            let query = sqlx::query(&sql)
                .bind(row.location.as_deref())
                .bind(row.rate_wb)
                .bind(row.year_wb)
                .bind(row.rate_itu)
                .bind(row.year_itu)
                .bind(row.users_cia)
                .bind(row.year_cia)
                .bind(row.notes.as_deref());
            let result = self
                .runtime
                .block_on(query.execute(&mut self.connection))
                .with_context(|| format!("failed to insert row {index} into {table}"))?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    fn commit(&mut self) -> Result<()> {
        self.execute_raw("COMMIT").context("failed to commit transaction")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.execute_raw("ROLLBACK")
            .context("failed to roll back transaction")?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let PostgresStore {
            runtime,
            connection,
        } = *self;
        runtime
            .block_on(connection.close())
            .context("failed to close PostgreSQL connection")
    }
}
