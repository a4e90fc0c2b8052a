use std::path::PathBuf;

use regex::Regex;

use crate::cli::{Cli, DbArgs, SchemaPolicy, StoreKind};
use crate::error::{EtlError, EtlResult};
use crate::util::resolve_in;

/// Connection parameters for the relational server store.
#[derive(Debug, Clone)]
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
pub struct DbConfig {
    pub host: String,
    pub name: String,
    pub user: String,
    pub password: String,
    pub port: u16,
}

impl From<DbArgs> for DbConfig {
    fn from(args: DbArgs) -> Self {
        Self {
            host: args.host,
            name: args.name,
            user: args.user,
            password: args.password,
            port: args.port,
        }
    }
}

/// Everything a run needs, resolved once and handed to each phase.
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub work_dir: PathBuf,
    pub source_pattern: String,
    pub output_path: PathBuf,
    pub log_path: PathBuf,
    pub table: String,
    pub store: StoreKind,
    pub sqlite_path: PathBuf,
    pub schema_policy: SchemaPolicy,
    pub summary_path: Option<PathBuf>,
    pub db: DbConfig,
}

impl EtlConfig {
    pub fn from_cli(cli: Cli) -> EtlResult<Self> {
        let work_dir = cli.work_dir;
        let config = Self {
            output_path: resolve_in(&work_dir, &cli.output_file),
            log_path: resolve_in(&work_dir, &cli.log_file),
            sqlite_path: resolve_in(&work_dir, &cli.sqlite_path),
            summary_path: cli.summary_path,
            source_pattern: cli.source_pattern,
            table: cli.table,
            store: cli.store,
            schema_policy: cli.schema_policy,
            db: cli.db.into(),
            work_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults rooted at `work_dir`, with the embedded store.
    #[cfg(test)]
    pub fn for_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            output_path: work_dir.join("transformed_internet_users_data.csv"),
            log_path: work_dir.join("log_file.txt"),
            sqlite_path: work_dir.join("customers.db"),
            source_pattern: "*.csv".to_string(),
            table: "internet_users".to_string(),
            store: StoreKind::Sqlite,
            schema_policy: SchemaPolicy::Lenient,
            summary_path: None,
            db: DbConfig {
                host: "localhost".to_string(),
                name: "app_db".to_string(),
                user: "admin".to_string(),
                password: "admin123".to_string(),
                port: 5432,
            },
            work_dir,
        }
    }

    pub fn validate(&self) -> EtlResult<()> {
        // Interpolated into DDL/DML, so only bare identifiers are allowed.
        let identifier = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
            .map_err(|err| EtlError::Config(format!("failed to compile identifier regex: {err}")))?;
        if !identifier.is_match(&self.table) {
            return Err(EtlError::Config(format!(
                "table name must be a plain SQL identifier: {:?}",
                self.table
            )));
        }

        if self.source_pattern.contains('/') || self.source_pattern.contains('\\') {
            return Err(EtlError::Config(format!(
                "source pattern must match file names only: {:?}",
                self.source_pattern
            )));
        }
        glob::Pattern::new(&self.source_pattern).map_err(|err| {
            EtlError::Config(format!(
                "invalid source pattern {:?}: {err}",
                self.source_pattern
            ))
        })?;

        if !self.work_dir.is_dir() {
            return Err(EtlError::Config(format!(
                "work directory does not exist: {}",
                self.work_dir.display()
            )));
        }

        Ok(())
    }
}
