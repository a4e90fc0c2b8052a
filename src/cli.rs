use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "internet-users-etl",
    version,
    about = "Aggregate internet-usage CSV datasets into one table and load it"
)]
pub struct Cli {
    #[arg(long, env = "ETL_WORK_DIR", default_value = ".")]
    pub work_dir: PathBuf,

    #[arg(long, env = "ETL_SOURCE_PATTERN", default_value = "*.csv")]
    pub source_pattern: String,

    #[arg(
        long,
        env = "ETL_OUTPUT_FILE",
        default_value = "transformed_internet_users_data.csv"
    )]
    pub output_file: PathBuf,

    #[arg(long, env = "ETL_LOG_FILE", default_value = "log_file.txt")]
    pub log_file: PathBuf,

    #[arg(long, env = "ETL_TABLE", default_value = "internet_users")]
    pub table: String,

    #[arg(long, env = "ETL_STORE", value_enum, default_value_t = StoreKind::Sqlite)]
    pub store: StoreKind,

    #[arg(long, env = "ETL_SQLITE_PATH", default_value = "customers.db")]
    pub sqlite_path: PathBuf,

    #[arg(
        long,
        env = "ETL_SCHEMA_POLICY",
        value_enum,
        default_value_t = SchemaPolicy::Lenient
    )]
    pub schema_policy: SchemaPolicy,

    #[arg(long, env = "ETL_SUMMARY_PATH")]
    pub summary_path: Option<PathBuf>,

    #[command(flatten)]
    pub db: DbArgs,
}

#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    #[arg(long = "db-host", env = "DB_HOST", default_value = "localhost")]
    pub host: String,

    #[arg(long = "db-name", env = "DB_NAME", default_value = "app_db")]
    pub name: String,

    #[arg(long = "db-user", env = "DB_USER", default_value = "admin")]
    pub user: String,

    #[arg(
        long = "db-password",
        env = "DB_PASSWORD",
        default_value = "admin123",
        hide_env_values = true
    )]
    pub password: String,

    #[arg(long = "db-port", env = "DB_PORT", default_value_t = 5432)]
    pub port: u16,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StoreKind {
    Sqlite,
    Postgres,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum SchemaPolicy {
    /// Missing expected columns are read as nulls.
    Lenient,
    /// Missing expected columns reject the source file.
    Strict,
}

impl SchemaPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lenient => "lenient",
            Self::Strict => "strict",
        }
    }
}
