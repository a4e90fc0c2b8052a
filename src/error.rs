use std::path::PathBuf;

use thiserror::Error;

/// Failures a pipeline run can end in, tagged by the phase that raised them.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read source {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("source {path} is missing expected columns: {}", .missing.join(", "))]
    SchemaMismatch { path: PathBuf, missing: Vec<String> },

    #[error("failed to transform row {row}: {reason}")]
    Transform { row: usize, reason: String },

    #[error("failed to write output file {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not connect to {store} store: {source}")]
    Connection {
        store: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("transaction on table {table} rolled back: {source}")]
    Transaction {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to append to progress log {path}: {source}")]
    ProgressLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type EtlResult<T> = std::result::Result<T, EtlError>;
