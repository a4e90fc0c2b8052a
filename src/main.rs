mod cli;
mod config;
mod error;
mod model;
mod pipeline;
mod progress;
mod store;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::EtlConfig;
use crate::pipeline::Pipeline;

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "ETL run failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = EtlConfig::from_cli(cli)?;

    info!(
        work_dir = %config.work_dir.display(),
        output = %config.output_path.display(),
        store = config.store.as_str(),
        table = %config.table,
        "configuration loaded"
    );

    let summary = Pipeline::new(&config).run()?;
    info!(
        run_id = %summary.run_id,
        sources = summary.sources.len(),
        rows = summary.rows_written,
        "ETL process completed successfully"
    );

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
