use chrono::Utc;
use tracing::{info, warn};

use super::extract::extract_all;
use super::load::SinkWriter;
use super::scan::scan_sources;
use super::transform::transform;
use crate::config::EtlConfig;
use crate::error::{EtlError, EtlResult};
use crate::model::{RelationalOutcome, RunSummary, SourceEntry};
use crate::progress::ProgressLog;
use crate::store::{StoreConnector, connector_for};
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

/// Run states. Transitions only move forward one step, or to `Failed`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Start,
    ScanExtract,
    Transform,
    Load,
    Done,
    Failed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::ScanExtract => "scan_extract",
            Self::Transform => "transform",
            Self::Load => "load",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    fn next(self) -> Option<Self> {
        match self {
            Self::Start => Some(Self::ScanExtract),
            Self::ScanExtract => Some(Self::Transform),
            Self::Transform => Some(Self::Load),
            Self::Load => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }
}

#[derive(Debug)]
struct RunState {
    phase: Phase,
    sources: Vec<SourceEntry>,
    rows_written: usize,
    relational: Option<RelationalOutcome>,
}

pub struct Pipeline<'a> {
    config: &'a EtlConfig,
    progress: ProgressLog,
    connector: Box<dyn StoreConnector>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a EtlConfig) -> Self {
        Self::with_connector(config, connector_for(config))
    }

    pub fn with_connector(config: &'a EtlConfig, connector: Box<dyn StoreConnector>) -> Self {
        Self {
            config,
            progress: ProgressLog::new(&config.log_path),
            connector,
        }
    }

    /// Runs every phase in order. The summary is written (when configured)
    /// whether or not the run succeeds.
    pub fn run(&self) -> EtlResult<RunSummary> {
        let started = Utc::now();
        let run_id = format!("run-{}", utc_compact_string(started));
        let started_at = now_utc_string();
        info!(run_id = %run_id, work_dir = %self.config.work_dir.display(), "starting ETL run");

        let mut state = RunState {
            phase: Phase::Start,
            sources: Vec::new(),
            rows_written: 0,
            relational: None,
        };
        let result = self.execute(&mut state);

        let failed_phase = result.as_ref().err().map(|err| {
            let phase = state.phase;
            let message = format!("{} phase failed: {err}", phase.as_str());
            if let Err(log_err) = self.progress.record(&message) {
                warn!(error = %log_err, "could not record failure in progress log");
            }
            state.phase = Phase::Failed;
            phase.as_str().to_string()
        });

        let summary = RunSummary {
            manifest_version: 1,
            run_id,
            started_at,
            finished_at: now_utc_string(),
            state: state.phase.as_str().to_string(),
            failed_phase,
            error: result.as_ref().err().map(|err| format!("{err:#}")),
            schema_policy: self.config.schema_policy.as_str().to_string(),
            sources: state.sources,
            output_path: self.config.output_path.display().to_string(),
            rows_written: state.rows_written,
            relational: state.relational,
        };

        if let Some(path) = &self.config.summary_path {
            match write_json_pretty(path, &summary) {
                Ok(()) => info!(path = %path.display(), "wrote run summary"),
                Err(err) => warn!(path = %path.display(), error = %format!("{err:#}"), "failed to write run summary"),
            }
        }

        result.map(|()| summary)
    }

    fn execute(&self, state: &mut RunState) -> EtlResult<()> {
        self.progress.record("Beginning ETL process")?;
        self.probe_store();

        self.advance(state, Phase::ScanExtract, "Extract phase started")?;
        let sources = scan_sources(
            &self.config.work_dir,
            &self.config.source_pattern,
            &self.config.output_path,
        )
        .map_err(|source| EtlError::SourceRead {
            path: self.config.work_dir.clone(),
            source,
        })?;
        if sources.is_empty() {
            warn!(
                work_dir = %self.config.work_dir.display(),
                pattern = %self.config.source_pattern,
                "no source files matched"
            );
        }
        let dataset = extract_all(&sources, self.config.schema_policy)?;
        if dataset.is_empty() {
            warn!("extracted dataset is empty; sinks will be cleared");
        }
        state.sources = dataset.sources.clone();
        info!(files = sources.len(), rows = dataset.len(), "extraction finished");
        self.progress.record("Extract completed")?;

        self.advance(state, Phase::Transform, "Beginning transformation")?;
        let transformed = transform(dataset)?;
        self.progress.record("Transformation completed")?;

        self.advance(state, Phase::Load, "Beginning Load")?;
        let writer = SinkWriter::new(
            &self.config.output_path,
            &self.config.table,
            self.connector.as_ref(),
        );
        state.rows_written = writer.write_csv(&transformed)?;

        let outcome = match writer.load_relational(&transformed) {
            Ok(outcome) => outcome,
            Err(err) => {
                if let EtlError::Transaction { table, .. } = &err {
                    state.relational = Some(RelationalOutcome::RolledBack {
                        store: self.connector.name().to_string(),
                        table: table.clone(),
                        error: format!("{err:#}"),
                    });
                }
                return Err(err);
            }
        };
        let store = self.connector.name();
        let message = if matches!(outcome, RelationalOutcome::Skipped { .. }) {
            format!("Data loaded to CSV; {store} load skipped")
        } else {
            format!("Data loaded to CSV and {store}")
        };
        state.relational = Some(outcome);
        self.progress.record(&message)?;

        self.advance(state, Phase::Done, "ETL process completed")?;
        Ok(())
    }

    fn advance(&self, state: &mut RunState, next: Phase, message: &str) -> EtlResult<()> {
        debug_assert_eq!(state.phase.next(), Some(next), "phases run strictly in order");
        state.phase = next;
        self.progress.record(message)
    }

    /// Connects and releases once so an unreachable store shows up before
    /// any work is done. Never fails the run.
    fn probe_store(&self) {
        info!(store = %self.connector.name(), "testing database connection");
        match self.connector.connect() {
            Ok(store) => {
                if let Err(err) = store.close() {
                    warn!(error = %format!("{err:#}"), "failed to release probe connection");
                }
                info!(store = %self.connector.name(), "database connection available");
            }
            Err(err) => {
                warn!(
                    store = %self.connector.name(),
                    error = %format!("{err:#}"),
                    "database connection unavailable; relational load will be skipped"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use anyhow::Result;
    use rusqlite::Connection;

    use super::*;
    use crate::cli::{SchemaPolicy, StoreKind};
    use crate::model::UsageRecord;
    use crate::store::{SqliteStore, TableStore};

    const RAW_HEADER: &str = "Location,Rate (WB),Year,Rate (ITU),Year,Users (CIA),Year,Notes";

    fn seed_sources(dir: &Path) {
        fs::write(
            dir.join("internet_users.csv"),
            format!("{RAW_HEADER}\nA,10.5,1999.9,,,,,\n"),
        )
        .expect("write first source");
        fs::write(
            dir.join("internet_users_extra.csv"),
            format!("{RAW_HEADER}\nB,NaN,NaN,,NaN,,NaN,\n"),
        )
        .expect("write second source");
    }

    fn log_messages(config: &EtlConfig) -> Vec<String> {
        fs::read_to_string(&config.log_path)
            .expect("read log")
            .lines()
            .map(|line| line.split_once(',').expect("timestamp prefix").1.to_string())
            .collect()
    }

    fn stored_years(db: &Path) -> Vec<(String, Option<i64>, Option<i64>, Option<i64>)> {
        let connection = Connection::open(db).expect("open db");
        let mut statement = connection
            .prepare("SELECT location, year_wb, year_itu, year_cia FROM internet_users ORDER BY location")
            .expect("prepare");
        statement
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
            .expect("query")
            .collect::<rusqlite::Result<Vec<_>>>()
            .expect("rows")
    }

    #[test]
    fn two_sources_flow_through_to_csv_and_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed_sources(dir.path());
        let mut config = EtlConfig::for_work_dir(dir.path());
        config.summary_path = Some(dir.path().join("reports").join("summary.json"));

        let summary = Pipeline::new(&config).run().expect("run succeeds");
        assert_eq!(summary.state, "done");
        assert_eq!(summary.rows_written, 2);
        assert_eq!(summary.sources.len(), 2);
        assert!(matches!(
            summary.relational,
            Some(RelationalOutcome::Loaded { inserted: 2, .. })
        ));

        let csv = fs::read_to_string(&config.output_path).expect("read output");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("S/N,Location,"));
        let mut labels: Vec<&str> = lines[1..]
            .iter()
            .map(|line| line.split(',').next().expect("index"))
            .collect();
        labels.sort();
        assert_eq!(labels, vec!["0", "1"]);
        assert!(csv.contains(",A,10.5,1999,"));

        assert_eq!(
            stored_years(&config.sqlite_path),
            vec![
                ("A".to_string(), Some(1999), None, None),
                ("B".to_string(), None, None, None),
            ]
        );

        assert_eq!(
            log_messages(&config),
            vec![
                "Beginning ETL process",
                "Extract phase started",
                "Extract completed",
                "Beginning transformation",
                "Transformation completed",
                "Beginning Load",
                "Data loaded to CSV and sqlite",
                "ETL process completed",
            ]
        );

        let written: RunSummary = serde_json::from_slice(
            &fs::read(config.summary_path.as_ref().expect("summary path")).expect("read summary"),
        )
        .expect("parse summary");
        assert_eq!(written.state, "done");
        assert_eq!(written.rows_written, 2);
    }

    #[test]
    fn rerun_leaves_table_identical_and_ignores_own_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed_sources(dir.path());
        let config = EtlConfig::for_work_dir(dir.path());

        Pipeline::new(&config).run().expect("first run");
        let first = stored_years(&config.sqlite_path);
        let summary = Pipeline::new(&config).run().expect("second run");
        let second = stored_years(&config.sqlite_path);

        assert_eq!(first, second);
        assert_eq!(summary.rows_written, 2);
        assert!(matches!(
            summary.relational,
            Some(RelationalOutcome::Loaded { cleared: 2, inserted: 2, .. })
        ));
        // Progress log grows across runs.
        assert_eq!(log_messages(&config).len(), 16);
    }

    #[test]
    fn unreachable_store_still_produces_identical_csv() {
        let reachable = tempfile::tempdir().expect("tempdir");
        seed_sources(reachable.path());
        let good = EtlConfig::for_work_dir(reachable.path());
        Pipeline::new(&good).run().expect("baseline run");

        let unreachable = tempfile::tempdir().expect("tempdir");
        seed_sources(unreachable.path());
        let mut config = EtlConfig::for_work_dir(unreachable.path());
        config.sqlite_path = unreachable.path().join("missing").join("customers.db");

        let summary = Pipeline::new(&config).run().expect("load skip is not fatal");
        assert_eq!(summary.state, "done");
        assert!(matches!(
            summary.relational,
            Some(RelationalOutcome::Skipped { .. })
        ));
        assert_eq!(
            fs::read_to_string(&config.output_path).expect("read output"),
            fs::read_to_string(&good.output_path).expect("read baseline")
        );
        assert!(log_messages(&config).contains(&"Data loaded to CSV; sqlite load skipped".to_string()));
    }

    /// SQLite store whose bulk insert always fails mid-transaction.
    struct RejectingInsertStore(SqliteStore);

    impl TableStore for RejectingInsertStore {
        fn begin(&mut self) -> Result<()> {
            self.0.begin()
        }

        fn create_table_if_absent(&mut self, table: &str) -> Result<()> {
            self.0.create_table_if_absent(table)
        }

        fn clear(&mut self, table: &str) -> Result<u64> {
            self.0.clear(table)
        }

        fn insert_rows(&mut self, _table: &str, _rows: &[UsageRecord]) -> Result<u64> {
            anyhow::bail!("constraint violated")
        }

        fn commit(&mut self) -> Result<()> {
            self.0.commit()
        }

        fn rollback(&mut self) -> Result<()> {
            self.0.rollback()
        }

        fn close(self: Box<Self>) -> Result<()> {
            Box::new(self.0).close()
        }
    }

    struct RejectingInsertConnector {
        path: std::path::PathBuf,
    }

    impl StoreConnector for RejectingInsertConnector {
        fn name(&self) -> &str {
            "sqlite"
        }

        fn connect(&self) -> Result<Box<dyn TableStore>> {
            Ok(Box::new(RejectingInsertStore(SqliteStore::open(&self.path)?)))
        }
    }

    #[test]
    fn failed_transaction_keeps_csv_and_prior_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed_sources(dir.path());
        let mut config = EtlConfig::for_work_dir(dir.path());
        config.summary_path = Some(dir.path().join("summary.json"));
        Pipeline::new(&config).run().expect("seed run");
        let before = stored_years(&config.sqlite_path);
        fs::remove_file(&config.output_path).expect("remove previous output");

        let connector = Box::new(RejectingInsertConnector {
            path: config.sqlite_path.clone(),
        });
        let err = Pipeline::with_connector(&config, connector)
            .run()
            .expect_err("insert failure is fatal");
        assert!(matches!(err, EtlError::Transaction { .. }));

        let csv = fs::read_to_string(&config.output_path).expect("csv kept");
        assert_eq!(csv.lines().count(), 3);
        assert_eq!(stored_years(&config.sqlite_path), before);

        let messages = log_messages(&config);
        assert!(
            messages
                .last()
                .is_some_and(|message| message.starts_with("load phase failed"))
        );

        let written: RunSummary = serde_json::from_slice(
            &fs::read(dir.path().join("summary.json")).expect("read summary"),
        )
        .expect("parse summary");
        assert_eq!(written.state, "failed");
        assert_eq!(written.failed_phase.as_deref(), Some("load"));
        assert_eq!(written.rows_written, 2);
        assert!(matches!(
            written.relational,
            Some(RelationalOutcome::RolledBack { ref table, .. }) if table == "internet_users"
        ));
    }

    #[test]
    fn unreadable_source_fails_before_any_sink_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed_sources(dir.path());
        fs::write(dir.path().join("broken.csv"), format!("{RAW_HEADER}\nC,1,2\n"))
            .expect("write broken source");
        let mut config = EtlConfig::for_work_dir(dir.path());
        config.summary_path = Some(dir.path().join("summary.json"));

        let err = Pipeline::new(&config).run().expect_err("broken source aborts");
        assert!(matches!(err, EtlError::SourceRead { .. }));
        assert!(!config.output_path.exists());

        let messages = log_messages(&config);
        assert_eq!(messages.last().map(String::as_str).map(|m| m.starts_with("scan_extract phase failed")), Some(true));

        let written: RunSummary = serde_json::from_slice(
            &fs::read(dir.path().join("summary.json")).expect("read summary"),
        )
        .expect("parse summary");
        assert_eq!(written.state, "failed");
        assert_eq!(written.failed_phase.as_deref(), Some("scan_extract"));
        assert!(written.relational.is_none());
    }

    #[test]
    fn strict_policy_aborts_on_partial_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("partial.csv"), "Location,Year\nA,2000\n").expect("write");
        let mut config = EtlConfig::for_work_dir(dir.path());
        config.schema_policy = SchemaPolicy::Strict;

        let err = Pipeline::new(&config).run().expect_err("strict rejects");
        assert!(matches!(err, EtlError::SchemaMismatch { .. }));

        config.schema_policy = SchemaPolicy::Lenient;
        let summary = Pipeline::new(&config).run().expect("lenient accepts");
        assert_eq!(summary.rows_written, 1);
    }

    #[cfg(not(feature = "postgres"))]
    #[test]
    fn postgres_without_feature_degrades_to_csv_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed_sources(dir.path());
        let mut config = EtlConfig::for_work_dir(dir.path());
        config.store = StoreKind::Postgres;

        let summary = Pipeline::new(&config).run().expect("not fatal");
        assert!(matches!(
            summary.relational,
            Some(RelationalOutcome::Skipped { ref store, .. }) if store == "postgres"
        ));
        assert!(config.output_path.exists());
    }

    #[test]
    fn phases_only_advance_one_step() {
        assert_eq!(Phase::Start.next(), Some(Phase::ScanExtract));
        assert_eq!(Phase::Load.next(), Some(Phase::Done));
        assert_eq!(Phase::Done.next(), None);
        assert_eq!(Phase::Failed.next(), None);
    }
}
