use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use tracing::info;

use crate::error::{EtlError, EtlResult};

const TIMESTAMP_FORMAT: &str = "%Y-%b-%d-%H:%M:%S";

/// Append-only `<timestamp>,<message>` log of phase boundaries.
///
/// The file is opened and closed for every entry; no handle is held between
/// phases.
#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn record(&self, message: &str) -> EtlResult<()> {
        self.record_at(Local::now(), message)
    }

    pub fn record_at(&self, at: DateTime<Local>, message: &str) -> EtlResult<()> {
        info!(log = %self.path.display(), "{message}");

        let line = format_entry(at, message);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.error(source))?;
        file.write_all(line.as_bytes())
            .map_err(|source| self.error(source))
    }

    fn error(&self, source: std::io::Error) -> EtlError {
        EtlError::ProgressLog {
            path: self.path.clone(),
            source,
        }
    }
}

pub fn format_entry(at: DateTime<Local>, message: &str) -> String {
    format!("{},{}\n", at.format(TIMESTAMP_FORMAT), message)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn format_entry_uses_abbreviated_month_to_the_second() {
        let at = Local
            .with_ymd_and_hms(2024, 3, 5, 14, 7, 9)
            .single()
            .expect("unambiguous local time");
        assert_eq!(
            format_entry(at, "Beginning ETL process"),
            "2024-Mar-05-14:07:09,Beginning ETL process\n"
        );
    }

    #[test]
    fn record_appends_without_truncating() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log_file.txt");
        fs::write(&path, "2020-Jan-01-00:00:00,earlier run\n").expect("seed log");

        let log = ProgressLog::new(&path);
        log.record("Extract phase started").expect("first append");
        log.record("Extract completed").expect("second append");

        let contents = fs::read_to_string(&path).expect("read log");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "2020-Jan-01-00:00:00,earlier run");
        assert!(lines[1].ends_with(",Extract phase started"));
        assert!(lines[2].ends_with(",Extract completed"));

        let stamp = lines[1].split(',').next().expect("timestamp");
        assert!(
            regex::Regex::new(r"^\d{4}-[A-Z][a-z]{2}-\d{2}-\d{2}:\d{2}:\d{2}$")
                .expect("regex")
                .is_match(stamp),
            "unexpected timestamp {stamp}"
        );
    }

    #[test]
    fn record_reports_unwritable_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = ProgressLog::new(dir.path().join("missing").join("log_file.txt"));

        let err = log.record("Beginning ETL process").expect_err("parent is absent");
        assert!(matches!(err, EtlError::ProgressLog { .. }));
    }
}
