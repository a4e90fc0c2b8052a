use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Lists files directly inside `work_dir` whose names match `pattern`,
/// skipping `output_path` so a previous run's artifact is never re-ingested.
/// Hidden files only match a pattern that starts with a literal dot.
///
/// Order follows the glob walk and is not a stable identity for rows.
pub fn scan_sources(work_dir: &Path, pattern: &str, output_path: &Path) -> Result<Vec<PathBuf>> {
    let escaped_dir = glob::Pattern::escape(&work_dir.to_string_lossy());
    let full_pattern = Path::new(&escaped_dir).join(pattern);
    let full_pattern = full_pattern.to_string_lossy();

    let options = glob::MatchOptions {
        require_literal_leading_dot: true,
        ..glob::MatchOptions::new()
    };
    let entries = glob::glob_with(&full_pattern, options)
        .with_context(|| format!("failed to parse source pattern: {full_pattern}"))?;

    let mut sources = Vec::new();
    for entry in entries {
        let path = entry.with_context(|| format!("failed to read entry in {}", work_dir.display()))?;

        let is_file = fs::metadata(&path)
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file();
        if !is_file {
            continue;
        }

        if is_same_file(&path, output_path) {
            debug!(path = %path.display(), "skipping pipeline output file");
            continue;
        }

        sources.push(path);
    }

    Ok(sources)
}

fn is_same_file(candidate: &Path, output_path: &Path) -> bool {
    if candidate.file_name() != output_path.file_name() {
        return false;
    }

    match (fs::canonicalize(candidate), fs::canonicalize(output_path)) {
        (Ok(left), Ok(right)) => left == right,
        _ => candidate.parent().map(fs::canonicalize).and_then(Result::ok)
            == output_path.parent().map(fs::canonicalize).and_then(Result::ok),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::write(path, "Location\n").expect("write fixture");
    }

    #[test]
    fn scan_sources_matches_pattern_and_skips_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        touch(&root.join("internet_users.csv"));
        touch(&root.join("internet_users_2.csv"));
        touch(&root.join("transformed_internet_users_data.csv"));
        touch(&root.join("notes.txt"));
        fs::create_dir(root.join("nested")).expect("mkdir");
        touch(&root.join("nested").join("deep.csv"));
        fs::create_dir(root.join("folder.csv")).expect("mkdir");

        let output = root.join("transformed_internet_users_data.csv");
        let mut found = scan_sources(root, "*.csv", &output).expect("scan");
        found.sort();

        assert_eq!(
            found,
            vec![
                root.join("internet_users.csv"),
                root.join("internet_users_2.csv"),
            ]
        );
    }

    #[test]
    fn scan_sources_keeps_same_name_when_output_lives_elsewhere() {
        let dir = tempfile::tempdir().expect("tempdir");
        let other = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("result.csv"));

        let found = scan_sources(dir.path(), "*.csv", &other.path().join("result.csv"))
            .expect("scan");
        assert_eq!(found, vec![dir.path().join("result.csv")]);
    }

    #[test]
    fn scan_sources_skips_hidden_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("internet_users.csv"));
        touch(&dir.path().join("._internet_users.csv"));
        touch(&dir.path().join(".draft.csv"));

        let found = scan_sources(dir.path(), "*.csv", &dir.path().join("out.csv")).expect("scan");
        assert_eq!(found, vec![dir.path().join("internet_users.csv")]);

        let hidden = scan_sources(dir.path(), ".*.csv", &dir.path().join("out.csv")).expect("scan");
        assert_eq!(hidden.len(), 2);
    }

    #[test]
    fn scan_sources_returns_empty_for_no_matches() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("readme.md"));

        let found = scan_sources(dir.path(), "*.csv", &dir.path().join("out.csv")).expect("scan");
        assert!(found.is_empty());
    }
}
