use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Joins `path` onto `base` unless it is already absolute.
pub fn resolve_in(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn ensure_parent_directory(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display())),
        _ => Ok(()),
    }
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut hasher = Sha256::new();
    io::copy(&mut BufReader::new(file), &mut hasher)
        .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// Sibling path used to stage a file before it is renamed into place.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_directory(path)?;

    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    let staged = staging_path(path);
    let mut file = File::create(&staged)
        .with_context(|| format!("failed to create json file: {}", staged.display()))?;
    file.write_all(&data)
        .and_then(|_| file.write_all(b"\n"))
        .with_context(|| format!("failed to write json file: {}", staged.display()))?;
    drop(file);

    fs::rename(&staged, path)
        .with_context(|| format!("failed to move json file into place: {}", path.display()))
}
