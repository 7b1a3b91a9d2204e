//! CSV checkpoints passed between pipeline stages.
//!
//! Every stage writes its output to a fresh, timestamp-suffixed file and
//! never touches an existing one, so reruns only ever add files. Readers
//! require the columns of their record type and ignore any extra columns a
//! later version of a stage may have added.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Writer};
use walkdir::WalkDir;
use crate::{Result, UpgraderError};

/// Timestamp suffix used in checkpoint and backup file names.
pub const DATE_FORMAT_FOR_FILES: &str = "%Y%m%dT%H%M%SZ";

/// A record type that can be stored as one checkpoint row.
///
/// A downstream record's `columns()` starts with its upstream record's
/// columns, so every checkpoint is a column superset of the one it was
/// built from.
pub trait CheckpointRow: Sized {
    fn columns() -> Vec<&'static str>;
    fn to_fields(&self) -> Vec<String>;
    fn from_row(row: &Row<'_>) -> Result<Self>;
}

/// One CSV row with access by column name.
pub struct Row<'a> {
    headers: &'a HashMap<String, usize>,
    record: &'a StringRecord,
    path: &'a Path,
    line: u64,
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> &'a str {
        self.headers
            .get(column)
            .and_then(|&index| self.record.get(index))
            .unwrap_or("")
    }

    /// Parses a column, treating an empty cell as the type's default.
    pub fn parse_or_default<T>(&self, column: &str) -> Result<T>
    where
        T: FromStr + Default,
        T::Err: std::fmt::Display,
    {
        let value = self.get(column).trim();
        if value.is_empty() {
            return Ok(T::default());
        }
        value
            .parse()
            .map_err(|e| self.invalid(format!("column '{}' value '{}': {}", column, value, e)))
    }

    pub fn parse_bool(&self, column: &str) -> Result<bool> {
        match self.get(column).trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            other => Err(self.invalid(format!("column '{}' is not a boolean: '{}'", column, other))),
        }
    }

    pub fn invalid(&self, reason: String) -> UpgraderError {
        UpgraderError::InvalidRow {
            path: self.path.to_path_buf(),
            line: self.line,
            reason,
        }
    }
}

pub fn format_bool(value: bool) -> String {
    if value { "true".into() } else { "false".into() }
}

pub fn read_checkpoint<R: CheckpointRow>(path: impl AsRef<Path>) -> Result<Vec<R>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(UpgraderError::CheckpointMissing(path.to_path_buf()));
    }

    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers: HashMap<String, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(index, name)| (name.trim().to_string(), index))
        .collect();

    for column in R::columns() {
        if !headers.contains_key(column) {
            return Err(UpgraderError::MissingColumn {
                path: path.to_path_buf(),
                column: column.to_string(),
            });
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let row = Row { headers: &headers, record: &record, path, line };
        rows.push(R::from_row(&row)?);
    }

    log::info!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Writes to `path`, which must not exist yet.
pub fn write_checkpoint<R: CheckpointRow>(path: impl AsRef<Path>, rows: &[R]) -> Result<()> {
    let path = path.as_ref();
    let file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let mut writer = Writer::from_writer(file);

    let columns = R::columns();
    writer.write_record(&columns)?;
    for row in rows {
        let fields = row.to_fields();
        debug_assert_eq!(fields.len(), columns.len());
        writer.write_record(&fields)?;
    }

    writer.flush()?;
    log::info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// `dir/{prefix}_{timestamp}.csv`, with a counter appended while the name is taken.
pub fn fresh_checkpoint_path(dir: &Path, prefix: &str, now: DateTime<Utc>) -> PathBuf {
    let stamp = now.format(DATE_FORMAT_FOR_FILES);
    let mut candidate = dir.join(format!("{}_{}.csv", prefix, stamp));
    let mut counter = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}_{}_{}.csv", prefix, stamp, counter));
        counter += 1;
    }
    candidate
}

pub fn write_new_checkpoint<R: CheckpointRow>(
    dir: &Path,
    prefix: &str,
    rows: &[R],
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = fresh_checkpoint_path(dir, prefix, now);
    write_checkpoint(&path, rows)?;
    Ok(path)
}

/// Moves an existing file aside to `{stem}_{timestamp}.{ext}`.
pub fn backup_existing(path: &Path, now: DateTime<Utc>) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("checkpoint");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("csv");
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let stamp = now.format(DATE_FORMAT_FOR_FILES);

    let mut backup = dir.join(format!("{}_{}.{}", stem, stamp, ext));
    let mut counter = 1;
    while backup.exists() {
        backup = dir.join(format!("{}_{}_{}.{}", stem, stamp, counter, ext));
        counter += 1;
    }

    fs::rename(path, &backup)?;
    log::info!("Backed up {} to {}", path.display(), backup.display());
    Ok(Some(backup))
}

/// Orders `{stamp}.csv` and `{stamp}_{n}.csv` names by timestamp, then
/// by the collision counter read as a number.
fn checkpoint_order(name: &str, lead: &str) -> Option<(String, u64)> {
    let rest = name.strip_prefix(lead)?.strip_suffix(".csv")?;
    if !rest.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    match rest.split_once('_') {
        Some((stamp, counter)) => Some((stamp.to_string(), counter.parse().ok()?)),
        None => Some((rest.to_string(), 0)),
    }
}

/// Newest `{prefix}_<timestamp>*.csv` in `dir`.
pub fn latest_checkpoint(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let lead = format!("{}_", prefix);
    WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let order = checkpoint_order(&e.file_name().to_string_lossy(), &lead)?;
            Some((order, e.into_path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, path)| path)
}
