//! CSV error journals.
//!
//! A journal holds the rows a table job could not insert: the originally
//! selected source values, then a snapshot of the values the insert was
//! attempted with (`target:`-prefixed columns), then `error_message` and
//! `error_time`.
//! The file is created on the first failure of a run and only appended to
//! afterwards. Recovery reads a journal and writes rows that fail again to
//! a new residual journal; it never modifies the journal it replays.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

/// Column holding the insert error.
pub const ERROR_MESSAGE_COLUMN: &str = "error_message";
/// Column holding when the row failed.
pub const ERROR_TIME_COLUMN: &str = "error_time";

/// Header prefix of target snapshot columns.
pub const TARGET_COLUMN_PREFIX: &str = "target:";

const FILE_PREFIX: &str = "error_log_";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// One row that could not be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    /// Selected source values, aligned to the journal's columns.
    pub source_values: Vec<SqlValue>,
    /// Values the insert was attempted with, aligned to the journal's
    /// target columns.
    pub target_values: Vec<SqlValue>,
    pub error_message: String,
    pub error_time: NaiveDateTime,
}

impl ErrorRecord {
    /// Record a failure that happened now.
    pub fn new(
        source_values: Vec<SqlValue>,
        target_values: Vec<SqlValue>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            source_values,
            target_values,
            error_message: error_message.into(),
            error_time: Local::now().naive_local(),
        }
    }
}

/// A journal read back from disk.
#[derive(Debug, Clone)]
pub struct JournalContents {
    /// Source field columns (without the snapshot and error columns).
    pub columns: Vec<String>,
    /// Target snapshot columns, unprefixed.
    pub target_columns: Vec<String>,
    pub records: Vec<ErrorRecord>,
}

/// Append-only error journal for one table and run.
#[derive(Debug)]
pub struct ErrorJournal {
    path: PathBuf,
    columns: Vec<String>,
    target_columns: Vec<String>,
    records_written: usize,
}

impl ErrorJournal {
    /// Journal for a job run started at `run_started`.
    ///
    /// Batches of the same run share the file.
    pub fn for_run(dir: &Path, key: &str, run_started: NaiveDateTime, columns: Vec<String>) -> Self {
        let name = format!(
            "{}{}_{}.csv",
            FILE_PREFIX,
            key,
            run_started.format(STAMP_FORMAT)
        );
        Self::at(dir.join(name), columns)
    }

    /// A fresh residual journal for one recovery pass.
    ///
    /// The name carries a random suffix so repeated passes never collide.
    pub fn residual(dir: &Path, key: &str, columns: Vec<String>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}{}_recover_{}_{}.csv",
            FILE_PREFIX,
            key,
            Local::now().format(STAMP_FORMAT),
            &suffix[..8]
        );
        Self::at(dir.join(name), columns)
    }

    /// Journal at an explicit path.
    pub fn at(path: PathBuf, columns: Vec<String>) -> Self {
        Self {
            path,
            columns,
            target_columns: Vec::new(),
            records_written: 0,
        }
    }

    /// Also journal each record's target values under these columns.
    pub fn with_target_columns(mut self, target_columns: Vec<String>) -> Self {
        self.target_columns = target_columns;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn target_columns(&self) -> &[String] {
        &self.target_columns
    }

    /// Records appended through this handle.
    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// Whether the file has been created.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Append records, creating the file and header on first use.
    pub fn append(&mut self, records: &[ErrorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            let header = self
                .columns
                .iter()
                .cloned()
                .chain(
                    self.target_columns
                        .iter()
                        .map(|c| format!("{}{}", TARGET_COLUMN_PREFIX, c)),
                )
                .chain([ERROR_MESSAGE_COLUMN.to_string(), ERROR_TIME_COLUMN.to_string()]);
            writer.write_record(header)?;
            debug!("Created error journal {}", self.path.display());
        }

        for record in records {
            if record.source_values.len() != self.columns.len() {
                return Err(MigrateError::Journal(format!(
                    "record has {} values for {} columns",
                    record.source_values.len(),
                    self.columns.len()
                )));
            }
            let snapshot: &[SqlValue] = if self.target_columns.is_empty() {
                &[]
            } else if record.target_values.len() == self.target_columns.len() {
                &record.target_values
            } else {
                return Err(MigrateError::Journal(format!(
                    "record has {} target values for {} target columns",
                    record.target_values.len(),
                    self.target_columns.len()
                )));
            };
            let cells = record
                .source_values
                .iter()
                .chain(snapshot)
                .map(SqlValue::to_text)
                .chain([
                    record.error_message.clone(),
                    record.error_time.format(TIME_FORMAT).to_string(),
                ]);
            writer.write_record(cells)?;
        }
        writer.flush()?;

        self.records_written += records.len();
        info!(
            "Wrote {} error record(s) to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Read a journal. Empty cells read back as NULL, everything else as text.
    ///
    /// Journals without target snapshot columns read with empty
    /// `target_values`.
    pub fn read(path: &Path) -> Result<JournalContents> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| MigrateError::Journal(format!("cannot open {}: {}", path.display(), e)))?;

        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let message_idx = column_index(&header, ERROR_MESSAGE_COLUMN, path)?;
        let time_idx = column_index(&header, ERROR_TIME_COLUMN, path)?;
        let (target_idx, source_idx): (Vec<usize>, Vec<usize>) = (0..header.len())
            .filter(|i| *i != message_idx && *i != time_idx)
            .partition(|&i| header[i].starts_with(TARGET_COLUMN_PREFIX));
        let columns = source_idx.iter().map(|&i| header[i].clone()).collect();
        let target_columns = target_idx
            .iter()
            .map(|&i| header[i][TARGET_COLUMN_PREFIX.len()..].to_string())
            .collect();

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            let cell = |i: usize| row.get(i).unwrap_or("");
            let value = |i: &usize| match cell(*i) {
                "" => SqlValue::Null,
                text => SqlValue::Text(text.to_string()),
            };
            let source_values = source_idx.iter().map(&value).collect();
            let target_values = target_idx.iter().map(&value).collect();
            let error_time = NaiveDateTime::parse_from_str(cell(time_idx), TIME_FORMAT)
                .unwrap_or_else(|_| Local::now().naive_local());
            records.push(ErrorRecord {
                source_values,
                target_values,
                error_message: cell(message_idx).to_string(),
                error_time,
            });
        }

        Ok(JournalContents {
            columns,
            target_columns,
            records,
        })
    }
}

fn column_index(header: &[String], name: &str, path: &Path) -> Result<usize> {
    header.iter().position(|h| h == name).ok_or_else(|| {
        MigrateError::Journal(format!("{} has no '{}' column", path.display(), name))
    })
}

/// Journals of a table in `dir`, newest first. Residual journals are included.
pub fn list_journals(dir: &Path, key: &str) -> Result<Vec<PathBuf>> {
    list_journals_for(dir, &[key])
}

/// Journals filed under any of `keys`, newest first.
pub fn list_journals_for(dir: &Path, keys: &[&str]) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let prefixes: Vec<String> = keys
        .iter()
        .map(|key| format!("{}{}_", FILE_PREFIX, key))
        .collect();
    let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        // `orders_` must not match journals of `orders_archive`
        let own = prefixes.iter().any(|prefix| {
            name.strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_suffix(".csv"))
                .is_some_and(|rest| {
                    rest.starts_with("recover_")
                        || rest.starts_with(|c: char| c.is_ascii_digit())
                })
        });
        if !own {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        found.push((modified, entry.path()));
    }

    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn started() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 3)
            .and_then(|d| d.and_hms_opt(4, 5, 6))
            .unwrap()
    }

    fn columns() -> Vec<String> {
        vec!["CustID".to_string(), "Name".to_string()]
    }

    fn record(id: i64, name: Option<&str>) -> ErrorRecord {
        ErrorRecord::new(
            vec![SqlValue::I64(id), name.map(SqlValue::from).unwrap_or(SqlValue::Null)],
            vec![SqlValue::I64(id)],
            "duplicate key, \"pk_customer\"",
        )
    }

    #[test]
    fn test_created_lazily() {
        let dir = TempDir::new().unwrap();
        let mut journal = ErrorJournal::for_run(dir.path(), "dbo.Customer", started(), columns());
        assert!(journal
            .path()
            .ends_with("error_log_dbo.Customer_20240203_040506.csv"));

        journal.append(&[]).unwrap();
        assert!(!journal.exists());

        journal.append(&[record(1, Some("Ann"))]).unwrap();
        assert!(journal.exists());
    }

    #[test]
    fn test_header_written_once() {
        let dir = TempDir::new().unwrap();
        let mut journal = ErrorJournal::for_run(dir.path(), "t", started(), columns());
        journal.append(&[record(1, Some("Ann"))]).unwrap();
        journal.append(&[record(2, None), record(3, Some("Cy, Jr."))]).unwrap();

        let text = fs::read_to_string(journal.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "CustID,Name,error_message,error_time");
        assert_eq!(lines.len(), 4);
        assert_eq!(journal.records_written(), 3);
    }

    #[test]
    fn test_read_back() {
        let dir = TempDir::new().unwrap();
        let mut journal = ErrorJournal::for_run(dir.path(), "t", started(), columns());
        journal
            .append(&[record(1, Some("Ann")), record(2, None), record(3, Some("Cy, Jr."))])
            .unwrap();

        let contents = ErrorJournal::read(journal.path()).unwrap();
        assert_eq!(contents.columns, columns());
        assert_eq!(contents.records.len(), 3);
        assert_eq!(
            contents.records[0].source_values,
            vec![SqlValue::Text("1".into()), SqlValue::Text("Ann".into())]
        );
        assert!(contents.records[1].source_values[1].is_null());
        assert_eq!(contents.records[2].source_values[1], SqlValue::Text("Cy, Jr.".into()));
        assert_eq!(contents.records[0].error_message, "duplicate key, \"pk_customer\"");
    }

    #[test]
    fn test_target_snapshot_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut journal = ErrorJournal::for_run(dir.path(), "t", started(), columns())
            .with_target_columns(vec!["id".to_string(), "Name".to_string()]);
        let failed = ErrorRecord::new(
            vec![SqlValue::Text("0007".into()), SqlValue::Text("Ann".into())],
            vec![SqlValue::I64(7), SqlValue::Null],
            "boom",
        );
        journal.append(&[failed]).unwrap();

        let text = fs::read_to_string(journal.path()).unwrap();
        assert_eq!(
            text.lines().next().unwrap(),
            "CustID,Name,target:id,target:Name,error_message,error_time"
        );

        let contents = ErrorJournal::read(journal.path()).unwrap();
        // a target column named like a source column stays separate
        assert_eq!(contents.columns, columns());
        assert_eq!(contents.target_columns, vec!["id", "Name"]);
        let record = &contents.records[0];
        assert_eq!(record.source_values[0], SqlValue::Text("0007".into()));
        assert_eq!(record.target_values, vec![SqlValue::Text("7".into()), SqlValue::Null]);
    }

    #[test]
    fn test_target_snapshot_length_checked() {
        let dir = TempDir::new().unwrap();
        let mut journal = ErrorJournal::for_run(dir.path(), "t", started(), columns())
            .with_target_columns(vec!["id".to_string(), "name".to_string()]);
        let err = journal.append(&[record(1, Some("Ann"))]).unwrap_err();
        assert!(matches!(err, MigrateError::Journal(_)));
    }

    #[test]
    fn test_read_rejects_foreign_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.csv");
        fs::write(&path, "a,b\n1,2\n").unwrap();
        assert!(matches!(ErrorJournal::read(&path), Err(MigrateError::Journal(_))));
    }

    #[test]
    fn test_residual_names_are_distinct() {
        let dir = TempDir::new().unwrap();
        let a = ErrorJournal::residual(dir.path(), "customer", columns());
        let b = ErrorJournal::residual(dir.path(), "customer", columns());
        assert_ne!(a.path(), b.path());
        let name = a.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("error_log_customer_recover_"));
    }

    #[test]
    fn test_list_journals() {
        let dir = TempDir::new().unwrap();
        for name in [
            "error_log_orders_20240101_000000.csv",
            "error_log_orders_recover_20240102_000000_abcdef12.csv",
            "error_log_orders_archive_20240101_000000.csv",
            "error_log_orders_20240101_000000.txt",
        ] {
            fs::write(dir.path().join(name), "x\n").unwrap();
        }

        let found = list_journals(dir.path(), "orders").unwrap();
        let mut names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "error_log_orders_20240101_000000.csv",
                "error_log_orders_recover_20240102_000000_abcdef12.csv"
            ]
        );
        assert!(list_journals(&dir.path().join("missing"), "orders").unwrap().is_empty());

        let both = list_journals_for(dir.path(), &["orders", "orders_archive"]).unwrap();
        assert_eq!(both.len(), 3);
    }
}
