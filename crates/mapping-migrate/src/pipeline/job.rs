//! Job and batch outcomes.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mapping::MigrationJob;

/// Final status of a table job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Every counted row was read.
    Done,
    /// The source ran out of rows before the counted total.
    Drained,
    /// The job stopped early (setup problem or lost connection).
    Aborted,
    /// The source was empty.
    Skipped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Done => "DONE",
            JobStatus::Drained => "DRAINED",
            JobStatus::Aborted => "ABORTED",
            JobStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// 1-based batch number.
    pub number: usize,
    /// Source offset of the first row.
    pub offset: u64,
    /// Rows fetched.
    pub rows: usize,
    /// Rows inserted.
    pub inserted: usize,
    /// Rows journaled.
    pub failed: usize,
    /// Commits that flushed at least one insert.
    pub commits: usize,
}

impl BatchStats {
    /// Every fetched row was either inserted or journaled.
    pub fn is_conserved(&self) -> bool {
        self.inserted + self.failed == self.rows
    }
}

/// Outcome of one table job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job: String,
    pub source_table: String,
    pub target_table: String,
    pub status: JobStatus,

    /// Rows counted before paging.
    pub total_rows: u64,
    pub rows_read: u64,
    pub rows_inserted: u64,
    pub rows_failed: u64,
    pub commits: usize,
    pub batches: Vec<BatchStats>,

    /// Error journal, when any row failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal: Option<PathBuf>,

    pub duration_ms: u64,

    /// Why the job was aborted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobReport {
    /// Empty report for a job about to run.
    pub fn new(job: &MigrationJob) -> Self {
        Self {
            job: job.name.clone(),
            source_table: job.source_table.clone(),
            target_table: job.target_table.clone(),
            status: JobStatus::Done,
            total_rows: 0,
            rows_read: 0,
            rows_inserted: 0,
            rows_failed: 0,
            commits: 0,
            batches: Vec::new(),
            journal: None,
            duration_ms: 0,
            error: None,
        }
    }

    /// Fold a finished batch into the totals.
    pub fn record_batch(&mut self, stats: BatchStats) {
        self.rows_read += stats.rows as u64;
        self.rows_inserted += stats.inserted as u64;
        self.rows_failed += stats.failed as u64;
        self.commits += stats.commits;
        self.batches.push(stats);
    }

    /// Mark the job aborted.
    pub fn abort(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Aborted;
        self.error = Some(error.into());
    }

    pub fn set_duration(&mut self, elapsed: Duration) {
        self.duration_ms = elapsed.as_millis() as u64;
    }

    /// Percentage of counted rows read so far.
    pub fn progress_percent(&self) -> f64 {
        if self.total_rows == 0 {
            return 100.0;
        }
        self.rows_read as f64 / self.total_rows as f64 * 100.0
    }

    pub fn is_aborted(&self) -> bool {
        self.status == JobStatus::Aborted
    }
}
