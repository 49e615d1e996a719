//! Replaying error journals against the target.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::core::traits::StoreConnector;
use crate::defaults::DefaultValueResolver;
use crate::error::Result;
use crate::journal::{ErrorJournal, ErrorRecord};
use crate::mapping::MigrationJob;
use crate::pipeline::{JobSchema, RowInserter};

/// Outcome of one replay pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    /// The journal that was replayed.
    pub journal: PathBuf,
    /// Records read from it.
    pub total_records: usize,
    /// Records inserted this time.
    pub success_count: usize,
    /// Records that failed again.
    pub failed_count: usize,
    /// Where the failed records went, when there were any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub residual_journal: Option<PathBuf>,
}

/// Re-attempts every record of an error journal as a fresh insert.
///
/// Merge fields are resolved again and the remaining fields are converted
/// again from the recorded source values. Records that still fail go to a
/// new residual journal; the replayed journal is left untouched. Replaying
/// the same journal twice inserts its rows twice unless the target has a
/// uniqueness constraint.
pub struct RecoveryReplayer<'a> {
    target: &'a mut dyn StoreConnector,
    resolver: DefaultValueResolver,
    commit_every: usize,
    error_log_dir: PathBuf,
}

impl<'a> RecoveryReplayer<'a> {
    pub fn new(
        target: &'a mut dyn StoreConnector,
        commit_every: usize,
        error_log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            target,
            resolver: DefaultValueResolver::default(),
            commit_every,
            error_log_dir: error_log_dir.into(),
        }
    }

    pub fn with_resolver(mut self, resolver: DefaultValueResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replay `journal_path` using the field mappings of `job`.
    pub async fn replay(&mut self, journal_path: &Path, job: &MigrationJob) -> Result<ReplayReport> {
        let schema = JobSchema::resolve(job)?;
        let contents = ErrorJournal::read(journal_path)?;
        let total = contents.records.len();
        info!(
            "Replaying {} record(s) from {} into {}",
            total,
            journal_path.display(),
            job.target_table
        );

        let mut report = ReplayReport {
            journal: journal_path.to_path_buf(),
            total_records: total,
            success_count: 0,
            failed_count: 0,
            residual_journal: None,
        };
        if total == 0 {
            return Ok(report);
        }

        let insert_fields = schema.insert_fields();
        let mut inserter = RowInserter::new(
            &mut *self.target,
            &job.target_table,
            &insert_fields,
            self.commit_every,
        );
        let mut failures = Vec::new();

        for (index, record) in contents.records.iter().enumerate() {
            let raw = schema.align_row(&contents.columns, &record.source_values);
            let values = schema.build_row(&raw, &self.resolver);
            match inserter.insert(&values).await {
                Ok(()) => {
                    report.success_count += 1;
                    if report.success_count % self.commit_every.max(1) == 0 {
                        info!("Replayed {}/{}", report.success_count, total);
                    }
                }
                Err(e) if e.is_row_scoped() => {
                    warn!("Record {} failed again: {}", index + 1, e);
                    failures.push(ErrorRecord::new(
                        record.source_values.clone(),
                        values,
                        e.to_string(),
                    ));
                }
                Err(e) => {
                    if let Err(rollback_err) = inserter.discard().await {
                        warn!("Rollback failed: {}", rollback_err);
                    }
                    return Err(e);
                }
            }
        }
        inserter.finish().await?;

        report.failed_count = failures.len();
        if !failures.is_empty() {
            let mut residual =
                ErrorJournal::residual(&self.error_log_dir, &job.residual_key(), contents.columns)
                    .with_target_columns(insert_fields);
            residual.append(&failures)?;
            info!("Residual journal: {}", residual.path().display());
            report.residual_journal = Some(residual.path().to_path_buf());
        }

        info!(
            "Replay finished: {} of {} inserted, {} failed again",
            report.success_count, total, report.failed_count
        );
        Ok(report)
    }
}
