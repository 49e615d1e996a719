//! Runs one table job from count to final commit.

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use tracing::{debug, error, info, trace, warn};

use crate::config::MigrationConfig;
use crate::core::traits::StoreConnector;
use crate::core::value::Batch;
use crate::defaults::DefaultValueResolver;
use crate::error::{MigrateError, Result};
use crate::journal::{ErrorJournal, ErrorRecord};
use crate::mapping::MigrationJob;

use super::inserter::RowInserter;
use super::job::{BatchStats, JobReport, JobStatus};
use super::pager::BatchPager;
use super::schema::JobSchema;

/// Runner lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Init,
    Counting,
    Paging,
    Transforming,
    Inserting,
    Committing,
    Done,
    Aborted,
    Drained,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunnerState::Init => "INIT",
            RunnerState::Counting => "COUNTING",
            RunnerState::Paging => "PAGING",
            RunnerState::Transforming => "TRANSFORMING",
            RunnerState::Inserting => "INSERTING",
            RunnerState::Committing => "COMMITTING",
            RunnerState::Done => "DONE",
            RunnerState::Aborted => "ABORTED",
            RunnerState::Drained => "DRAINED",
        };
        f.write_str(s)
    }
}

/// Settings shared by every job of a run.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Rows per page when the job does not set its own.
    pub batch_size: usize,
    /// Successful inserts between commits.
    pub commit_every: usize,
    /// Directory for error journals.
    pub error_log_dir: PathBuf,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self::from(&MigrationConfig::default())
    }
}

impl From<&MigrationConfig> for RunnerOptions {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            commit_every: config.commit_every,
            error_log_dir: config.error_log_dir.clone(),
        }
    }
}

/// Moves one table job from a source store into a target store.
///
/// Rows the target rejects are journaled and the job continues. Anything
/// else that fails (setup, lost connection, journal I/O) aborts the job;
/// the error is reported in the [`JobReport`], never returned.
pub struct MigrationRunner<'a> {
    source: &'a mut dyn StoreConnector,
    target: &'a mut dyn StoreConnector,
    resolver: DefaultValueResolver,
    options: RunnerOptions,
    state: RunnerState,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(
        source: &'a mut dyn StoreConnector,
        target: &'a mut dyn StoreConnector,
        options: RunnerOptions,
    ) -> Self {
        Self {
            source,
            target,
            resolver: DefaultValueResolver::default(),
            options,
            state: RunnerState::Init,
        }
    }

    /// Use `resolver` for merge-field defaults.
    pub fn with_resolver(mut self, resolver: DefaultValueResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// State after the last transition.
    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Run a job to completion.
    pub async fn run(&mut self, job: &MigrationJob) -> JobReport {
        let started = Instant::now();
        let run_started = Local::now().naive_local();
        let mut report = JobReport::new(job);
        self.transition(RunnerState::Init);

        info!(
            "Migrating {} -> {} ({})",
            job.source_table, job.target_table, job.migration_type
        );

        if let Err(e) = self.execute(job, run_started, &mut report).await {
            self.transition(RunnerState::Aborted);
            match &e {
                MigrateError::Setup { .. } => warn!("Skipping job {}: {}", job.name, e),
                _ => error!("Job {} aborted: {}", job.name, e),
            }
            report.abort(e.to_string());
        }

        report.set_duration(started.elapsed());
        info!(
            "Job {} {}: {} inserted, {} failed, {} batch(es)",
            job.name,
            report.status,
            report.rows_inserted,
            report.rows_failed,
            report.batches.len()
        );
        if let Some(path) = &report.journal {
            info!("Error journal: {}", path.display());
        }
        report
    }

    fn transition(&mut self, next: RunnerState) {
        transition(&mut self.state, next);
    }

    async fn execute(
        &mut self,
        job: &MigrationJob,
        run_started: NaiveDateTime,
        report: &mut JobReport,
    ) -> Result<()> {
        let schema = JobSchema::resolve(job)?;
        let insert_fields = schema.insert_fields();
        let batch_size = job.effective_batch_size(self.options.batch_size);
        let mut journal = ErrorJournal::for_run(
            &self.options.error_log_dir,
            &job.journal_key(),
            run_started,
            schema.select_fields.clone(),
        )
        .with_target_columns(insert_fields.clone());

        transition(&mut self.state, RunnerState::Counting);
        let mut pager = BatchPager::new(&mut *self.source, job, &schema.select_fields, batch_size);
        let total = pager.count().await?;
        report.total_rows = total;
        info!("{} has {} row(s)", job.source_table, total);
        if total == 0 {
            warn!("Source {} is empty, skipping", job.source_table);
            report.status = JobStatus::Skipped;
            transition(&mut self.state, RunnerState::Done);
            return Ok(());
        }

        let mut inserter = RowInserter::new(
            &mut *self.target,
            &job.target_table,
            &insert_fields,
            self.options.commit_every,
        );
        debug!("Insert statement: {}", inserter.insert_sql());

        loop {
            transition(&mut self.state, RunnerState::Paging);
            let Some(batch) = pager.next_page().await? else {
                break;
            };
            info!(
                "Batch {} at offset {}: {} row(s)",
                batch.number,
                batch.offset,
                batch.len()
            );

            let mut errors = Vec::new();
            let outcome = write_batch(
                &batch,
                &schema,
                &self.resolver,
                &mut inserter,
                &mut errors,
                &mut self.state,
            )
            .await;

            // Rows already rejected are journaled even when the batch aborts.
            journal.append(&errors)?;
            if journal.exists() {
                report.journal = Some(journal.path().to_path_buf());
            }

            let stats = match outcome {
                Ok(stats) => stats,
                Err(e) => {
                    match inserter.discard().await {
                        Ok(n) if n > 0 => warn!("Discarded {} uncommitted row(s)", n),
                        Ok(_) => {}
                        Err(rollback_err) => warn!("Rollback failed: {}", rollback_err),
                    }
                    return Err(e);
                }
            };
            report.record_batch(stats);

            info!(
                "Progress: {}/{} ({:.2}%)",
                report.rows_read,
                report.total_rows,
                report.progress_percent()
            );
        }

        let next = if report.rows_read < total {
            warn!(
                "Source {} ran out after {} of {} counted row(s)",
                job.source_table, report.rows_read, total
            );
            report.status = JobStatus::Drained;
            RunnerState::Drained
        } else {
            report.status = JobStatus::Done;
            RunnerState::Done
        };
        transition(&mut self.state, next);
        Ok(())
    }
}

/// Every state change goes through here.
fn transition(state: &mut RunnerState, next: RunnerState) {
    trace!("Runner {} -> {}", state, next);
    *state = next;
}

/// Transform and insert every row of a batch, then commit.
///
/// Rejected rows are pushed to `errors`. Any other failure stops the batch.
async fn write_batch(
    batch: &Batch,
    schema: &JobSchema,
    resolver: &DefaultValueResolver,
    inserter: &mut RowInserter<'_>,
    errors: &mut Vec<ErrorRecord>,
    state: &mut RunnerState,
) -> Result<BatchStats> {
    let mut stats = BatchStats {
        number: batch.number,
        offset: batch.offset,
        rows: batch.len(),
        ..BatchStats::default()
    };

    for raw in &batch.rows {
        transition(state, RunnerState::Transforming);
        let values = schema.build_row(raw, resolver);

        transition(state, RunnerState::Inserting);
        match inserter.insert(&values).await {
            Ok(()) => stats.inserted += 1,
            Err(e) if e.is_row_scoped() => {
                let mut message = e.to_string();
                let nulls = schema.null_violations(&values);
                if !nulls.is_empty() {
                    message.push_str(&format!(" (NULL in NOT NULL field: {})", nulls.join(", ")));
                }
                warn!("Row at batch {} rejected: {}", batch.number, message);
                debug!("Rejected values: {:?}", values);
                errors.push(ErrorRecord::new(raw.clone(), values, message));
                stats.failed += 1;
            }
            Err(e) => return Err(e),
        }
    }

    transition(state, RunnerState::Committing);
    stats.commits = inserter.finish().await?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::SqlValue;
    use crate::drivers::MemoryStore;
    use crate::mapping::MigrationType;
    use tempfile::TempDir;

    fn job(fields_yaml: &str) -> MigrationJob {
        MigrationJob {
            name: "items".into(),
            source_table: "dbo.Items".into(),
            target_table: "items".into(),
            migration_type: MigrationType::OneToOne,
            fields: serde_yaml::from_str(fields_yaml).unwrap(),
            batch_size: Some(10),
            order_by: vec!["ID".into()],
            join: None,
        }
    }

    const FIELDS: &str = r#"
- {source_field: ID, target_field: id, data_type: int, not_null: true, select: true, transform: true}
- {source_field: Qty, target_field: qty, data_type: int, select: true, transform: true}
"#;

    fn source(n: i64) -> MemoryStore {
        let rows = (1..=n)
            .map(|i| vec![SqlValue::I64(i), SqlValue::Text(format!("{}", i * 2))])
            .collect();
        MemoryStore::new().with_table("dbo.Items", &["ID", "Qty"], rows)
    }

    fn options(dir: &TempDir) -> RunnerOptions {
        RunnerOptions {
            batch_size: 1000,
            commit_every: 100,
            error_log_dir: dir.path().to_path_buf(),
        }
    }

    async fn connected(mut store: MemoryStore) -> MemoryStore {
        store.connect().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_runs_all_rows() {
        let dir = TempDir::new().unwrap();
        let mut src = connected(source(25)).await;
        let mut dst = connected(MemoryStore::new()).await;

        let mut runner = MigrationRunner::new(&mut src, &mut dst, options(&dir));
        let report = runner.run(&job(FIELDS)).await;
        assert_eq!(runner.state(), RunnerState::Done);

        assert_eq!(report.status, JobStatus::Done);
        assert_eq!(report.rows_inserted, 25);
        assert_eq!(report.batches.len(), 3);
        assert!(report.journal.is_none());
        assert_eq!(dst.column("items", "qty")[3], SqlValue::I64(8));
    }

    #[tokio::test]
    async fn test_empty_source_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut src = connected(source(0)).await;
        let mut dst = connected(MemoryStore::new()).await;

        let report = MigrationRunner::new(&mut src, &mut dst, options(&dir))
            .run(&job(FIELDS))
            .await;
        assert_eq!(report.status, JobStatus::Skipped);
        assert_eq!(dst.commits(), 0);
    }

    #[tokio::test]
    async fn test_nothing_transformed_aborts_without_inserts() {
        let dir = TempDir::new().unwrap();
        let mut src = connected(source(5)).await;
        let mut dst = connected(MemoryStore::new()).await;

        let fields = "- {source_field: ID, target_field: id, select: true}";
        let mut runner = MigrationRunner::new(&mut src, &mut dst, options(&dir));
        let report = runner.run(&job(fields)).await;
        assert_eq!(runner.state(), RunnerState::Aborted);
        assert_eq!(report.status, JobStatus::Aborted);
        assert_eq!(report.rows_inserted, 0);
        assert_eq!(report.rows_failed, 0);
        assert!(dst.queries().is_empty());
        assert!(src.queries().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_rows_are_journaled() {
        let dir = TempDir::new().unwrap();
        let mut src = connected(source(12)).await;
        let mut dst = connected(MemoryStore::new().reject_when(|req| {
            (req.get("id") == Some(&SqlValue::I64(4))).then(|| "check constraint".to_string())
        }))
        .await;

        let report = MigrationRunner::new(&mut src, &mut dst, options(&dir))
            .run(&job(FIELDS))
            .await;
        assert_eq!(report.status, JobStatus::Done);
        assert_eq!(report.rows_inserted, 11);
        assert_eq!(report.rows_failed, 1);
        assert!(report.batches.iter().all(BatchStats::is_conserved));

        let path = report.journal.expect("journal written");
        let contents = ErrorJournal::read(&path).unwrap();
        assert_eq!(contents.columns, vec!["ID", "Qty"]);
        assert_eq!(contents.records.len(), 1);
        assert_eq!(contents.records[0].source_values[0], SqlValue::Text("4".into()));
        assert!(contents.records[0].error_message.contains("check constraint"));
        assert_eq!(contents.target_columns, vec!["id", "qty"]);
        assert_eq!(
            contents.records[0].target_values,
            vec![SqlValue::Text("4".into()), SqlValue::Text("8".into())]
        );
    }

    #[tokio::test]
    async fn test_not_null_note_in_message() {
        let dir = TempDir::new().unwrap();
        let mut src = connected(MemoryStore::new().with_table(
            "dbo.Items",
            &["ID", "Qty"],
            vec![vec![SqlValue::Text("abc".into()), SqlValue::I64(1)]],
        ))
        .await;
        let mut dst = connected(
            MemoryStore::new()
                .with_table("items", &["id", "qty"], Vec::new())
                .with_not_null("items", &["id"]),
        )
        .await;

        let report = MigrationRunner::new(&mut src, &mut dst, options(&dir))
            .run(&job(FIELDS))
            .await;
        assert_eq!(report.rows_failed, 1);
        let contents = ErrorJournal::read(report.journal.as_ref().unwrap()).unwrap();
        assert!(contents.records[0]
            .error_message
            .contains("NULL in NOT NULL field: id"));
    }

    #[tokio::test]
    async fn test_count_overstated_drains() {
        let dir = TempDir::new().unwrap();
        let mut src = connected(source(15).with_phantom_rows("dbo.Items", 5)).await;
        let mut dst = connected(MemoryStore::new()).await;

        let mut runner = MigrationRunner::new(&mut src, &mut dst, options(&dir));
        let report = runner.run(&job(FIELDS)).await;
        assert_eq!(runner.state(), RunnerState::Drained);
        assert_eq!(report.status, JobStatus::Drained);
        assert_eq!(report.total_rows, 20);
        assert_eq!(report.rows_inserted, 15);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_after_committed_batches() {
        let dir = TempDir::new().unwrap();
        let mut src = connected(source(30).fail_fetch_at(20)).await;
        let mut dst = connected(MemoryStore::new()).await;

        let report = MigrationRunner::new(&mut src, &mut dst, options(&dir))
            .run(&job(FIELDS))
            .await;
        assert_eq!(report.status, JobStatus::Aborted);
        assert!(report.error.as_deref().unwrap_or("").contains("connection reset"));
        // two batches were committed before the failure
        assert_eq!(dst.rows("items").len(), 20);
    }

    #[tokio::test]
    async fn test_failed_commit_aborts_instead_of_journaling() {
        let dir = TempDir::new().unwrap();
        let mut src = connected(source(150)).await;
        let mut dst = connected(MemoryStore::new().fail_commit_at(1)).await;

        let mut job = job(FIELDS);
        job.batch_size = Some(200);
        let mut runner = MigrationRunner::new(&mut src, &mut dst, options(&dir));
        let report = runner.run(&job).await;

        assert_eq!(runner.state(), RunnerState::Aborted);
        assert_eq!(report.status, JobStatus::Aborted);
        assert!(report.error.as_deref().unwrap_or("").contains("commit of 100 pending row(s)"));
        // nothing was reported as inserted or journaled for the lost rows
        assert_eq!(report.rows_inserted, 0);
        assert_eq!(report.rows_failed, 0);
        assert!(report.journal.is_none());
        assert!(dst.rows("items").is_empty());
        assert_eq!(dst.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_state_follows_transitions() {
        let dir = TempDir::new().unwrap();
        let mut src = connected(source(3)).await;
        let mut dst = connected(MemoryStore::new()).await;

        let mut state = RunnerState::Init;
        transition(&mut state, RunnerState::Counting);
        assert_eq!(state, RunnerState::Counting);

        let mut runner = MigrationRunner::new(&mut src, &mut dst, options(&dir));
        assert_eq!(runner.state(), RunnerState::Init);
        runner.run(&job(FIELDS)).await;
        assert_eq!(runner.state(), RunnerState::Done);
    }
}
