//! Migration orchestrator - run-level workflow coordinator.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{Config, StoreConfig};
use crate::core::traits::StoreConnector;
use crate::defaults::DefaultValueResolver;
use crate::drivers::{connector_for, dialect_for};
use crate::error::{MigrateError, Result};
use crate::journal::list_journals_for;
use crate::mapping::{MappingProvider, MigrationJob, MigrationType, YamlMappingProvider};
use crate::pipeline::{JobReport, JobSchema, JobStatus, MigrationRunner, RunnerOptions, SchemaSummary};
use crate::recovery::{RecoveryReplayer, ReplayReport};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    mappings: Box<dyn MappingProvider + Send + Sync>,
    resolver: DefaultValueResolver,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// `completed`, `completed_with_errors` (rows journaled) or `failed` (a job aborted).
    pub status: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    pub jobs_total: usize,
    pub jobs_success: usize,
    pub jobs_failed: usize,
    pub jobs_skipped: usize,

    pub rows_inserted: u64,
    pub rows_failed: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: i64,

    pub failed_jobs: Vec<String>,
    pub skipped_jobs: Vec<String>,

    /// Per-job reports, in run order.
    pub jobs: Vec<JobReport>,
}

impl MigrationResult {
    fn from_reports(run_id: String, started_at: DateTime<Utc>, jobs: Vec<JobReport>) -> Self {
        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let failed_jobs: Vec<String> = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Aborted)
            .map(|j| j.job.clone())
            .collect();
        let skipped_jobs: Vec<String> = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Skipped)
            .map(|j| j.job.clone())
            .collect();
        let rows_inserted: u64 = jobs.iter().map(|j| j.rows_inserted).sum();
        let rows_failed: u64 = jobs.iter().map(|j| j.rows_failed).sum();

        let rows_per_second = if duration > 0.0 {
            (rows_inserted as f64 / duration) as i64
        } else {
            0
        };

        let status = if !failed_jobs.is_empty() {
            "failed"
        } else if rows_failed > 0 {
            "completed_with_errors"
        } else {
            "completed"
        };

        Self {
            run_id,
            status: status.to_string(),
            started_at,
            completed_at,
            duration_seconds: duration,
            jobs_total: jobs.len(),
            jobs_success: jobs.len() - failed_jobs.len() - skipped_jobs.len(),
            jobs_failed: failed_jobs.len(),
            jobs_skipped: skipped_jobs.len(),
            rows_inserted,
            rows_failed,
            rows_per_second,
            failed_jobs,
            skipped_jobs,
            jobs,
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Dry-run plan of one job.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedJob {
    pub name: String,
    pub source_table: String,
    pub target_table: String,
    pub migration_type: MigrationType,
    pub batch_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select_sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaSummary>,
    /// Why the job would be skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    /// Something that may make the job fail at run time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Dry-run plan of a run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationPlan {
    pub jobs: Vec<PlannedJob>,
}

impl MigrationPlan {
    /// Jobs that would abort at setup.
    pub fn problems(&self) -> impl Iterator<Item = &PlannedJob> {
        self.jobs.iter().filter(|j| j.problem.is_some())
    }
}

/// Connectivity of both stores.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
}

impl Orchestrator {
    /// Create an orchestrator reading jobs from the configured mapping file.
    pub fn new(config: Config) -> Result<Self> {
        let provider = YamlMappingProvider::load(&config.migration.mapping_file)?;
        Ok(Self::with_mappings(config, provider))
    }

    /// Create an orchestrator over an explicit mapping provider.
    pub fn with_mappings<P>(config: Config, mappings: P) -> Self
    where
        P: MappingProvider + Send + Sync + 'static,
    {
        Self {
            config,
            mappings: Box::new(mappings),
            resolver: DefaultValueResolver::default(),
        }
    }

    /// Use `resolver` for merge-field defaults.
    pub fn with_resolver(mut self, resolver: DefaultValueResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn runner_options(&self) -> RunnerOptions {
        RunnerOptions::from(&self.config.migration)
    }

    /// Enabled jobs, optionally narrowed to one job name or table.
    ///
    /// A fan-out entry's name selects every job it expands into.
    pub fn jobs(&self, selection: Option<&str>) -> Result<Vec<MigrationJob>> {
        let jobs = self.mappings.get_migration_jobs()?;
        let Some(selection) = selection else {
            return Ok(jobs);
        };

        let fan_out_prefix = format!("{}:", selection);
        let selected: Vec<MigrationJob> = jobs
            .into_iter()
            .filter(|job| {
                job.name == selection
                    || job.name.starts_with(&fan_out_prefix)
                    || job.source_table == selection
                    || job.target_table == selection
            })
            .collect();
        if selected.is_empty() {
            return Err(MigrateError::Mapping(format!(
                "no enabled job matches '{}'",
                selection
            )));
        }
        Ok(selected)
    }

    fn job(&self, job_id: &str) -> Result<MigrationJob> {
        self.mappings
            .find_job(job_id)?
            .ok_or_else(|| MigrateError::Mapping(format!("no enabled job matches '{}'", job_id)))
    }

    /// Run the selected jobs against the configured stores.
    ///
    /// Every job gets its own target connection. A job that fails never
    /// stops the run; it is reported in the result.
    pub async fn run(&self, selection: Option<&str>) -> Result<MigrationResult> {
        let jobs = self.jobs(selection)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!("Starting migration run: {} ({} job(s))", run_id, jobs.len());

        let mut source = open(&self.config.source, "source").await?;
        let mut reports = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let report = match open(&self.config.target, "target").await {
                Ok(mut target) => {
                    let report = self.run_job(source.as_mut(), target.as_mut(), job).await;
                    close(target.as_mut(), "target").await;
                    report
                }
                Err(e) => {
                    error!("Job {} aborted: {}", job.name, e);
                    let mut report = JobReport::new(job);
                    report.abort(e.to_string());
                    report
                }
            };
            reports.push(report);
        }
        close(source.as_mut(), "source").await;

        Ok(self.finish(run_id, started_at, reports))
    }

    /// Run the selected jobs against already-connected stores.
    pub async fn run_with(
        &self,
        source: &mut dyn StoreConnector,
        target: &mut dyn StoreConnector,
        selection: Option<&str>,
    ) -> Result<MigrationResult> {
        let jobs = self.jobs(selection)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!("Starting migration run: {} ({} job(s))", run_id, jobs.len());

        let mut reports = Vec::with_capacity(jobs.len());
        for job in &jobs {
            reports.push(self.run_job(&mut *source, &mut *target, job).await);
        }
        Ok(self.finish(run_id, started_at, reports))
    }

    async fn run_job(
        &self,
        source: &mut dyn StoreConnector,
        target: &mut dyn StoreConnector,
        job: &MigrationJob,
    ) -> JobReport {
        MigrationRunner::new(source, target, self.runner_options())
            .with_resolver(self.resolver.clone())
            .run(job)
            .await
    }

    fn finish(&self, run_id: String, started_at: DateTime<Utc>, reports: Vec<JobReport>) -> MigrationResult {
        let result = MigrationResult::from_reports(run_id, started_at, reports);
        info!(
            "Migration {}: {} job(s), {} row(s) inserted, {} journaled in {:.1}s ({} rows/s)",
            result.status,
            result.jobs_total,
            result.rows_inserted,
            result.rows_failed,
            result.duration_seconds,
            result.rows_per_second
        );
        if !result.failed_jobs.is_empty() {
            warn!("Failed jobs: {}", result.failed_jobs.join(", "));
        }
        result
    }

    /// Resolve every selected job without touching either store.
    pub fn plan(&self, selection: Option<&str>) -> Result<MigrationPlan> {
        let source_dialect = dialect_for(self.config.source.r#type);
        let target_dialect = dialect_for(self.config.target.r#type);
        let jobs = self.jobs(selection)?;

        let planned = jobs
            .iter()
            .map(|job| {
                let batch_size = job.effective_batch_size(self.config.migration.batch_size);
                let mut planned = PlannedJob {
                    name: job.name.clone(),
                    source_table: job.source_table.clone(),
                    target_table: job.target_table.clone(),
                    migration_type: job.migration_type,
                    batch_size,
                    select_sql: None,
                    insert_sql: None,
                    schema: None,
                    problem: None,
                    warning: None,
                };
                match JobSchema::resolve(job) {
                    Ok(schema) => {
                        let order_by = job.paging_order(&schema.select_fields);
                        planned.warning = job.ordering_warning();
                        planned.select_sql = Some(source_dialect.paged_select(
                            &schema.select_fields,
                            &job.from_clause(source_dialect.as_ref()),
                            &order_by,
                        ));
                        planned.insert_sql = Some(
                            target_dialect.insert_query(&job.target_table, &schema.insert_fields()),
                        );
                        planned.schema = Some(schema.summary());
                    }
                    Err(e) => planned.problem = Some(e.to_string()),
                }
                planned
            })
            .collect();

        Ok(MigrationPlan { jobs: planned })
    }

    /// Replay one journal of a job against the configured target.
    pub async fn recover(&self, job_id: &str, journal: &Path) -> Result<ReplayReport> {
        let mut target = open(&self.config.target, "target").await?;
        let outcome = self.recover_with(target.as_mut(), job_id, journal).await;
        close(target.as_mut(), "target").await;
        outcome
    }

    /// Replay one journal of a job against an already-connected target.
    pub async fn recover_with(
        &self,
        target: &mut dyn StoreConnector,
        job_id: &str,
        journal: &Path,
    ) -> Result<ReplayReport> {
        let job = self.job(job_id)?;
        let options = self.runner_options();
        RecoveryReplayer::new(target, options.commit_every, options.error_log_dir)
            .with_resolver(self.resolver.clone())
            .replay(journal, &job)
            .await
    }

    /// Journals of a job, newest first. Residual journals are included.
    pub fn journals(&self, job_id: &str) -> Result<Vec<PathBuf>> {
        let job = self.job(job_id)?;
        let run_key = job.journal_key();
        let residual_key = job.residual_key();
        list_journals_for(
            &self.config.migration.error_log_dir,
            &[run_key.as_str(), residual_key.as_str()],
        )
    }

    /// Connect to both stores and run a trivial query on each.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let (source_connected, source_latency_ms, source_error) =
            check_store(&self.config.source, "source").await;
        let (target_connected, target_latency_ms, target_error) =
            check_store(&self.config.target, "target").await;

        Ok(HealthCheckResult {
            healthy: source_connected && target_connected,
            source_connected,
            source_latency_ms,
            source_error,
            target_connected,
            target_latency_ms,
            target_error,
        })
    }
}

async fn open(config: &StoreConfig, side: &str) -> Result<Box<dyn StoreConnector>> {
    let mut connector = connector_for(config);
    connector.connect().await.map_err(|e| match e {
        MigrateError::Connection { .. } => e,
        other => MigrateError::connection(other, format!("connecting to {} {}", side, config.describe())),
    })?;
    info!("Connected to {} {}", side, config.describe());
    Ok(connector)
}

async fn close(connector: &mut dyn StoreConnector, side: &str) {
    if let Err(e) = connector.close().await {
        warn!("Closing {} connection failed: {}", side, e);
    }
}

async fn check_store(config: &StoreConfig, side: &str) -> (bool, u64, Option<String>) {
    let started = Instant::now();
    let outcome = async {
        let mut connector = open(config, side).await?;
        connector.fetch_all("SELECT 1", &[]).await?;
        connector.close().await
    }
    .await;
    let latency = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(()) => (true, latency, None),
        Err(e) => (false, latency, Some(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::SqlValue;
    use crate::drivers::MemoryStore;
    use tempfile::TempDir;

    const MAPPINGS: &str = r#"
jobs:
  - name: customers
    source_table: dbo.Customer
    target_table: customer
    fields:
      - {source_field: CustID, target_field: id, data_type: int, select: true, transform: true}
      - {source_field: Name, target_field: name, data_type: nvarchar(20), select: true, transform: true}
  - name: broken
    source_table: dbo.Customer
    target_table: broken
    fields:
      - {source_field: CustID, target_field: id, select: true}
  - name: split
    source_table: dbo.Customer
    migration_type: one_to_many
    fields:
      - {source_field: CustID, target_field: id, target_table: ids, select: true, transform: true}
      - {source_field: CustID, target_field: id, target_table: names, select: true, transform: true}
      - {source_field: Name, target_field: name, target_table: names, select: true, transform: true}
  - name: empty
    source_table: dbo.Empty
    target_table: empty
    fields:
      - {source_field: A, target_field: a, select: true, transform: true}
"#;

    fn config(dir: &TempDir) -> Config {
        let yaml = format!(
            r#"
source: {{type: mssql, host: old, database: legacy, user: sa}}
target: {{type: postgres, host: new, database: app, user: app}}
migration:
  batch_size: 2
  error_log_dir: {}
"#,
            dir.path().display()
        );
        Config::from_yaml(&yaml).unwrap()
    }

    fn orchestrator(dir: &TempDir) -> Orchestrator {
        let provider = YamlMappingProvider::from_yaml(MAPPINGS).unwrap();
        Orchestrator::with_mappings(config(dir), provider)
    }

    fn source() -> MemoryStore {
        MemoryStore::new()
            .with_table(
                "dbo.Customer",
                &["CustID", "Name"],
                vec![
                    vec![SqlValue::I64(1), SqlValue::from("Ann")],
                    vec![SqlValue::I64(2), SqlValue::from("Bo")],
                    vec![SqlValue::I64(3), SqlValue::from("Cy")],
                ],
            )
            .with_table("dbo.Empty", &["A"], Vec::new())
    }

    #[tokio::test]
    async fn test_run_continues_past_failed_jobs() {
        let dir = TempDir::new().unwrap();
        let mut src = source();
        let mut dst = MemoryStore::new();
        src.connect().await.unwrap();
        dst.connect().await.unwrap();

        let result = orchestrator(&dir).run_with(&mut src, &mut dst, None).await.unwrap();
        assert_eq!(result.jobs_total, 5);
        assert_eq!(result.failed_jobs, vec!["broken"]);
        assert_eq!(result.skipped_jobs, vec!["empty"]);
        assert_eq!(result.jobs_success, 3);
        assert_eq!(result.status, "failed");
        assert_eq!(result.rows_inserted, 9);

        assert_eq!(dst.rows("customer").len(), 3);
        assert_eq!(dst.rows("ids").len(), 3);
        assert_eq!(dst.column("names", "name")[2], SqlValue::from("Cy"));
        assert!(result.to_json().unwrap().contains("\"SKIPPED\""));
    }

    #[tokio::test]
    async fn test_invalid_entry_aborts_only_its_job() {
        let dir = TempDir::new().unwrap();
        let provider = YamlMappingProvider::from_yaml(
            r#"
jobs:
  - name: good
    source_table: dbo.Customer
    target_table: customer
    fields:
      - {source_field: CustID, target_field: id, select: true, transform: true}
  - name: joined
    source_table: profile
    target_table: profile
    migration_type: many_to_one
    fields:
      - {source_field: a.CustID, target_field: id, select: true, transform: true}
"#,
        )
        .unwrap();
        let o = Orchestrator::with_mappings(config(&dir), provider);
        let mut src = source();
        let mut dst = MemoryStore::new();
        src.connect().await.unwrap();
        dst.connect().await.unwrap();

        let result = o.run_with(&mut src, &mut dst, None).await.unwrap();
        assert_eq!(result.jobs_total, 2);
        assert_eq!(result.jobs_success, 1);
        assert_eq!(result.failed_jobs, vec!["joined"]);
        assert_eq!(dst.rows("customer").len(), 3);

        let joined = &result.jobs[1];
        assert_eq!(joined.status, JobStatus::Aborted);
        assert!(joined.error.as_deref().unwrap_or("").contains("join clause"));

        let plan = o.plan(None).unwrap();
        let problems: Vec<&str> = plan.problems().map(|j| j.name.as_str()).collect();
        assert_eq!(problems, vec!["joined"]);
    }

    #[tokio::test]
    async fn test_selection() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(&dir);
        assert_eq!(o.jobs(Some("split")).unwrap().len(), 2);
        assert_eq!(o.jobs(Some("customer")).unwrap().len(), 1);
        assert!(matches!(o.jobs(Some("nope")), Err(MigrateError::Mapping(_))));
    }

    #[test]
    fn test_plan_reports_problems() {
        let dir = TempDir::new().unwrap();
        let plan = orchestrator(&dir).plan(None).unwrap();
        let problems: Vec<&str> = plan.problems().map(|j| j.name.as_str()).collect();
        assert_eq!(problems, vec!["broken"]);

        let customers = &plan.jobs[0];
        assert!(customers.warning.as_deref().unwrap_or("").contains("order_by"));
        assert_eq!(
            customers.select_sql.as_deref(),
            Some(
                "SELECT [CustID], [Name] FROM [dbo].[Customer] ORDER BY [CustID], [Name] \
                 OFFSET @P1 ROWS FETCH NEXT @P2 ROWS ONLY"
            )
        );
        assert_eq!(
            customers.insert_sql.as_deref(),
            Some("INSERT INTO \"customer\" (\"id\", \"name\") VALUES ($1, $2)")
        );
    }

    #[tokio::test]
    async fn test_recover_and_list_journals() {
        let dir = TempDir::new().unwrap();
        let o = orchestrator(&dir);
        let mut src = source();
        let mut dst = MemoryStore::new().reject_when(|req| {
            (req.get("name") == Some(&SqlValue::from("Bo"))).then(|| "bad name".to_string())
        });
        src.connect().await.unwrap();
        dst.connect().await.unwrap();

        let result = o.run_with(&mut src, &mut dst, Some("customers")).await.unwrap();
        assert_eq!(result.status, "completed_with_errors");
        let journals = o.journals("customers").unwrap();
        assert_eq!(journals.len(), 1);

        // still rejected, so the replay leaves a residual journal
        let replay = o.recover_with(&mut dst, "customers", &journals[0]).await.unwrap();
        assert_eq!(replay.failed_count, 1);
        assert_eq!(o.journals("customers").unwrap().len(), 2);
    }
}
