//! mapping-migrate CLI - mapping-driven batch migration with error journals.

use clap::{Parser, Subcommand};
use dialoguer::Select;
use mapping_migrate::error::EXIT_TRANSFER_ERROR;
use mapping_migrate::{Config, MigrateError, Orchestrator};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "mapping-migrate")]
#[command(about = "Mapping-driven batch migration with error journaling and replay")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the mapping file named in the configuration
    #[arg(long)]
    mappings: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate every enabled job, or one job
    Run {
        /// Job name, source table or target table
        #[arg(long)]
        job: Option<String>,

        /// Dry run: resolve mappings and show the plan without touching data
        #[arg(long)]
        dry_run: bool,

        /// Override rows per page
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Replay an error journal into the target
    Recover {
        /// Job whose mappings the journal was written with
        #[arg(long)]
        job: String,

        /// Journal file to replay
        #[arg(long, conflicts_with = "latest")]
        journal: Option<PathBuf>,

        /// Replay the job's newest journal
        #[arg(long)]
        latest: bool,
    },

    /// List a job's error journals, newest first
    Journals {
        /// Job name, source table or target table
        #[arg(long)]
        job: String,
    },

    /// Test database connections
    HealthCheck,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);
    if let Some(path) = &cli.mappings {
        config.migration.mapping_file = path.clone();
    }
    if let Commands::Run {
        batch_size: Some(n),
        ..
    } = &cli.command
    {
        config.migration.batch_size = *n;
    }
    config.validate()?;

    match &cli.command {
        Commands::Run { job, dry_run, .. } => {
            let orchestrator = Orchestrator::new(config)?;

            if *dry_run {
                let plan = orchestrator.plan(job.as_deref())?;
                if cli.output_json {
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                } else {
                    println!("Migration plan ({} job(s)):", plan.jobs.len());
                    for planned in &plan.jobs {
                        println!(
                            "\n  {} [{}] {} -> {} (batch {})",
                            planned.name,
                            planned.migration_type,
                            planned.source_table,
                            planned.target_table,
                            planned.batch_size
                        );
                        match (&planned.problem, &planned.select_sql, &planned.insert_sql) {
                            (Some(problem), _, _) => println!("    SKIP: {}", problem),
                            (None, Some(select), Some(insert)) => {
                                println!("    read:  {}", select);
                                println!("    write: {}", insert);
                            }
                            _ => {}
                        }
                        if let Some(warning) = &planned.warning {
                            println!("    WARN: {}", warning);
                        }
                    }
                }
                return Ok(ExitCode::SUCCESS);
            }

            let result = orchestrator.run(job.as_deref()).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nMigration {}!", result.status);
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!(
                    "  Jobs: {}/{} ({} skipped)",
                    result.jobs_success, result.jobs_total, result.jobs_skipped
                );
                println!("  Rows inserted: {}", result.rows_inserted);
                println!("  Rows journaled: {}", result.rows_failed);
                println!("  Throughput: {} rows/sec", result.rows_per_second);
                for report in result.jobs.iter().filter(|r| r.journal.is_some()) {
                    if let Some(path) = &report.journal {
                        println!("  Journal ({}): {}", report.job, path.display());
                    }
                }
                if !result.failed_jobs.is_empty() {
                    println!("  Failed jobs: {:?}", result.failed_jobs);
                }
            }

            if result.jobs_failed > 0 {
                return Ok(ExitCode::from(EXIT_TRANSFER_ERROR));
            }
        }

        Commands::Recover {
            job,
            journal,
            latest,
        } => {
            let orchestrator = Orchestrator::new(config)?;
            let journal = match journal {
                Some(path) => path.clone(),
                None => {
                    let journals = orchestrator.journals(job)?;
                    if journals.is_empty() {
                        return Err(MigrateError::Journal(format!(
                            "no error journals found for job '{}'",
                            job
                        )));
                    }
                    if *latest {
                        journals[0].clone()
                    } else {
                        match choose_journal(&journals)? {
                            Some(path) => path,
                            None => {
                                println!("Recovery cancelled");
                                return Ok(ExitCode::SUCCESS);
                            }
                        }
                    }
                }
            };

            let report = orchestrator.recover(job, &journal).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\nRecovery completed!");
                println!("  Journal: {}", report.journal.display());
                println!("  Records: {}", report.total_records);
                println!("  Inserted: {}", report.success_count);
                println!("  Failed again: {}", report.failed_count);
                if let Some(path) = &report.residual_journal {
                    println!("  Residual journal: {}", path.display());
                }
            }
        }

        Commands::Journals { job } => {
            let orchestrator = Orchestrator::new(config)?;
            let journals = orchestrator.journals(job)?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&journals)?);
            } else if journals.is_empty() {
                println!("No error journals for {}", job);
            } else {
                for (i, path) in journals.iter().enumerate() {
                    println!("{}. {}", i + 1, path.display());
                }
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config)?;
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let source = &orchestrator.config().source;
                let target = &orchestrator.config().target;
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms)",
                    source.r#type,
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target ({}): {} ({}ms)",
                    target.r#type,
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::connection(
                    "Health check failed",
                    "connecting to source and target",
                ));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Ask which journal to replay. `None` when the user backs out.
fn choose_journal(journals: &[PathBuf]) -> Result<Option<PathBuf>, MigrateError> {
    let labels: Vec<String> = journals.iter().map(|p| journal_label(p)).collect();
    let choice = Select::new()
        .with_prompt("Journal to replay")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(|e| MigrateError::Config(format!("journal selection failed: {}", e)))?;
    Ok(choice.map(|i| journals[i].clone()))
}

fn journal_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
