//! # mapping-migrate
//!
//! Mapping-driven batch migration between relational stores.
//!
//! Rows are copied from a source store to a target store under a declarative
//! field mapping:
//!
//! - **Paged extraction** with offset paging over a stable ordering
//! - **Per-field type coercion** tolerant of legacy date and number encodings
//! - **Row-scoped failure isolation**: a rejected row never aborts its job
//! - **Error journals**: rejected rows are written to CSV with the error
//! - **Recovery replay** of a journal into the target, with residual journals
//!
//! SQL Server and PostgreSQL are supported as either side.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mapping_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config)?;
//!     let result = orchestrator.run(None).await?;
//!     println!("Inserted {} rows", result.rows_inserted);
//!     Ok(())
//! }
//! ```

pub mod coerce;
pub mod config;
pub mod core;
pub mod defaults;
pub mod drivers;
pub mod error;
pub mod journal;
pub mod mapping;
pub mod orchestrator;
pub mod pipeline;
pub mod recovery;

// Re-exports for convenient access
pub use coerce::{convert, ConversionRule, DataType};
pub use config::{Config, MigrationConfig, StoreConfig, StoreType};
pub use core::{Batch, Dialect, RowRecord, SqlValue, StoreConnector};
pub use defaults::{Clock, DefaultSpec, DefaultValue, DefaultValueResolver, FixedClock, SystemClock};
pub use drivers::MemoryStore;
pub use error::{MigrateError, Result};
pub use journal::{list_journals, ErrorJournal, ErrorRecord};
pub use mapping::{FieldMapping, MappingProvider, MigrationJob, MigrationType, YamlMappingProvider};
pub use orchestrator::{HealthCheckResult, MigrationPlan, MigrationResult, Orchestrator};
pub use pipeline::{BatchPager, BatchStats, JobReport, JobSchema, JobStatus, MigrationRunner, RunnerOptions};
pub use recovery::{RecoveryReplayer, ReplayReport};
