//! Table job pipeline.
//!
//! - [`JobSchema`]: select list and insert plan resolved once per job
//! - [`BatchPager`]: offset-paged reads of the job's source
//! - [`RowInserter`]: single-row inserts with threshold commits
//! - [`MigrationRunner`]: count, page, transform, insert, commit, journal
//!
//! A job's rows flow through these in order. Recovery reuses the schema and
//! the inserter so replayed rows follow the same conversion and commit rules.

mod inserter;
mod job;
mod pager;
mod runner;
mod schema;

pub use inserter::RowInserter;
pub use job::{BatchStats, JobReport, JobStatus};
pub use pager::BatchPager;
pub use runner::{MigrationRunner, RunnerOptions, RunnerState};
pub use schema::{FieldSource, JobSchema, SchemaSummary, TargetField};
