//! Field mappings and migration jobs.
//!
//! A [`MappingProvider`] supplies the table jobs of a run and the ordered
//! field mappings of each. [`YamlMappingProvider`] reads them from a mapping
//! file.

mod yaml;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coerce::ConversionRule;
use crate::core::traits::Dialect;
use crate::defaults::DefaultSpec;
use crate::error::{MigrateError, Result};

pub use yaml::{JobEntry, MappingFile, YamlMappingProvider};

/// How source tables relate to target tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationType {
    /// One source table into one target table.
    #[default]
    OneToOne,
    /// One source table fanned out into several target tables.
    OneToMany,
    /// A join of several source tables into one target table.
    ManyToOne,
}

impl fmt::Display for MigrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationType::OneToOne => "one_to_one",
            MigrationType::OneToMany => "one_to_many",
            MigrationType::ManyToOne => "many_to_one",
        };
        f.write_str(s)
    }
}

/// One row of a table's mapping definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Source column (may be alias-qualified, `a.col`). Absent for pure defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_field: Option<String>,

    /// Target column.
    pub target_field: String,

    /// Declared target type tag (`nvarchar(20)`, `int`, `date`, ...).
    #[serde(default)]
    pub data_type: String,

    /// Target column rejects NULL.
    #[serde(default)]
    pub not_null: bool,

    /// Default value descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultSpec>,

    /// Read the source field.
    #[serde(default)]
    pub select: bool,

    /// Write the target field.
    #[serde(default)]
    pub transform: bool,

    /// Fill the target field from `default` instead of the source.
    #[serde(default)]
    pub merge: bool,

    /// Target table of this field (fan-out jobs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_table: Option<String>,
}

impl FieldMapping {
    /// Source field name, treating blank as absent.
    pub fn source(&self) -> Option<&str> {
        self.source_field
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Conversion rule for this field's source value.
    pub fn conversion_rule(&self) -> ConversionRule {
        ConversionRule::new(
            &self.data_type,
            self.not_null,
            self.default.as_ref().and_then(DefaultSpec::literal),
        )
    }
}

/// One table job: everything needed to move one source into one target.
///
/// Built once before paging starts and never changed while the job runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationJob {
    /// Job name, unique within a mapping file.
    pub name: String,

    /// Source table, or a label for the join when `join` is set.
    pub source_table: String,

    /// Target table.
    pub target_table: String,

    /// How the job was declared.
    pub migration_type: MigrationType,

    /// Field mappings in target insert order.
    pub fields: Vec<FieldMapping>,

    /// Rows per page; the run default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Paging order; every selected column when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<String>,

    /// Verbatim FROM clause for join sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<String>,
}

impl MigrationJob {
    /// FROM clause for this job's reads.
    pub fn from_clause(&self, dialect: &dyn Dialect) -> String {
        match &self.join {
            Some(join) => join.trim().to_string(),
            None => dialect.qualify(&self.source_table),
        }
    }

    /// Name used for this job's error journals.
    ///
    /// Fan-out jobs share a source table, so their key also names the target.
    pub fn journal_key(&self) -> String {
        let raw = match self.migration_type {
            MigrationType::OneToMany => format!("{}_{}", self.source_table, self.target_table),
            _ => self.source_table.clone(),
        };
        sanitize_file_component(&raw)
    }

    /// Name used for residual journals written by recovery.
    pub fn residual_key(&self) -> String {
        sanitize_file_component(&self.target_table)
    }

    /// Effective page size.
    pub fn effective_batch_size(&self, run_default: usize) -> usize {
        self.batch_size.filter(|n| *n > 0).unwrap_or(run_default)
    }

    /// Columns pages are ordered by: `order_by`, else every selected field.
    pub fn paging_order(&self, select_fields: &[String]) -> Vec<String> {
        if self.order_by.is_empty() {
            select_fields.to_vec()
        } else {
            self.order_by.clone()
        }
    }

    /// Set when paging falls back to ordering by every selected field.
    ///
    /// SQL Server refuses ORDER BY on `text`, `ntext`, `image` and `xml`
    /// columns, so sources holding them need an explicit `order_by`.
    pub fn ordering_warning(&self) -> Option<String> {
        self.order_by.is_empty().then(|| {
            "no order_by: pages are ordered by every selected column; \
             set order_by if any of them is text, ntext, image or xml"
                .to_string()
        })
    }

    /// Check the job can run at all.
    ///
    /// Failures are setup errors of this job only; other jobs of the same
    /// mapping file are unaffected.
    pub fn validate(&self) -> Result<()> {
        if self.target_table.trim().is_empty() {
            let message = match self.migration_type {
                MigrationType::OneToMany => {
                    let fields: Vec<&str> =
                        self.fields.iter().map(|f| f.target_field.as_str()).collect();
                    format!("field(s) {} have no target_table", fields.join(", "))
                }
                _ => "no target_table".to_string(),
            };
            return Err(MigrateError::setup(&self.name, message));
        }
        let has_join = self.join.as_deref().is_some_and(|j| !j.trim().is_empty());
        if self.migration_type == MigrationType::ManyToOne && !has_join {
            return Err(MigrateError::setup(
                &self.name,
                "many_to_one job needs a join clause",
            ));
        }
        Ok(())
    }
}

/// Replace characters that are unsafe in file names.
pub fn sanitize_file_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Source of jobs and their field mappings.
pub trait MappingProvider {
    /// Ordered field mappings of one job (by name or source/target table).
    fn get_field_mappings(&self, table_id: &str) -> Result<Vec<FieldMapping>>;

    /// Every enabled job, in declaration order.
    fn get_migration_jobs(&self) -> Result<Vec<MigrationJob>>;

    /// Look up one enabled job by name or source/target table.
    fn find_job(&self, table_id: &str) -> Result<Option<MigrationJob>> {
        let jobs = self.get_migration_jobs()?;
        let by_name = jobs.iter().position(|job| job.name == table_id);
        let index = by_name.or_else(|| {
            jobs.iter()
                .position(|job| job.source_table == table_id || job.target_table == table_id)
        });
        Ok(index.map(|i| jobs[i].clone()))
    }
}
