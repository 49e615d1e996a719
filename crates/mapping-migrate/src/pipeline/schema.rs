//! Ordered per-job schema resolved from field mappings.
//!
//! [`JobSchema::resolve`] runs once before paging. It fixes the select list,
//! the insert list and, for every insert field, where its value comes from.
//! Every row of the job (and every replayed journal record) is built from it.

use std::collections::HashSet;

use serde::Serialize;

use crate::coerce::{self, ConversionRule};
use crate::core::value::{RowRecord, SqlValue};
use crate::defaults::{DefaultSpec, DefaultValueResolver};
use crate::error::{MigrateError, Result};
use crate::mapping::{FieldMapping, MigrationJob};

/// Where one insert field's value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSource {
    /// Resolved from the field's default on every row.
    Merge(Option<DefaultSpec>),
    /// Read from the selected row at `position`, converted by `rule` when set.
    Column {
        position: usize,
        source_field: String,
        rule: Option<ConversionRule>,
    },
    /// No selected source feeds this field; it is inserted as NULL.
    Unmapped,
}

/// One insert field.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetField {
    pub name: String,
    pub not_null: bool,
    pub source: FieldSource,
}

/// Select list and insert plan of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSchema {
    /// Selected source fields, in select order. Rows are aligned to this.
    pub select_fields: Vec<String>,
    /// Insert fields, in insert order.
    pub targets: Vec<TargetField>,
}

/// Dry-run view of a resolved schema.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaSummary {
    pub select_fields: Vec<String>,
    pub insert_fields: Vec<String>,
    pub merge_fields: Vec<String>,
    pub unmapped_fields: Vec<String>,
}

impl JobSchema {
    /// Resolve the schema of a job.
    ///
    /// Fails with a setup error when nothing is selected, nothing is inserted
    /// or an insert field is declared twice.
    pub fn resolve(job: &MigrationJob) -> Result<Self> {
        job.validate()?;
        let fields = &job.fields;

        let mut select_fields: Vec<String> = Vec::new();
        for field in fields.iter().filter(|f| f.select) {
            let source = field.source().ok_or_else(|| {
                MigrateError::setup(
                    &job.name,
                    format!("selected field '{}' has no source_field", field.target_field),
                )
            })?;
            if !select_fields.iter().any(|s| s == source) {
                select_fields.push(source.to_string());
            }
        }
        if select_fields.is_empty() {
            return Err(MigrateError::setup(&job.name, "no fields are selected"));
        }

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for field in fields.iter().filter(|f| f.transform) {
            if !seen.insert(field.target_field.as_str()) {
                return Err(MigrateError::setup(
                    &job.name,
                    format!("target field '{}' is inserted twice", field.target_field),
                ));
            }
            targets.push(TargetField {
                name: field.target_field.clone(),
                not_null: field.not_null,
                source: field_source(field, fields, &select_fields),
            });
        }
        if targets.is_empty() {
            return Err(MigrateError::setup(&job.name, "no fields are transformed"));
        }

        Ok(Self {
            select_fields,
            targets,
        })
    }

    /// Insert column names, in insert order.
    pub fn insert_fields(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.name.clone()).collect()
    }

    /// Build the insert values for one selected row.
    pub fn build_row(&self, raw: &RowRecord, resolver: &DefaultValueResolver) -> Vec<SqlValue> {
        self.targets
            .iter()
            .map(|target| match &target.source {
                FieldSource::Merge(spec) => resolver.resolve(&target.name, spec.as_ref()),
                FieldSource::Column { position, rule, .. } => {
                    let value = raw.get(*position).cloned().unwrap_or(SqlValue::Null);
                    match rule {
                        Some(rule) => coerce::convert(&value, rule),
                        None => value,
                    }
                }
                FieldSource::Unmapped => SqlValue::Null,
            })
            .collect()
    }

    /// Realign values recorded under `columns` to this schema's select order.
    ///
    /// Selected fields missing from `columns` read as NULL.
    pub fn align_row(&self, columns: &[String], values: &[SqlValue]) -> RowRecord {
        self.select_fields
            .iter()
            .map(|field| {
                columns
                    .iter()
                    .position(|c| c == field)
                    .and_then(|i| values.get(i))
                    .cloned()
                    .unwrap_or(SqlValue::Null)
            })
            .collect()
    }

    /// NOT NULL insert fields that ended up NULL in `values`.
    pub fn null_violations(&self, values: &[SqlValue]) -> Vec<&str> {
        self.targets
            .iter()
            .zip(values)
            .filter(|(target, value)| target.not_null && value.is_null())
            .map(|(target, _)| target.name.as_str())
            .collect()
    }

    /// Summary for dry runs.
    pub fn summary(&self) -> SchemaSummary {
        let names = |pred: fn(&FieldSource) -> bool| -> Vec<String> {
            self.targets
                .iter()
                .filter(|t| pred(&t.source))
                .map(|t| t.name.clone())
                .collect()
        };
        SchemaSummary {
            select_fields: self.select_fields.clone(),
            insert_fields: self.insert_fields(),
            merge_fields: names(|s| matches!(s, FieldSource::Merge(_))),
            unmapped_fields: names(|s| matches!(s, FieldSource::Unmapped)),
        }
    }
}

/// Decide where an insert field's value comes from.
///
/// The selected mapping with the same target field names the source column.
/// Its conversion rule is the field's own when the sources agree, otherwise
/// the rule of a transformed mapping reading that source.
fn field_source(field: &FieldMapping, fields: &[FieldMapping], select_fields: &[String]) -> FieldSource {
    if field.merge {
        return FieldSource::Merge(field.default.clone());
    }

    let selected = fields
        .iter()
        .filter(|g| g.select && g.target_field == field.target_field)
        .find_map(|g| g.source());
    let Some(source) = selected else {
        return FieldSource::Unmapped;
    };
    let Some(position) = select_fields.iter().position(|s| s == source) else {
        return FieldSource::Unmapped;
    };

    let rule = if field.source() == Some(source) {
        Some(field.conversion_rule())
    } else {
        fields
            .iter()
            .find(|g| g.transform && g.source() == Some(source))
            .map(FieldMapping::conversion_rule)
    };

    FieldSource::Column {
        position,
        source_field: source.to_string(),
        rule,
    }
}
