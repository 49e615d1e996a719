//! YAML mapping file provider.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{FieldMapping, MappingProvider, MigrationJob, MigrationType};
use crate::error::{MigrateError, Result};

/// Top-level mapping file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingFile {
    /// Table jobs in run order.
    #[serde(default)]
    pub jobs: Vec<JobEntry>,
}

/// One authored job entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    /// Job name; defaults to the source table.
    #[serde(default)]
    pub name: Option<String>,

    /// Source table, or a label for the join.
    pub source_table: String,

    /// Target table. Fan-out entries name targets per field instead.
    #[serde(default)]
    pub target_table: Option<String>,

    #[serde(default)]
    pub migration_type: MigrationType,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub batch_size: Option<usize>,

    #[serde(default)]
    pub order_by: Vec<String>,

    /// FROM clause used verbatim for `many_to_one` jobs.
    #[serde(default)]
    pub join: Option<String>,

    #[serde(default)]
    pub fields: Vec<FieldMapping>,
}

/// Name suffix of the fan-out job holding fields without a target table.
const UNASSIGNED_TARGET: &str = "unassigned";

fn default_enabled() -> bool {
    true
}

impl JobEntry {
    fn job_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.source_table)
    }

    /// Expand this entry into jobs.
    ///
    /// Never fails: an entry missing its target or join still yields a job,
    /// which [`MigrationJob::validate`] rejects when that job is set up.
    fn expand(&self) -> Vec<MigrationJob> {
        let name = self.job_name();
        match self.migration_type {
            MigrationType::OneToMany => self.expand_fan_out(name),
            MigrationType::OneToOne | MigrationType::ManyToOne => {
                let target = self.target_table.clone().unwrap_or_default();
                vec![self.job(name.to_string(), target, self.fields.clone())]
            }
        }
    }

    /// One job per distinct field `target_table`, in first-seen order.
    ///
    /// Fields without any target are grouped into one job with an empty
    /// target table.
    fn expand_fan_out(&self, name: &str) -> Vec<MigrationJob> {
        let target_of = |field: &FieldMapping| {
            field
                .target_table
                .as_deref()
                .or(self.target_table.as_deref())
                .unwrap_or("")
                .to_string()
        };

        let mut targets: Vec<String> = Vec::new();
        for field in &self.fields {
            let target = target_of(field);
            if !targets.contains(&target) {
                targets.push(target);
            }
        }

        targets
            .into_iter()
            .map(|target| {
                let fields = self
                    .fields
                    .iter()
                    .filter(|f| target_of(*f) == target)
                    .cloned()
                    .collect();
                let job_name = if target.is_empty() {
                    format!("{}:{}", name, UNASSIGNED_TARGET)
                } else {
                    format!("{}:{}", name, target)
                };
                self.job(job_name, target, fields)
            })
            .collect()
    }

    fn job(&self, name: String, target: String, fields: Vec<FieldMapping>) -> MigrationJob {
        MigrationJob {
            name,
            source_table: self.source_table.clone(),
            target_table: target,
            migration_type: self.migration_type,
            fields,
            batch_size: self.batch_size,
            order_by: self.order_by.clone(),
            join: self.join.clone(),
        }
    }
}

/// Mapping provider backed by a YAML file.
#[derive(Debug, Clone)]
pub struct YamlMappingProvider {
    file: MappingFile,
}

impl YamlMappingProvider {
    /// Load and check a mapping file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::Mapping(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!("Loaded mapping file {}", path.display());
        Self::from_yaml(&content)
    }

    /// Parse and check mapping YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: MappingFile = serde_yaml::from_str(yaml)?;
        Self::new(file)
    }

    /// Wrap an already-parsed mapping file.
    pub fn new(file: MappingFile) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in &file.jobs {
            if !seen.insert(entry.job_name()) {
                return Err(MigrateError::Mapping(format!(
                    "duplicate job name '{}'",
                    entry.job_name()
                )));
            }
        }
        Ok(Self { file })
    }

    /// The parsed file.
    pub fn file(&self) -> &MappingFile {
        &self.file
    }
}

impl MappingProvider for YamlMappingProvider {
    fn get_field_mappings(&self, table_id: &str) -> Result<Vec<FieldMapping>> {
        self.find_job(table_id)?
            .map(|job| job.fields)
            .ok_or_else(|| MigrateError::Mapping(format!("no mapping for '{}'", table_id)))
    }

    fn get_migration_jobs(&self) -> Result<Vec<MigrationJob>> {
        Ok(self
            .file
            .jobs
            .iter()
            .filter(|e| e.enabled)
            .flat_map(JobEntry::expand)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPPINGS: &str = r#"
jobs:
  - name: customers
    source_table: dbo.Customer
    target_table: public.customer
    batch_size: 200
    fields:
      - {source_field: CustID, target_field: id, data_type: int, not_null: true, select: true, transform: true}
      - {source_field: Name, target_field: name, data_type: nvarchar(50), select: true, transform: true}
      - {target_field: created_at, data_type: datetime, merge: true, transform: true, default: {type: function, value: now()}}
  - name: legacy_orders
    source_table: dbo.Orders
    target_table: public.orders
    enabled: false
    fields: []
  - name: order_split
    source_table: dbo.OrderFlat
    migration_type: one_to_many
    fields:
      - {source_field: OrderNo, target_field: order_no, target_table: public.order_head, select: true, transform: true}
      - {source_field: OrderNo, target_field: order_no, target_table: public.order_line, select: true, transform: true}
      - {source_field: Sku, target_field: sku, target_table: public.order_line, select: true, transform: true}
  - name: customer_profile
    source_table: customer_profile
    target_table: public.profile
    migration_type: many_to_one
    join: dbo.Customer a JOIN dbo.Address b ON a.CustID = b.CustID
    fields:
      - {source_field: a.CustID, target_field: id, select: true, transform: true}
      - {source_field: b.City, target_field: city, select: true, transform: true}
"#;

    fn provider() -> YamlMappingProvider {
        YamlMappingProvider::from_yaml(MAPPINGS).unwrap()
    }

    #[test]
    fn test_disabled_jobs_are_skipped() {
        let names: Vec<String> = provider()
            .get_migration_jobs()
            .unwrap()
            .into_iter()
            .map(|j| j.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "customers",
                "order_split:public.order_head",
                "order_split:public.order_line",
                "customer_profile"
            ]
        );
    }

    #[test]
    fn test_fan_out_groups_fields_by_target() {
        let jobs = provider().get_migration_jobs().unwrap();
        let line = jobs
            .iter()
            .find(|j| j.target_table == "public.order_line")
            .unwrap();
        assert_eq!(line.migration_type, MigrationType::OneToMany);
        assert_eq!(line.source_table, "dbo.OrderFlat");
        let targets: Vec<&str> = line.fields.iter().map(|f| f.target_field.as_str()).collect();
        assert_eq!(targets, vec!["order_no", "sku"]);
    }

    #[test]
    fn test_lookup_by_name_or_table() {
        let p = provider();
        assert_eq!(p.get_field_mappings("customers").unwrap().len(), 3);
        assert_eq!(p.get_field_mappings("dbo.Customer").unwrap().len(), 3);
        assert_eq!(
            p.find_job("public.profile").unwrap().map(|j| j.name),
            Some("customer_profile".to_string())
        );
        assert!(p.get_field_mappings("legacy_orders").is_err());
    }

    #[test]
    fn test_fan_out_field_without_target_fails_only_its_job() {
        let yaml = r#"
jobs:
  - source_table: dbo.Flat
    migration_type: one_to_many
    fields:
      - {source_field: A, target_field: a, target_table: t_a, select: true, transform: true}
      - {source_field: B, target_field: b, select: true, transform: true}
"#;
        let jobs = YamlMappingProvider::from_yaml(yaml)
            .unwrap()
            .get_migration_jobs()
            .unwrap();
        let names: Vec<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["dbo.Flat:t_a", "dbo.Flat:unassigned"]);
        assert!(jobs[0].validate().is_ok());
        let err = jobs[1].validate().unwrap_err();
        assert!(matches!(err, MigrateError::Setup { .. }));
        assert!(err.to_string().contains("b have no target_table"));
    }

    #[test]
    fn test_many_to_one_without_join_is_listed_but_invalid() {
        let yaml = r#"
jobs:
  - source_table: combined
    target_table: public.t
    migration_type: many_to_one
  - source_table: dbo.T
"#;
        let jobs = YamlMappingProvider::from_yaml(yaml)
            .unwrap()
            .get_migration_jobs()
            .unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].validate().unwrap_err().to_string().contains("join"));
        assert!(jobs[1].validate().unwrap_err().to_string().contains("no target_table"));
    }

    #[test]
    fn test_duplicate_job_names() {
        let yaml = r#"
jobs:
  - {source_table: a, target_table: x}
  - {name: a, source_table: b, target_table: y}
"#;
        assert!(YamlMappingProvider::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_legacy_json_default_cell() {
        let yaml = r#"
jobs:
  - source_table: dbo.T
    target_table: t
    fields:
      - target_field: status
        merge: true
        transform: true
        default: '{"type": "nvarchar", "value": "active"}'
"#;
        let p = YamlMappingProvider::from_yaml(yaml).unwrap();
        let fields = p.get_field_mappings("dbo.T").unwrap();
        assert_eq!(
            fields[0].default.as_ref().and_then(|d| d.literal()),
            Some(crate::core::value::SqlValue::Text("active".into()))
        );
    }
}
