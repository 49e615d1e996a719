//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Store rows are read from.
    pub source: StoreConfig,

    /// Store rows are written to.
    pub target: StoreConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Supported store engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// Microsoft SQL Server.
    Mssql,
    /// PostgreSQL.
    Postgres,
}

impl StoreType {
    /// Port used when the configuration does not set one.
    pub fn default_port(self) -> u16 {
        match self {
            StoreType::Mssql => 1433,
            StoreType::Postgres => 5432,
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreType::Mssql => f.write_str("mssql"),
            StoreType::Postgres => f.write_str("postgres"),
        }
    }
}

/// Connection settings for one store.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store engine.
    pub r#type: StoreType,

    /// Database host.
    pub host: String,

    /// Database port (default depends on `type`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Encrypt the SQL Server connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust the SQL Server certificate without validation (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// PostgreSQL SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

impl StoreConfig {
    /// Effective port.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.r#type.default_port())
    }
}

// Custom Debug implementation to prevent password leakage in logs.
impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port())
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Mapping definition file, relative to the working directory.
    #[serde(default = "default_mapping_file")]
    pub mapping_file: PathBuf,

    /// Rows per page when a job does not set its own.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Successful inserts between commits.
    #[serde(default = "default_commit_every")]
    pub commit_every: usize,

    /// Directory holding error journals.
    #[serde(default = "default_error_log_dir")]
    pub error_log_dir: PathBuf,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            mapping_file: default_mapping_file(),
            batch_size: default_batch_size(),
            commit_every: default_commit_every(),
            error_log_dir: default_error_log_dir(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_require() -> String {
    "require".to_string()
}

fn default_mapping_file() -> PathBuf {
    PathBuf::from("mappings.yaml")
}

fn default_batch_size() -> usize {
    1000
}

fn default_commit_every() -> usize {
    100
}

fn default_error_log_dir() -> PathBuf {
    PathBuf::from("error_logs")
}
