//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Mapping file could not be read or is inconsistent.
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// A table job could not be set up from its field mappings.
    #[error("Setup failed for table {table}: {message}")]
    Setup { table: String, message: String },

    /// The target rejected a single statement. Row-scoped.
    #[error("Row rejected: {0}")]
    Rejected(String),

    /// The server rolled back the open transaction, taking uncommitted rows with it.
    #[error("Transaction lost: {0}")]
    TransactionLost(String),

    /// Connection could not be established or is not open.
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// Error journal could not be read or written.
    #[error("Journal error: {0}")]
    Journal(String),

    /// SQL Server driver error
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV journal encoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Exit code for configuration and mapping errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connection failures.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for job setup failures.
pub const EXIT_SETUP_ERROR: u8 = 3;
/// Exit code for failures while moving rows.
pub const EXIT_TRANSFER_ERROR: u8 = 4;
/// Exit code for filesystem errors.
pub const EXIT_IO_ERROR: u8 = 7;

impl MigrateError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Setup error
    pub fn setup(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Setup {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Whether the error only concerns the statement that raised it.
    ///
    /// Row-scoped errors are journaled and the job moves on to the next row.
    /// Anything else (lost connection, doomed transaction, local I/O) aborts
    /// the table job.
    pub fn is_row_scoped(&self) -> bool {
        match self {
            MigrateError::Rejected(_) => true,
            MigrateError::Mssql(tiberius::error::Error::Server(_)) => true,
            MigrateError::Postgres(e) => e.as_db_error().is_some(),
            _ => false,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::Mapping(_)
            | MigrateError::Yaml(_)
            | MigrateError::Json(_) => EXIT_CONFIG_ERROR,
            MigrateError::Connection { .. }
            | MigrateError::Mssql(_)
            | MigrateError::Postgres(_) => EXIT_CONNECTION_ERROR,
            MigrateError::Setup { .. } => EXIT_SETUP_ERROR,
            MigrateError::Rejected(_) | MigrateError::TransactionLost(_) => EXIT_TRANSFER_ERROR,
            MigrateError::Journal(_) | MigrateError::Io(_) | MigrateError::Csv(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_is_row_scoped() {
        assert!(MigrateError::Rejected("duplicate key".into()).is_row_scoped());
    }

    #[test]
    fn test_infrastructure_errors_are_not_row_scoped() {
        assert!(!MigrateError::connection("refused", "fetching page").is_row_scoped());
        assert!(!MigrateError::TransactionLost("doomed".into()).is_row_scoped());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(!MigrateError::Io(io).is_row_scoped());
        let io = tiberius::error::Error::Io {
            kind: std::io::ErrorKind::ConnectionReset,
            message: "reset".into(),
        };
        assert!(!MigrateError::Mssql(io).is_row_scoped());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(MigrateError::setup("t", "x").exit_code(), EXIT_SETUP_ERROR);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(MigrateError::Io(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = MigrateError::setup("dbo.Orders", "no insertable fields");
        let detailed = err.format_detailed();
        assert!(detailed.contains("dbo.Orders"));
        assert!(detailed.contains("no insertable fields"));
    }
}
