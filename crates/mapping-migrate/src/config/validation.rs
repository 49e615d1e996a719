//! Configuration validation.

use super::{Config, StoreConfig};
use crate::error::{MigrateError, Result};

fn validate_store(side: &str, store: &StoreConfig) -> Result<()> {
    if store.host.is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", side)));
    }
    if store.database.is_empty() {
        return Err(MigrateError::Config(format!(
            "{}.database is required",
            side
        )));
    }
    if store.user.is_empty() {
        return Err(MigrateError::Config(format!("{}.user is required", side)));
    }
    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_store("source", &config.source)?;
    validate_store("target", &config.target)?;

    // Cannot migrate to the same database
    if config.source.r#type == config.target.r#type
        && config.source.host == config.target.host
        && config.source.port() == config.target.port()
        && config.source.database == config.target.database
    {
        return Err(MigrateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if config.migration.commit_every == 0 {
        return Err(MigrateError::Config(
            "migration.commit_every must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, StoreType};

    fn valid_config() -> Config {
        Config {
            source: StoreConfig {
                r#type: StoreType::Mssql,
                host: "localhost".to_string(),
                port: None,
                database: "legacy".to_string(),
                user: "sa".to_string(),
                password: "password".to_string(),
                encrypt: false,
                trust_server_cert: true,
                ssl_mode: "disable".to_string(),
            },
            target: StoreConfig {
                r#type: StoreType::Mssql,
                host: "localhost".to_string(),
                port: None,
                database: "modern".to_string(),
                user: "sa".to_string(),
                password: "password".to_string(),
                encrypt: false,
                trust_server_cert: true,
                ssl_mode: "disable".to_string(),
            },
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.host = "".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("source.host"));
    }

    #[test]
    fn test_missing_target_user() {
        let mut config = valid_config();
        config.target.user = "".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("target.user"));
    }

    #[test]
    fn test_same_database_rejected() {
        let mut config = valid_config();
        config.target.database = "legacy".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_name_on_different_engine_allowed() {
        let mut config = valid_config();
        config.target.database = "legacy".to_string();
        config.target.r#type = StoreType::Postgres;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_commit_every_rejected() {
        let mut config = valid_config();
        config.migration.commit_every = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_store_config_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.source);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }
}
