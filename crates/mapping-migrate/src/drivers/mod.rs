//! Database driver implementations.
//!
//! - [`mssql`]: Microsoft SQL Server driver
//! - [`postgres`]: PostgreSQL driver
//! - [`memory`]: in-memory store for tests and dry runs
//! - [`common`]: Shared utilities (TLS)
//!
//! Each driver provides a `Dialect` and a `StoreConnector`. The engine picks
//! one per configured store through [`connector_for`].

pub mod common;
pub mod memory;
pub mod mssql;
pub mod postgres;

// Re-export driver types
pub use memory::MemoryStore;
pub use mssql::{MssqlConnector, MssqlDialect};
pub use postgres::{PgConnector, PostgresDialect};

use crate::config::{StoreConfig, StoreType};
use crate::core::traits::{Dialect, StoreConnector};

/// Create an unconnected connector for a configured store.
pub fn connector_for(config: &StoreConfig) -> Box<dyn StoreConnector> {
    match config.r#type {
        StoreType::Mssql => Box::new(MssqlConnector::new(config.clone())),
        StoreType::Postgres => Box::new(PgConnector::new(config.clone())),
    }
}

/// Dialect for a configured store type.
pub fn dialect_for(store_type: StoreType) -> Box<dyn Dialect> {
    match store_type {
        StoreType::Mssql => Box::new(MssqlDialect::new()),
        StoreType::Postgres => Box::new(PostgresDialect::new()),
    }
}
