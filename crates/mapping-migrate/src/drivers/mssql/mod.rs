//! Microsoft SQL Server driver.
//!
//! - [`MssqlDialect`]: SQL syntax strategy for MSSQL
//! - [`MssqlConnector`]: single-connection store connector over Tiberius

mod connector;
mod dialect;

pub use connector::MssqlConnector;
pub use dialect::MssqlDialect;
