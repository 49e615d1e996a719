//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax strategy for PostgreSQL
//! - [`PgConnector`]: single-connection store connector over tokio-postgres

mod connector;
mod dialect;

pub use connector::PgConnector;
pub use dialect::PostgresDialect;
