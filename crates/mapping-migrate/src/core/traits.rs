//! Core traits for store-agnostic migration.
//!
//! - [`StoreConnector`]: one connection/transaction context against a store
//! - [`Dialect`]: SQL syntax strategy for different database engines
//!
//! The engine only ever talks to stores through these two traits, so the
//! runner, pager and replayer are tested against the in-memory store and run
//! unchanged against SQL Server or PostgreSQL.

use async_trait::async_trait;

use crate::error::Result;

use super::value::{RowRecord, SqlValue};

/// SQL syntax strategy for a database engine.
///
/// Statements built here use positional parameters; the connector that owns
/// the dialect binds them.
pub trait Dialect: Send + Sync {
    /// Get the dialect identifier (e.g., "mssql", "postgres").
    fn name(&self) -> &str;

    /// Quote an identifier (table name, column name, etc.).
    ///
    /// - MSSQL: `[identifier]`
    /// - PostgreSQL: `"identifier"`
    fn quote_ident(&self, name: &str) -> String;

    /// Get a parameter placeholder for the given 1-based index.
    ///
    /// - MSSQL: `@P1`, `@P2`, etc.
    /// - PostgreSQL: `$1`, `$2`, etc.
    fn placeholder(&self, index: usize) -> String;

    /// Quote a possibly dot-qualified name (`dbo.Orders`, `a.col`) part by part.
    fn qualify(&self, name: &str) -> String {
        name.split('.')
            .map(|part| self.quote_ident(part.trim()))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Build the row-count query for a FROM clause.
    fn count_query(&self, from: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", from)
    }

    /// Build an offset-paged SELECT.
    ///
    /// The offset is bound as parameter 1 and the page size as parameter 2.
    fn paged_select(&self, fields: &[String], from: &str, order_by: &[String]) -> String;

    /// Build a single-row INSERT with one placeholder per field.
    fn insert_query(&self, table: &str, fields: &[String]) -> String {
        let cols = fields
            .iter()
            .map(|f| self.quote_ident(f))
            .collect::<Vec<_>>()
            .join(", ");
        let params = (1..=fields.len())
            .map(|i| self.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualify(table),
            cols,
            params
        )
    }

    /// Render a select list.
    fn select_list(&self, fields: &[String]) -> String {
        fields
            .iter()
            .map(|f| self.qualify(f))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// One connection to a source or target store.
///
/// A connector owns a single connection and, for targets, the open
/// transaction on it. Writes are not visible to other sessions until
/// [`commit`](StoreConnector::commit).
#[async_trait]
pub trait StoreConnector: Send {
    /// Open the connection. Calling it on an open connector is a no-op.
    async fn connect(&mut self) -> Result<()>;

    /// Run a query and collect every row.
    async fn fetch_all(&mut self, query: &str, params: &[SqlValue]) -> Result<Vec<RowRecord>>;

    /// Run a statement, returning the number of affected rows.
    ///
    /// A statement the server rejects leaves earlier uncommitted work intact.
    async fn execute_query(&mut self, query: &str, params: &[SqlValue]) -> Result<u64>;

    /// Run one statement per parameter row, stopping at the first failure.
    async fn execute_many(&mut self, query: &str, param_rows: &[Vec<SqlValue>]) -> Result<u64> {
        let mut affected = 0;
        for params in param_rows {
            affected += self.execute_query(query, params).await?;
        }
        Ok(affected)
    }

    /// Commit pending work and open a new transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Discard pending work and open a new transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Close the connection. Uncommitted work is discarded.
    async fn close(&mut self) -> Result<()>;

    /// SQL dialect spoken by this store.
    fn dialect(&self) -> &dyn Dialect;

    /// Get the database type identifier (e.g., "mssql", "postgres").
    fn db_type(&self) -> &str;
}
