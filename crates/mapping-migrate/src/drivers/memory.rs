//! In-memory store connector.
//!
//! Speaks the MSSQL dialect and understands exactly the statements the
//! engine produces: row counts, offset-paged selects over a single table,
//! single-row inserts and `SELECT 1`. Inserts stay pending until `commit`.
//! Tests use it as both source and target, with hooks to reject rows, fail
//! fetches and misreport counts.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::core::traits::{Dialect, StoreConnector};
use crate::core::value::{RowRecord, SqlValue};
use crate::drivers::mssql::MssqlDialect;
use crate::error::{MigrateError, Result};

const COUNT_PREFIX: &str = "SELECT CAST(COUNT(*) AS BIGINT) FROM ";

/// A single-row insert offered to a rejection rule.
#[derive(Debug)]
pub struct InsertRequest<'a> {
    /// Unquoted target table name.
    pub table: &'a str,
    /// Inserted column names.
    pub columns: &'a [String],
    /// Inserted values, aligned to `columns`.
    pub values: &'a [SqlValue],
}

impl InsertRequest<'_> {
    /// Value bound to a column, if the insert names it.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }
}

type RejectRule = Box<dyn Fn(&InsertRequest<'_>) -> Option<String> + Send + Sync>;

#[derive(Debug, Default, Clone)]
struct MemoryTable {
    columns: Vec<String>,
    not_null: Vec<String>,
    rows: Vec<RowRecord>,
}

/// In-memory store.
pub struct MemoryStore {
    dialect: MssqlDialect,
    connected: bool,
    tables: HashMap<String, MemoryTable>,
    pending: Vec<(String, RowRecord)>,
    reject_rule: Option<RejectRule>,
    fail_fetch_at: Option<u64>,
    fail_commit_at: Option<usize>,
    phantom_rows: HashMap<String, u64>,
    commits: usize,
    rollbacks: usize,
    queries: Vec<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            dialect: MssqlDialect::new(),
            connected: false,
            tables: HashMap::new(),
            pending: Vec::new(),
            reject_rule: None,
            fail_fetch_at: None,
            fail_commit_at: None,
            phantom_rows: HashMap::new(),
            commits: 0,
            rollbacks: 0,
            queries: Vec::new(),
        }
    }

    /// Add a table with committed rows.
    pub fn with_table(mut self, name: &str, columns: &[&str], rows: Vec<RowRecord>) -> Self {
        self.tables.insert(
            name.to_string(),
            MemoryTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                not_null: Vec::new(),
                rows,
            },
        );
        self
    }

    /// Declare NOT NULL columns on an existing table.
    pub fn with_not_null(mut self, table: &str, columns: &[&str]) -> Self {
        if let Some(t) = self.tables.get_mut(table) {
            t.not_null = columns.iter().map(|c| c.to_string()).collect();
        }
        self
    }

    /// Reject inserts for which `rule` returns a message.
    pub fn reject_when<F>(mut self, rule: F) -> Self
    where
        F: Fn(&InsertRequest<'_>) -> Option<String> + Send + Sync + 'static,
    {
        self.reject_rule = Some(Box::new(rule));
        self
    }

    /// Fail the paged select that starts at `offset` with a connection error.
    pub fn fail_fetch_at(mut self, offset: u64) -> Self {
        self.fail_fetch_at = Some(offset);
        self
    }

    /// Make the `nth` commit (1-based) roll back its pending rows and fail
    /// the way a deferred constraint does at COMMIT.
    pub fn fail_commit_at(mut self, nth: usize) -> Self {
        self.fail_commit_at = Some(nth);
        self
    }

    /// Report `extra` more rows from COUNT than the table holds.
    pub fn with_phantom_rows(mut self, table: &str, extra: u64) -> Self {
        self.phantom_rows.insert(table.to_string(), extra);
        self
    }

    /// Committed rows of a table.
    pub fn rows(&self, table: &str) -> &[RowRecord] {
        self.tables
            .get(table)
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }

    /// Committed values of one column, in insert order.
    pub fn column(&self, table: &str, column: &str) -> Vec<SqlValue> {
        let Some(t) = self.tables.get(table) else {
            return Vec::new();
        };
        let Some(idx) = t.columns.iter().position(|c| c == column) else {
            return Vec::new();
        };
        t.rows.iter().map(|r| r[idx].clone()).collect()
    }

    /// Number of inserts not yet committed.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of commits issued.
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Number of rollbacks issued.
    pub fn rollbacks(&self) -> usize {
        self.rollbacks
    }

    /// Every statement received, in order.
    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    /// Whether the store is connected.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(MigrateError::connection("not connected", "memory store"))
        }
    }

    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .get(name)
            .ok_or_else(|| MigrateError::Rejected(format!("Invalid object name '{}'", name)))
    }

    fn count(&self, from: &str) -> Result<Vec<RowRecord>> {
        let name = single_table(from)?;
        let table = self.table(&name)?;
        let extra = self.phantom_rows.get(&name).copied().unwrap_or(0);
        let total = table.rows.len() as u64 + extra;
        Ok(vec![vec![SqlValue::I64(total as i64)]])
    }

    fn page(&self, query: &str, params: &[SqlValue]) -> Result<Vec<RowRecord>> {
        let body = &query["SELECT ".len()..];
        let (fields, rest) = body
            .split_once(" FROM ")
            .ok_or_else(|| unsupported(query))?;
        let (from, _) = rest
            .split_once(" ORDER BY ")
            .ok_or_else(|| unsupported(query))?;

        let offset = int_param(params, 0)?;
        let limit = int_param(params, 1)?;
        if self.fail_fetch_at == Some(offset) {
            return Err(MigrateError::connection(
                "connection reset by peer",
                format!("fetching page at offset {}", offset),
            ));
        }

        let name = single_table(from)?;
        let table = self.table(&name)?;
        let positions = parse_ident_list(fields)
            .iter()
            .map(|field| column_position(table, field))
            .collect::<Result<Vec<_>>>()?;

        Ok(table
            .rows
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|row| positions.iter().map(|&i| row[i].clone()).collect())
            .collect())
    }

    fn insert(&mut self, query: &str, params: &[SqlValue]) -> Result<u64> {
        let body = &query["INSERT INTO ".len()..];
        let (table_part, rest) = body.split_once(" (").ok_or_else(|| unsupported(query))?;
        let (cols_part, _) = rest.split_once(") VALUES").ok_or_else(|| unsupported(query))?;

        let name = single_table(table_part)?;
        let columns = parse_ident_list(cols_part);
        if columns.len() != params.len() {
            return Err(MigrateError::Rejected(format!(
                "{} columns but {} values",
                columns.len(),
                params.len()
            )));
        }

        if let Some(rule) = &self.reject_rule {
            let request = InsertRequest {
                table: &name,
                columns: &columns,
                values: params,
            };
            if let Some(message) = rule(&request) {
                return Err(MigrateError::Rejected(message));
            }
        }

        let table = self.tables.entry(name.clone()).or_insert_with(|| MemoryTable {
            columns: columns.clone(),
            ..MemoryTable::default()
        });

        let mut row = vec![SqlValue::Null; table.columns.len()];
        for (column, value) in columns.iter().zip(params) {
            let idx = column_position(table, column)?;
            row[idx] = value.clone();
        }
        for (idx, column) in table.columns.iter().enumerate() {
            if row[idx].is_null() && table.not_null.contains(column) {
                return Err(MigrateError::Rejected(format!(
                    "Cannot insert the value NULL into column '{}'",
                    column
                )));
            }
        }

        self.pending.push((name, row));
        Ok(1)
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn fetch_all(&mut self, query: &str, params: &[SqlValue]) -> Result<Vec<RowRecord>> {
        self.ensure_connected()?;
        self.queries.push(query.to_string());
        if query == "SELECT 1" {
            return Ok(vec![vec![SqlValue::I64(1)]]);
        }
        if let Some(from) = query.strip_prefix(COUNT_PREFIX) {
            return self.count(from);
        }
        if query.starts_with("SELECT ") {
            return self.page(query, params);
        }
        Err(unsupported(query))
    }

    async fn execute_query(&mut self, query: &str, params: &[SqlValue]) -> Result<u64> {
        self.ensure_connected()?;
        self.queries.push(query.to_string());
        if query.starts_with("INSERT INTO ") {
            return self.insert(query, params);
        }
        Err(unsupported(query))
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.commits += 1;
        if self.fail_commit_at == Some(self.commits) {
            let lost = self.pending.len();
            self.pending.clear();
            return Err(MigrateError::Rejected(format!(
                "deferred constraint violated at COMMIT, {} row(s) rolled back",
                lost
            )));
        }
        for (name, row) in self.pending.drain(..) {
            if let Some(table) = self.tables.get_mut(&name) {
                table.rows.push(row);
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.pending.clear();
        self.rollbacks += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.pending.clear();
        self.connected = false;
        Ok(())
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

fn unsupported(query: &str) -> MigrateError {
    MigrateError::Config(format!("memory store cannot run: {}", query))
}

fn int_param(params: &[SqlValue], idx: usize) -> Result<u64> {
    match params.get(idx) {
        Some(SqlValue::I64(n)) if *n >= 0 => Ok(*n as u64),
        other => Err(MigrateError::Config(format!(
            "expected non-negative integer parameter {}, got {:?}",
            idx + 1,
            other
        ))),
    }
}

/// Resolve a field name against a table: exact match, then the unqualified part.
fn column_position(table: &MemoryTable, field: &str) -> Result<usize> {
    let bare = field.rsplit('.').next().unwrap_or(field);
    table
        .columns
        .iter()
        .position(|c| c == field)
        .or_else(|| table.columns.iter().position(|c| c == bare))
        .ok_or_else(|| MigrateError::Rejected(format!("Invalid column name '{}'", field)))
}

fn single_table(from: &str) -> Result<String> {
    let mut names = parse_ident_list(from.trim());
    if names.len() == 1 && from.trim_end().ends_with(']') {
        if let Some(name) = names.pop() {
            return Ok(name);
        }
    }
    Err(MigrateError::Config(format!(
        "memory store only reads single tables, got '{}'",
        from
    )))
}

/// Parse `[a].[b], [c]` into `["a.b", "c"]`.
fn parse_ident_list(s: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    let mut in_bracket = false;

    while let Some(c) = chars.next() {
        if in_bracket {
            if c == ']' {
                if chars.peek() == Some(&']') {
                    current.push(']');
                    chars.next();
                } else {
                    in_bracket = false;
                }
            } else {
                current.push(c);
            }
            continue;
        }
        match c {
            '[' => in_bracket = true,
            '.' => current.push('.'),
            ',' => items.push(std::mem::take(&mut current)),
            c if c.is_whitespace() => {}
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        items.push(current);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new().with_table(
            "dbo.Orders",
            &["id", "name"],
            (1..=5)
                .map(|i| vec![SqlValue::I64(i), SqlValue::Text(format!("order {}", i))])
                .collect(),
        )
    }

    #[test]
    fn test_parse_ident_list() {
        assert_eq!(
            parse_ident_list("[dbo].[Orders], [a]]b]"),
            vec!["dbo.Orders".to_string(), "a]b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_count_and_page() {
        let mut store = store();
        store.connect().await.unwrap();
        let d = MssqlDialect::new();

        let count = d.count_query(&d.qualify("dbo.Orders"));
        let rows = store.fetch_all(&count, &[]).await.unwrap();
        assert_eq!(rows, vec![vec![SqlValue::I64(5)]]);

        let fields = vec!["name".to_string()];
        let sql = d.paged_select(&fields, &d.qualify("dbo.Orders"), &fields);
        let rows = store
            .fetch_all(&sql, &[SqlValue::I64(3), SqlValue::I64(10)])
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![
                vec![SqlValue::Text("order 4".into())],
                vec![SqlValue::Text("order 5".into())]
            ]
        );
    }

    #[tokio::test]
    async fn test_inserts_pending_until_commit() {
        let mut store = MemoryStore::new();
        store.connect().await.unwrap();
        let d = MssqlDialect::new();
        let sql = d.insert_query("dbo.Customers", &["id".to_string()]);

        store.execute_query(&sql, &[SqlValue::I64(1)]).await.unwrap();
        assert_eq!(store.pending_count(), 1);
        assert!(store.rows("dbo.Customers").is_empty());

        store.commit().await.unwrap();
        assert_eq!(store.rows("dbo.Customers").len(), 1);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn test_execute_many_stops_at_rejection() {
        let mut store = MemoryStore::new().reject_when(|req| {
            (req.get("id") == Some(&SqlValue::I64(2))).then(|| "duplicate key".to_string())
        });
        store.connect().await.unwrap();
        let sql = MssqlDialect::new().insert_query("t", &["id".to_string()]);
        let rows: Vec<Vec<SqlValue>> = (1..=3).map(|i| vec![SqlValue::I64(i)]).collect();

        let err = store.execute_many(&sql, &rows).await.unwrap_err();
        assert!(err.is_row_scoped());
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_not_null_rejected() {
        let mut store = MemoryStore::new()
            .with_table("t", &["id", "name"], Vec::new())
            .with_not_null("t", &["name"]);
        store.connect().await.unwrap();
        let sql = MssqlDialect::new().insert_query("t", &["id".to_string()]);
        let err = store.execute_query(&sql, &[SqlValue::I64(1)]).await.unwrap_err();
        assert!(err.to_string().contains("NULL"));
    }

    #[tokio::test]
    async fn test_rollback_discards_pending() {
        let mut store = MemoryStore::new();
        store.connect().await.unwrap();
        let sql = MssqlDialect::new().insert_query("t", &["id".to_string()]);
        store.execute_query(&sql, &[SqlValue::I64(1)]).await.unwrap();
        store.rollback().await.unwrap();
        store.commit().await.unwrap();
        assert!(store.rows("t").is_empty());
        assert_eq!(store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let mut store = store();
        let err = store.fetch_all("SELECT 1", &[]).await.unwrap_err();
        assert!(!err.is_row_scoped());
    }
}
