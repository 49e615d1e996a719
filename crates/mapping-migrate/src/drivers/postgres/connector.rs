//! PostgreSQL store connector.
//!
//! Parameters are rendered into the statement as escaped literals instead of
//! being bound with declared types. Untyped literals are resolved against the
//! target column by the server, so textual values produced by coercion
//! (`"2023-01-15"`, `"42"`) land in date or integer columns the same way they
//! would through a loosely typed driver.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::core::traits::{Dialect, StoreConnector};
use crate::core::value::{RowRecord, SqlValue};
use crate::drivers::common::{make_tls_connect, SslMode};
use crate::error::{MigrateError, Result};

use super::PostgresDialect;

/// Savepoint taken before every statement.
const ROW_SAVEPOINT: &str = "mm_row";

/// PostgreSQL connector.
pub struct PgConnector {
    config: StoreConfig,
    client: Option<Client>,
    dialect: PostgresDialect,
}

impl PgConnector {
    /// Create a connector. No connection is made until [`StoreConnector::connect`].
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            client: None,
            dialect: PostgresDialect::new(),
        }
    }

    fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.config.host)
            .port(self.config.port())
            .dbname(&self.config.database)
            .user(&self.config.user)
            .password(&self.config.password)
            .application_name("mapping-migrate");
        pg
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| MigrateError::connection("not connected", self.config.describe()))
    }
}

#[async_trait]
impl StoreConnector for PgConnector {
    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let ssl_mode = SslMode::parse(&self.config.ssl_mode)?;
        let pg = self.pg_config();
        let context = format!("connecting to {}", self.config.describe());

        // The connection object drives the socket and must be polled on its own task.
        let client = match make_tls_connect(ssl_mode)? {
            Some(tls) => {
                let (client, connection) = pg
                    .connect(tls)
                    .await
                    .map_err(|e| MigrateError::connection(e, context.clone()))?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection closed with error: {}", e);
                    }
                });
                client
            }
            None => {
                let (client, connection) = pg
                    .connect(NoTls)
                    .await
                    .map_err(|e| MigrateError::connection(e, context.clone()))?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection closed with error: {}", e);
                    }
                });
                client
            }
        };

        client.batch_execute("BEGIN").await?;
        self.client = Some(client);
        debug!("Connected to {}", self.config.describe());
        Ok(())
    }

    async fn fetch_all(&mut self, query: &str, params: &[SqlValue]) -> Result<Vec<RowRecord>> {
        let sql = bind_literals(query, params);
        debug!("postgres fetch: {}", sql);
        let rows = self.client()?.query(sql.as_str(), &[]).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn execute_query(&mut self, query: &str, params: &[SqlValue]) -> Result<u64> {
        let sql = bind_literals(query, params);
        let client = self.client()?;
        client
            .batch_execute(&format!("SAVEPOINT {}", ROW_SAVEPOINT))
            .await?;

        match client.execute(sql.as_str(), &[]).await {
            Ok(affected) => {
                client
                    .batch_execute(&format!("RELEASE SAVEPOINT {}", ROW_SAVEPOINT))
                    .await?;
                Ok(affected)
            }
            Err(e) => {
                if e.as_db_error().is_some() {
                    client
                        .batch_execute(&format!("ROLLBACK TO SAVEPOINT {}", ROW_SAVEPOINT))
                        .await?;
                }
                Err(e.into())
            }
        }
    }

    async fn commit(&mut self) -> Result<()> {
        self.client()?.batch_execute("COMMIT; BEGIN").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.client()?.batch_execute("ROLLBACK; BEGIN").await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.batch_execute("ROLLBACK").await {
                warn!("Failed to discard open transaction on close: {}", e);
            }
        }
        Ok(())
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

/// Escape a string for use in a single-quoted literal.
fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

/// Convert SqlValue to an untyped SQL literal.
fn sql_value_to_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        SqlValue::I64(n) => n.to_string(),
        SqlValue::F64(f) if f.is_finite() => format!("{:?}", f),
        SqlValue::F64(f) => format!("'{}'", f),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::Text(s) => format!("'{}'", escape_sql_string(s)),
        SqlValue::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
            format!("'\\x{}'", hex)
        }
        SqlValue::Uuid(u) => format!("'{}'", u),
        SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        SqlValue::Time(t) => format!("'{}'", t.format("%H:%M:%S%.f")),
        SqlValue::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        SqlValue::DateTimeOffset(dt) => format!("'{}'", dt.to_rfc3339()),
    }
}

/// Substitute `$n` placeholders outside quoted text with literals.
fn bind_literals(query: &str, params: &[SqlValue]) -> String {
    let mut out = String::with_capacity(query.len() + params.len() * 8);
    let mut chars = query.chars().peekable();
    let mut in_string = false;
    let mut in_ident = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_ident => {
                in_string = !in_string;
                out.push(c);
            }
            '"' if !in_string => {
                in_ident = !in_ident;
                out.push(c);
            }
            '$' if !in_string && !in_ident => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    digits.push(*d);
                    chars.next();
                }
                match digits.parse::<usize>().ok().and_then(|i| i.checked_sub(1)) {
                    Some(idx) if idx < params.len() => out.push_str(&sql_value_to_literal(&params[idx])),
                    _ => {
                        out.push('$');
                        out.push_str(&digits);
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Convert one result row to a record using the column types.
fn row_to_record(row: &Row) -> Result<RowRecord> {
    let mut record = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool),
            Type::INT2 => row
                .try_get::<_, Option<i16>>(idx)?
                .map(|v| SqlValue::I64(v as i64)),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(idx)?
                .map(|v| SqlValue::I64(v as i64)),
            Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::I64),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(idx)?
                .map(|v| SqlValue::F64(v as f64)),
            Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::F64),
            Type::NUMERIC => row.try_get::<_, Option<Decimal>>(idx)?.map(SqlValue::Decimal),
            Type::UUID => row.try_get::<_, Option<Uuid>>(idx)?.map(SqlValue::Uuid),
            Type::DATE => row.try_get::<_, Option<NaiveDate>>(idx)?.map(SqlValue::Date),
            Type::TIME => row.try_get::<_, Option<NaiveTime>>(idx)?.map(SqlValue::Time),
            Type::TIMESTAMP => row
                .try_get::<_, Option<NaiveDateTime>>(idx)?
                .map(SqlValue::DateTime),
            Type::TIMESTAMPTZ => row
                .try_get::<_, Option<DateTime<FixedOffset>>>(idx)?
                .map(SqlValue::DateTimeOffset),
            Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(SqlValue::Bytes),
            _ => row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text),
        };
        record.push(value.unwrap_or(SqlValue::Null));
    }
    Ok(record)
}
