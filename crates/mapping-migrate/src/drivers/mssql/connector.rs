//! MSSQL store connector.
//!
//! Holds one Tiberius connection with an explicit transaction that is open
//! from `connect` until `close`. Every statement runs behind a savepoint, so
//! a rejected row is rolled back on its own and earlier uncommitted rows stay
//! pending.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::core::traits::{Dialect, StoreConnector};
use crate::core::value::{RowRecord, SqlValue};
use crate::error::{MigrateError, Result};

use super::MssqlDialect;

/// Savepoint taken before every statement.
const ROW_SAVEPOINT: &str = "mm_row";

type TdsClient = Client<Compat<TcpStream>>;

/// SQL Server connector.
pub struct MssqlConnector {
    config: StoreConfig,
    client: Option<TdsClient>,
    dialect: MssqlDialect,
}

impl MssqlConnector {
    /// Create a connector. No connection is made until [`StoreConnector::connect`].
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            client: None,
            dialect: MssqlDialect::new(),
        }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port());
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }

    fn client(&mut self) -> Result<&mut TdsClient> {
        let target = self.config.describe();
        self.client
            .as_mut()
            .ok_or_else(|| MigrateError::connection("not connected", target))
    }

    /// Run a transaction-control batch outside of sp_executesql.
    async fn batch(&mut self, sql: &str) -> Result<()> {
        let client = self.client()?;
        client.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn xact_state(&mut self) -> Result<i16> {
        let client = self.client()?;
        let row = client
            .simple_query("SELECT XACT_STATE()")
            .await?
            .into_row()
            .await?;
        Ok(row.and_then(|r| r.get::<i16, _>(0)).unwrap_or(0))
    }

    /// Decide what a failed statement did to the open transaction.
    ///
    /// A committable transaction is rolled back to the row savepoint and the
    /// server error is returned as-is (row-scoped). A doomed or vanished
    /// transaction is replaced and reported as [`MigrateError::TransactionLost`].
    async fn isolate_failure(&mut self, err: tiberius::error::Error) -> MigrateError {
        if !matches!(err, tiberius::error::Error::Server(_)) {
            return err.into();
        }

        let state = match self.xact_state().await {
            Ok(state) => state,
            Err(e) => return e,
        };

        if state == 1 {
            let rollback = format!("ROLLBACK TRANSACTION {}", ROW_SAVEPOINT);
            return match self.batch(&rollback).await {
                Ok(()) => MigrateError::Mssql(err),
                Err(e) => e,
            };
        }

        if state == -1 {
            if let Err(e) = self.batch("ROLLBACK TRANSACTION").await {
                warn!("Failed to roll back doomed transaction: {}", e);
            }
        }
        if let Err(e) = self.batch("BEGIN TRANSACTION").await {
            warn!("Failed to reopen transaction: {}", e);
        }
        MigrateError::TransactionLost(format!(
            "server rolled back the open transaction after: {}",
            err
        ))
    }
}

#[async_trait]
impl StoreConnector for MssqlConnector {
    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            MigrateError::connection(e, format!("connecting to {}", self.config.describe()))
        })?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(config, tcp.compat_write()).await?;
        self.client = Some(client);
        self.batch("BEGIN TRANSACTION").await?;
        debug!("Connected to {}", self.config.describe());
        Ok(())
    }

    async fn fetch_all(&mut self, query: &str, params: &[SqlValue]) -> Result<Vec<RowRecord>> {
        debug!("mssql fetch: {}", query);
        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(sql_value_to_sql_param).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|b| b.as_ref()).collect();

        let client = self.client()?;
        let rows = client.query(query, &refs).await?.into_first_result().await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = row
                .into_iter()
                .map(column_to_value)
                .collect::<Result<RowRecord>>()?;
            records.push(record);
        }
        Ok(records)
    }

    async fn execute_query(&mut self, query: &str, params: &[SqlValue]) -> Result<u64> {
        self.batch(&format!("SAVE TRANSACTION {}", ROW_SAVEPOINT))
            .await?;

        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(sql_value_to_sql_param).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|b| b.as_ref()).collect();

        let client = self.client()?;
        let outcome = client.execute(query, &refs).await;
        match outcome {
            Ok(result) => Ok(result.total()),
            Err(e) => Err(self.isolate_failure(e).await),
        }
    }

    async fn commit(&mut self) -> Result<()> {
        self.batch("COMMIT TRANSACTION").await?;
        self.batch("BEGIN TRANSACTION").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.batch("ROLLBACK TRANSACTION").await?;
        self.batch("BEGIN TRANSACTION").await
    }

    async fn close(&mut self) -> Result<()> {
        if self.client.is_none() {
            return Ok(());
        }
        if let Err(e) = self.batch("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await {
            warn!("Failed to discard open transaction on close: {}", e);
        }
        if let Some(client) = self.client.take() {
            client.close().await?;
        }
        Ok(())
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn db_type(&self) -> &str {
        "mssql"
    }
}

/// Convert SqlValue to a boxed Tiberius parameter.
fn sql_value_to_sql_param(value: &SqlValue) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null => Box::new(Option::<String>::None),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::F64(f) => Box::new(*f),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::Text(s) => Box::new(s.clone()),
        SqlValue::Bytes(b) => Box::new(b.clone()),
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::Date(d) => Box::new(*d),
        SqlValue::Time(t) => Box::new(*t),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::DateTimeOffset(dto) => Box::new(*dto),
    }
}

/// Convert one TDS column to SqlValue.
fn column_to_value(data: ColumnData<'static>) -> Result<SqlValue> {
    let value = match &data {
        ColumnData::U8(v) => v.map(|n| SqlValue::I64(n as i64)),
        ColumnData::I16(v) => v.map(|n| SqlValue::I64(n as i64)),
        ColumnData::I32(v) => v.map(|n| SqlValue::I64(n as i64)),
        ColumnData::I64(v) => v.map(SqlValue::I64),
        ColumnData::F32(v) => v.map(|n| SqlValue::F64(n as f64)),
        ColumnData::F64(v) => v.map(SqlValue::F64),
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| SqlValue::Text(s.to_string())),
        ColumnData::Guid(v) => v.map(SqlValue::Uuid),
        ColumnData::Binary(v) => v.as_ref().map(|b| SqlValue::Bytes(b.to_vec())),
        ColumnData::Numeric(_) => Decimal::from_sql(&data)?.map(SqlValue::Decimal),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|x| SqlValue::Text(x.as_ref().clone().into_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)?.map(SqlValue::DateTime)
        }
        ColumnData::Date(_) => NaiveDate::from_sql(&data)?.map(SqlValue::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)?.map(SqlValue::Time),
        ColumnData::DateTimeOffset(_) => {
            DateTime::<FixedOffset>::from_sql(&data)?.map(SqlValue::DateTimeOffset)
        }
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
