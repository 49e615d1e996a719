//! Offset paging over a job's source.

use tracing::debug;

use crate::core::traits::StoreConnector;
use crate::core::value::{Batch, SqlValue};
use crate::error::{MigrateError, Result};
use crate::mapping::MigrationJob;

/// Reads a job's source in bounded, ordered pages.
///
/// Pages are fetched lazily with the offset bound as parameter 1 and the
/// page size as parameter 2. An empty page ends the sequence.
pub struct BatchPager<'a> {
    source: &'a mut dyn StoreConnector,
    count_sql: String,
    select_sql: String,
    batch_size: usize,
    offset: u64,
    number: usize,
    exhausted: bool,
}

impl<'a> BatchPager<'a> {
    /// Page `fields` of a job's source, `batch_size` rows at a time.
    ///
    /// Rows are ordered by the job's `order_by`, or by every selected field.
    pub fn new(
        source: &'a mut dyn StoreConnector,
        job: &MigrationJob,
        fields: &[String],
        batch_size: usize,
    ) -> Self {
        let dialect = source.dialect();
        let from = job.from_clause(dialect);
        let order_by = job.paging_order(fields);
        if let Some(warning) = job.ordering_warning() {
            debug!("{}: {}", job.name, warning);
        }
        let count_sql = dialect.count_query(&from);
        let select_sql = dialect.paged_select(fields, &from, &order_by);
        Self {
            source,
            count_sql,
            select_sql,
            batch_size: batch_size.max(1),
            offset: 0,
            number: 0,
            exhausted: false,
        }
    }

    /// Start paging at `offset` instead of the first row.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Offset of the next page.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The paged SELECT statement.
    pub fn select_sql(&self) -> &str {
        &self.select_sql
    }

    /// Total rows in the source.
    pub async fn count(&mut self) -> Result<u64> {
        debug!("Counting rows: {}", self.count_sql);
        let rows = self.source.fetch_all(&self.count_sql, &[]).await?;
        match rows.first().and_then(|r| r.first()) {
            Some(SqlValue::I64(n)) if *n >= 0 => Ok(*n as u64),
            Some(SqlValue::Decimal(d)) => d
                .to_string()
                .parse()
                .map_err(|_| MigrateError::Config(format!("row count is not an integer: {}", d))),
            other => Err(MigrateError::Config(format!(
                "unexpected row count result: {:?}",
                other
            ))),
        }
    }

    /// Fetch the next page, or `None` once a page comes back empty.
    pub async fn next_page(&mut self) -> Result<Option<Batch>> {
        if self.exhausted {
            return Ok(None);
        }

        let params = [
            SqlValue::I64(self.offset as i64),
            SqlValue::I64(self.batch_size as i64),
        ];
        debug!("Fetching page at offset {}", self.offset);
        let rows = self.source.fetch_all(&self.select_sql, &params).await?;
        if rows.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        self.number += 1;
        let batch = Batch::new(rows, self.offset, self.number);
        self.offset += batch.len() as u64;
        Ok(Some(batch))
    }
}
