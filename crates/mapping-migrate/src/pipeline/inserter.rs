//! Single-row inserts with threshold commits.

use tracing::debug;

use crate::core::traits::StoreConnector;
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

/// Inserts rows one at a time into a target table, committing every
/// `commit_every` successful inserts.
///
/// Failed inserts do not count toward the threshold. [`finish`] always
/// issues one trailing commit, even when nothing is pending.
///
/// [`finish`]: RowInserter::finish
pub struct RowInserter<'t> {
    target: &'t mut dyn StoreConnector,
    insert_sql: String,
    commit_every: usize,
    since_commit: usize,
    flushing_commits: usize,
}

impl<'t> RowInserter<'t> {
    /// Prepare inserts of `fields` into `table`.
    pub fn new(
        target: &'t mut dyn StoreConnector,
        table: &str,
        fields: &[String],
        commit_every: usize,
    ) -> Self {
        let insert_sql = target.dialect().insert_query(table, fields);
        Self {
            target,
            insert_sql,
            commit_every: commit_every.max(1),
            since_commit: 0,
            flushing_commits: 0,
        }
    }

    pub fn insert_sql(&self) -> &str {
        &self.insert_sql
    }

    /// Insert one row. A rejected row leaves earlier pending inserts intact.
    ///
    /// A failed threshold commit is never reported as a rejection of this
    /// row; see [`commit`](Self::commit).
    pub async fn insert(&mut self, values: &[SqlValue]) -> Result<()> {
        self.target.execute_query(&self.insert_sql, values).await?;
        self.since_commit += 1;
        if self.since_commit >= self.commit_every {
            self.commit().await?;
        }
        Ok(())
    }

    /// Issue the trailing commit and reset the counters for the next batch.
    ///
    /// Returns the number of commits since the last `finish` that flushed
    /// at least one insert.
    pub async fn finish(&mut self) -> Result<usize> {
        self.commit().await?;
        Ok(std::mem::take(&mut self.flushing_commits))
    }

    /// Discard pending inserts. Returns how many were discarded.
    pub async fn discard(&mut self) -> Result<usize> {
        let pending = std::mem::take(&mut self.since_commit);
        self.target.rollback().await?;
        Ok(pending)
    }

    /// A failed commit takes every pending insert with it, so it surfaces
    /// as [`MigrateError::TransactionLost`] whatever the server said.
    async fn commit(&mut self) -> Result<()> {
        if let Err(e) = self.target.commit().await {
            let pending = std::mem::take(&mut self.since_commit);
            return Err(MigrateError::TransactionLost(format!(
                "commit of {} pending row(s) failed: {}",
                pending, e
            )));
        }
        if self.since_commit > 0 {
            self.flushing_commits += 1;
            debug!("Committed {} row(s)", self.since_commit);
        }
        self.since_commit = 0;
        Ok(())
    }
}
