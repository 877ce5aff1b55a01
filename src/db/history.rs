//! Run and item history: append-only, queryable by source and date.

use crate::error::DatabaseError;
use crate::types::{HistoryEntry, ItemOutcome, RunId, RunSummary, RunTrigger};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};

use super::{Database, HistoryFilter, HistoryItemRow, RunRow};

impl Database {
    /// Record a finished run and every resolved item in one transaction
    pub async fn insert_run(&self, summary: &RunSummary) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Sqlx)?;

        sqlx::query(
            r#"
            INSERT INTO run_history (
                run_id, trigger, started_at, finished_at, success_count,
                failure_count, cancelled, interrupted, last_error
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                finished_at = excluded.finished_at,
                success_count = excluded.success_count,
                failure_count = excluded.failure_count,
                cancelled = excluded.cancelled,
                last_error = excluded.last_error
            "#,
        )
        .bind(summary.run_id.get())
        .bind(summary.trigger.as_str())
        .bind(summary.started_at.timestamp())
        .bind(summary.finished_at.timestamp())
        .bind(summary.successes.len() as i64)
        .bind(summary.failures.len() as i64)
        .bind(summary.cancelled as i32)
        .bind(&summary.last_error)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert run {}: {}",
                summary.run_id, e
            )))
        })?;

        let recorded_at = summary.finished_at.timestamp();
        let items = summary
            .successes
            .iter()
            .map(|o| (o, true))
            .chain(summary.failures.iter().map(|o| (o, false)));

        for (outcome, success) in items {
            insert_item(&mut tx, summary.run_id, outcome, success, recorded_at).await?;
        }

        tx.commit().await.map_err(Error::Sqlx)?;
        Ok(())
    }

    /// Record a run that never finished (process died mid-run)
    pub async fn insert_interrupted_run(
        &self,
        run_id: RunId,
        trigger: RunTrigger,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO run_history (
                run_id, trigger, started_at, finished_at, interrupted, last_error
            )
            VALUES (?, ?, ?, ?, 1, 'run interrupted by restart')
            ON CONFLICT(run_id) DO UPDATE SET interrupted = 1
            "#,
        )
        .bind(run_id.get())
        .bind(trigger.as_str())
        .bind(started_at.timestamp())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(())
    }

    /// Query item history with pagination (most recent first)
    pub async fn query_history(
        &self,
        filter: &HistoryFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT id, run_id, source_id, item_id, title, success, error_kind,
                   message, output_path, recorded_at
            FROM history_items
            "#,
        );
        push_filter(&mut query, filter);
        query
            .push(" ORDER BY recorded_at DESC, id DESC LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(offset as i64);

        let rows = query
            .build_query_as::<HistoryItemRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(HistoryEntry::from).collect())
    }

    /// Count item history rows matching the filter
    pub async fn count_history(&self, filter: &HistoryFilter) -> Result<i64> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM history_items");
        push_filter(&mut query, filter);

        let count = query
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(count)
    }

    /// Whether an item was ever downloaded successfully for a source
    pub async fn is_item_downloaded(&self, source_id: &str, item_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM history_items
            WHERE source_id = ? AND item_id = ? AND success = 1
            "#,
        )
        .bind(source_id)
        .bind(item_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(count > 0)
    }

    /// Most recent runs first
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunRow>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT run_id, trigger, started_at, finished_at, success_count,
                   failure_count, cancelled, interrupted, last_error
            FROM run_history
            ORDER BY run_id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows)
    }

    /// Highest run ID ever recorded (0 when empty)
    pub async fn max_run_id(&self) -> Result<i64> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(run_id) FROM run_history")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)?;
        Ok(max.unwrap_or(0))
    }

    /// Delete item history recorded before the given instant
    ///
    /// Returns the number of rows deleted.
    pub async fn delete_history_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM history_items WHERE recorded_at < ?")
            .bind(before.timestamp())
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected())
    }
}

async fn insert_item(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    run_id: RunId,
    outcome: &ItemOutcome,
    success: bool,
    recorded_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO history_items (
            run_id, source_id, item_id, title, success, error_kind,
            message, output_path, recorded_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run_id.get())
    .bind(&outcome.source_id)
    .bind(&outcome.item_id)
    .bind(&outcome.title)
    .bind(success as i32)
    .bind(outcome.error_kind.map(|k| k.as_str()))
    .bind(&outcome.message)
    .bind(
        outcome
            .output_path
            .as_ref()
            .and_then(|p| p.to_str().map(String::from)),
    )
    .bind(recorded_at)
    .execute(&mut **tx)
    .await
    .map_err(Error::Sqlx)?;

    Ok(())
}

fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &HistoryFilter) {
    let mut separator = " WHERE ";
    if let Some(source_id) = &filter.source_id {
        query.push(separator).push("source_id = ").push_bind(source_id.clone());
        separator = " AND ";
    }
    if let Some(since) = filter.since {
        query.push(separator).push("recorded_at >= ").push_bind(since.timestamp());
        separator = " AND ";
    }
    if let Some(until) = filter.until {
        query.push(separator).push("recorded_at < ").push_bind(until.timestamp());
        separator = " AND ";
    }
    if let Some(success) = filter.success {
        query.push(separator).push("success = ").push_bind(success as i32);
    }
}
