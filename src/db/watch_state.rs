//! Watcher state persistence: intervals, idle counters and seen item sets.

use crate::error::DatabaseError;
use crate::types::WatchState;
use crate::{Error, Result};
use sqlx::FromRow;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use super::{Database, from_timestamp};

#[derive(Debug, FromRow)]
struct WatchStateRow {
    source_id: String,
    current_poll_interval_secs: i64,
    consecutive_idle_polls: i64,
    last_poll_at: Option<i64>,
    last_activity_at: Option<i64>,
    initialized: i32,
    last_item_count: Option<i64>,
}

impl Database {
    /// Load every persisted watch state, including seen item sets
    pub async fn load_watch_states(&self) -> Result<Vec<WatchState>> {
        let rows = sqlx::query_as::<_, WatchStateRow>(
            r#"
            SELECT source_id, current_poll_interval_secs, consecutive_idle_polls,
                   last_poll_at, last_activity_at, initialized, last_item_count
            FROM watch_state
            ORDER BY source_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load watch state: {}",
                e
            )))
        })?;

        let seen: Vec<(String, String)> =
            sqlx::query_as("SELECT source_id, item_id FROM seen_items")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to load seen items: {}",
                        e
                    )))
                })?;

        let mut seen_by_source: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (source_id, item_id) in seen {
            seen_by_source.entry(source_id).or_default().insert(item_id);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let last_seen_item_ids = seen_by_source.remove(&row.source_id).unwrap_or_default();
                WatchState {
                    last_seen_item_ids,
                    current_poll_interval: Duration::from_secs(
                        row.current_poll_interval_secs.max(0) as u64,
                    ),
                    consecutive_idle_polls: row.consecutive_idle_polls.clamp(0, u32::MAX as i64)
                        as u32,
                    last_poll_at: row.last_poll_at.map(from_timestamp),
                    last_activity_at: row.last_activity_at.map(from_timestamp),
                    initialized: row.initialized != 0,
                    last_item_count: row.last_item_count.map(|c| c.max(0) as u64),
                    source_id: row.source_id,
                }
            })
            .collect())
    }

    /// Persist a watch state, replacing its seen item set
    pub async fn save_watch_state(&self, state: &WatchState) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(Error::Sqlx)?;

        sqlx::query(
            r#"
            INSERT INTO watch_state (
                source_id, current_poll_interval_secs, consecutive_idle_polls,
                last_poll_at, last_activity_at, initialized, last_item_count, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                current_poll_interval_secs = excluded.current_poll_interval_secs,
                consecutive_idle_polls = excluded.consecutive_idle_polls,
                last_poll_at = excluded.last_poll_at,
                last_activity_at = excluded.last_activity_at,
                initialized = excluded.initialized,
                last_item_count = excluded.last_item_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.source_id)
        .bind(state.current_poll_interval.as_secs() as i64)
        .bind(state.consecutive_idle_polls as i64)
        .bind(state.last_poll_at.map(|t| t.timestamp()))
        .bind(state.last_activity_at.map(|t| t.timestamp()))
        .bind(state.initialized as i32)
        .bind(state.last_item_count.map(|c| c as i64))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save watch state: {}",
                e
            )))
        })?;

        sqlx::query("DELETE FROM seen_items WHERE source_id = ?")
            .bind(&state.source_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Sqlx)?;

        for item_id in &state.last_seen_item_ids {
            sqlx::query("INSERT INTO seen_items (source_id, item_id, seen_at) VALUES (?, ?, ?)")
                .bind(&state.source_id)
                .bind(item_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(Error::Sqlx)?;
        }

        tx.commit().await.map_err(Error::Sqlx)?;
        Ok(())
    }
}
