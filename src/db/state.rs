//! Runtime state tracking: shutdown detection, active run marker, scheduler times.

use crate::error::DatabaseError;
use crate::{Error, Result};
use chrono::{DateTime, Utc};

use super::{ActiveRunMarker, Database, ScheduleTimes};

const CLEAN_SHUTDOWN: &str = "clean_shutdown";
const ACTIVE_RUN: &str = "active_run";
const SCHEDULE_LAST_RUN: &str = "schedule_last_run";
const SCHEDULE_NEXT_RUN: &str = "schedule_next_run";

impl Database {
    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read runtime state '{}': {}",
                    key, e
                )))
            })
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write runtime state '{}': {}",
                key, e
            )))
        })?;

        Ok(())
    }

    async fn clear_state(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM runtime_state WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;
        Ok(())
    }

    /// Check if the last shutdown was unclean
    ///
    /// Returns true if the previous session did not call set_clean_shutdown(),
    /// indicating a crash or forced termination.
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        let value = self.get_state(CLEAN_SHUTDOWN).await?;
        // A brand-new database has no marker and is treated as clean
        Ok(value.is_some_and(|v| v != "true"))
    }

    /// Mark that the application has started
    ///
    /// If shutdown() is not called before the next startup,
    /// was_unclean_shutdown() will return true.
    pub async fn set_clean_start(&self) -> Result<()> {
        self.set_state(CLEAN_SHUTDOWN, "false").await
    }

    /// Mark that the application is shutting down cleanly
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        self.set_state(CLEAN_SHUTDOWN, "true").await
    }

    /// Persist the marker of the run in progress
    pub async fn set_active_run(&self, marker: &ActiveRunMarker) -> Result<()> {
        let json = serde_json::to_string(marker)?;
        self.set_state(ACTIVE_RUN, &json).await
    }

    /// Remove the active run marker
    pub async fn clear_active_run(&self) -> Result<()> {
        self.clear_state(ACTIVE_RUN).await
    }

    /// Read the active run marker, if one was left behind
    pub async fn get_active_run(&self) -> Result<Option<ActiveRunMarker>> {
        match self.get_state(ACTIVE_RUN).await? {
            Some(json) => {
                let marker = serde_json::from_str(&json).map_err(|e| {
                    Error::Database(DatabaseError::CorruptRecord(format!(
                        "active run marker: {}",
                        e
                    )))
                })?;
                Ok(Some(marker))
            }
            None => Ok(None),
        }
    }

    /// Take a stale active run marker and record the run as interrupted
    ///
    /// Called at startup: any marker still present belongs to a process that
    /// died mid-run.
    pub async fn recover_stale_run(&self) -> Result<Option<ActiveRunMarker>> {
        let marker = match self.get_active_run().await {
            Ok(marker) => marker,
            Err(Error::Database(DatabaseError::CorruptRecord(msg))) => {
                tracing::warn!(error = %msg, "Discarding unreadable active run marker");
                self.clear_active_run().await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if let Some(marker) = &marker {
            self.insert_interrupted_run(marker.run_id, marker.trigger, marker.started_at)
                .await?;
            self.clear_active_run().await?;
        }
        Ok(marker)
    }

    /// Persist interval scheduler times
    pub async fn set_schedule_times(&self, times: &ScheduleTimes) -> Result<()> {
        match times.last_run {
            Some(t) => self.set_state(SCHEDULE_LAST_RUN, &t.to_rfc3339()).await?,
            None => self.clear_state(SCHEDULE_LAST_RUN).await?,
        }
        match times.next_run {
            Some(t) => self.set_state(SCHEDULE_NEXT_RUN, &t.to_rfc3339()).await?,
            None => self.clear_state(SCHEDULE_NEXT_RUN).await?,
        }
        Ok(())
    }

    /// Read interval scheduler times
    pub async fn get_schedule_times(&self) -> Result<ScheduleTimes> {
        let parse = |value: Option<String>| {
            value.and_then(|v| {
                DateTime::parse_from_rfc3339(&v)
                    .ok()
                    .map(|t| t.with_timezone(&Utc))
            })
        };
        Ok(ScheduleTimes {
            last_run: parse(self.get_state(SCHEDULE_LAST_RUN).await?),
            next_run: parse(self.get_state(SCHEDULE_NEXT_RUN).await?),
        })
    }
}
