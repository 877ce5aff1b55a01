//! Database layer for playlist-archiver
//!
//! Handles SQLite persistence for watch state, run history and runtime markers.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`watch_state`] — Per-source watcher state and seen item sets
//! - [`history`] — Append-only run and item history
//! - [`state`] — Runtime state (shutdown tracking, active run marker, schedule times)

use crate::types::{ErrorKind, HistoryEntry, RunId, RunTrigger};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod history;
mod migrations;
mod state;
mod watch_state;

/// Filter for history queries
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    /// Only rows for this source
    pub source_id: Option<String>,
    /// Only rows recorded at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Only rows recorded before this instant
    pub until: Option<DateTime<Utc>>,
    /// Only successes (true) or failures (false)
    pub success: Option<bool>,
}

/// History item row (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct HistoryItemRow {
    /// Unique database ID
    pub id: i64,
    /// Run that produced this row
    pub run_id: i64,
    /// Source ID
    pub source_id: String,
    /// Item ID
    pub item_id: String,
    /// Title
    pub title: Option<String>,
    /// 1 = downloaded, 0 = failed
    pub success: i32,
    /// Failure classification string
    pub error_kind: Option<String>,
    /// Diagnostic message
    pub message: Option<String>,
    /// Final file path
    pub output_path: Option<String>,
    /// Unix timestamp when the item was resolved
    pub recorded_at: i64,
}

impl From<HistoryItemRow> for HistoryEntry {
    fn from(row: HistoryItemRow) -> Self {
        HistoryEntry {
            id: row.id,
            run_id: RunId(row.run_id),
            source_id: row.source_id,
            item_id: row.item_id,
            title: row.title,
            success: row.success != 0,
            error_kind: row.error_kind.as_deref().and_then(ErrorKind::parse),
            message: row.message,
            output_path: row.output_path.map(PathBuf::from),
            recorded_at: from_timestamp(row.recorded_at),
        }
    }
}

/// Run summary row from `run_history`
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RunRow {
    /// Run ID
    pub run_id: i64,
    /// Trigger string
    pub trigger: String,
    /// Unix timestamp when the run started
    pub started_at: i64,
    /// Unix timestamp when the run finished
    pub finished_at: Option<i64>,
    /// Number of successful items
    pub success_count: i64,
    /// Number of failed items
    pub failure_count: i64,
    /// 1 if cancelled
    pub cancelled: i32,
    /// 1 if the process died during the run
    pub interrupted: i32,
    /// Last terminal error
    pub last_error: Option<String>,
}

/// Persisted marker of the run in progress
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRunMarker {
    /// Run ID
    pub run_id: RunId,
    /// What started the run
    pub trigger: RunTrigger,
    /// When the run started
    pub started_at: DateTime<Utc>,
}

/// Persisted interval scheduler times
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTimes {
    /// Last scheduled run start
    pub last_run: Option<DateTime<Utc>>,
    /// Next scheduled run
    pub next_run: Option<DateTime<Utc>>,
}

/// Database handle
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

pub(crate) fn from_timestamp(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}
