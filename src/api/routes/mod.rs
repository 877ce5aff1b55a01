//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`runs`] - Status, start, cancel, run list
//! - [`history`] - Item history
//! - [`triggers`] - Watcher and interval schedule
//! - [`system`] - Health and events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod history;
mod runs;
mod system;
mod triggers;

pub use history::*;
pub use runs::*;
pub use system::*;
pub use triggers::*;

/// Query parameters for GET /history
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct HistoryQuery {
    /// Maximum number of items to return (default: 50, max 1000)
    pub limit: Option<i64>,
    /// Number of items to skip (default: 0)
    pub offset: Option<i64>,
    /// Only items of this source
    pub source: Option<String>,
    /// Only items recorded at or after this instant (RFC 3339)
    pub since: Option<DateTime<Utc>>,
    /// Only items recorded before this instant (RFC 3339)
    pub until: Option<DateTime<Utc>>,
    /// Only successes (`true`) or failures (`false`)
    pub success: Option<bool>,
}

/// Query parameters for GET /runs
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RunsQuery {
    /// Maximum number of runs to return (default: 20, max 500)
    pub limit: Option<i64>,
}

/// Body of POST /runs
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StartRunRequest {
    /// Source IDs to run, in order; all configured sources when omitted
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    /// Download this one URL instead of the configured sources
    #[serde(default)]
    pub single_url: Option<String>,
    /// Subdirectory of the single-download directory (single-URL runs only)
    #[serde(default)]
    pub destination: Option<PathBuf>,
    /// Final format override (single-URL runs only)
    #[serde(default)]
    pub final_format_override: Option<String>,
    /// Force music mode (single-URL runs only)
    #[serde(default)]
    pub music_mode: bool,
}

/// Response of POST /runs
#[derive(Debug, Deserialize, Serialize)]
pub struct StartRunResponse {
    /// ID of the started run
    pub run_id: crate::types::RunId,
}
