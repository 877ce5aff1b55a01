//! History collaborator
//!
//! The batch runner hands each finished run to a [`HistorySink`]. The default
//! sink is the SQLite [`Database`]; tests substitute in-memory sinks.

use crate::db::{ActiveRunMarker, Database};
use crate::error::Result;
use crate::types::RunSummary;
use async_trait::async_trait;

/// Durable, append-only storage of finished runs
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Note that a run has started, so a crash mid-run can be detected later
    async fn begin_run(&self, _marker: &ActiveRunMarker) -> Result<()> {
        Ok(())
    }

    /// Store a finished run's successes and failures
    async fn record_run(&self, summary: &RunSummary) -> Result<()>;

    /// Whether an item of a source was downloaded by any earlier run
    async fn is_downloaded(&self, source_id: &str, item_id: &str) -> Result<bool>;
}

#[async_trait]
impl HistorySink for Database {
    async fn begin_run(&self, marker: &ActiveRunMarker) -> Result<()> {
        self.set_active_run(marker).await
    }

    async fn record_run(&self, summary: &RunSummary) -> Result<()> {
        self.insert_run(summary).await?;
        self.clear_active_run().await
    }

    async fn is_downloaded(&self, source_id: &str, item_id: &str) -> Result<bool> {
        self.is_item_downloaded(source_id, item_id).await
    }
}
