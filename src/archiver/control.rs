//! Manual runs, cancellation and read-only queries.

use crate::batch::WorkUnit;
use crate::db::{HistoryFilter, RunRow, ScheduleTimes};
use crate::error::{Error, Result};
use crate::registry::CancelOutcome;
use crate::types::{
    DownloadOptions, HistoryEntry, RunId, RunState, RunTrigger, SINGLE_SOURCE_ID, SingleDownload,
    Source, SourceItem, SourceKind, SourceMode, WatchState,
};
use crate::utils::{is_music_url, item_id_from_url, resolve_within};
use crate::watcher::WatcherStatus;
use std::sync::atomic::Ordering;

use super::Archiver;

impl Archiver {
    /// Start a run in the background and return its ID
    ///
    /// `source_ids` selects sources by ID in the given order; `None` runs
    /// every configured source in configuration order.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`Error::NotFound`] for an unknown source ID
    /// - [`Error::Busy`] when another run is active; nothing is queued
    pub fn start_run(&self, trigger: RunTrigger, source_ids: Option<&[String]>) -> Result<RunId> {
        if !self.services.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let sources = self.select_sources(source_ids)?;
        let units: Vec<WorkUnit> = sources.into_iter().map(WorkUnit::new).collect();
        self.launch(trigger, units)
    }

    /// Download one URL outside any configured source
    ///
    /// The item lands in the single-download directory (or `destination`
    /// beneath it) and is recorded in history under the `single` source. It is
    /// downloaded even if the same URL was fetched before.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`Error::Config`] for a non-http(s) URL or a destination outside the
    ///   single-download directory
    /// - [`Error::Busy`] when another run is active
    pub fn start_single(&self, request: &SingleDownload) -> Result<RunId> {
        if !self.services.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let url = url::Url::parse(&request.url)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| Error::config("url", format!("'{}' is not an http(s) URL", request.url)))?;

        let base = self.get_config().single_download_dir();
        let folder = match &request.destination {
            Some(destination) => resolve_within(&base, destination).ok_or_else(|| {
                Error::config(
                    "destination",
                    format!("'{}' is outside {}", destination.display(), base.display()),
                )
            })?,
            None => base,
        };

        let item = SourceItem {
            id: item_id_from_url(&url),
            url: request.url.clone(),
            title: None,
            channel: None,
            upload_date: None,
        };
        let source = Source {
            id: SINGLE_SOURCE_ID.to_string(),
            name: Some("Single download".to_string()),
            kind: SourceKind::Playlist,
            url: None,
            folder,
            account: None,
            mode: SourceMode::Full,
            options: DownloadOptions {
                final_format: request.final_format.clone(),
                music_mode: request.music_mode || is_music_url(&url),
            },
        };
        tracing::info!(item_id = %item.id, folder = %source.folder.display(), "Single-URL run requested");
        self.launch(RunTrigger::Manual, vec![WorkUnit::explicit(source, vec![item])])
    }

    fn launch(&self, trigger: RunTrigger, units: Vec<WorkUnit>) -> Result<RunId> {
        let guard = self.runner.start(trigger, &units)?;
        let run_id = guard.run_id();

        let runner = self.runner.clone();
        tokio::spawn(async move {
            runner.execute(guard, units).await;
        });
        Ok(run_id)
    }

    fn select_sources(&self, source_ids: Option<&[String]>) -> Result<Vec<Source>> {
        let configured = self.get_config().resolved_sources();
        let Some(ids) = source_ids else {
            return Ok(configured);
        };

        ids.iter()
            .map(|id| {
                configured
                    .iter()
                    .find(|s| &s.id == id)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("source '{id}'")))
            })
            .collect()
    }

    /// Request cancellation of the active run
    pub fn cancel(&self) -> CancelOutcome {
        self.registry.cancel()
    }

    /// Snapshot of the live (or last finished) run
    pub fn status(&self) -> RunState {
        self.registry.status()
    }

    /// Wait until no run is active
    pub async fn wait_idle(&self) {
        self.registry.wait_idle().await;
    }

    /// Item history, most recent first
    pub async fn history(&self, filter: &HistoryFilter, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>> {
        self.db.query_history(filter, limit, offset).await
    }

    /// Number of history rows matching `filter`
    pub async fn history_count(&self, filter: &HistoryFilter) -> Result<i64> {
        self.db.count_history(filter).await
    }

    /// Recent runs, most recent first
    pub async fn runs(&self, limit: usize) -> Result<Vec<RunRow>> {
        self.db.list_runs(limit).await
    }

    /// Watch state of every tracked source
    pub async fn watch_states(&self) -> Vec<WatchState> {
        self.watch_store.snapshot().await
    }

    /// Latest watcher status; disabled until the watcher service runs
    pub fn watcher_status(&self) -> WatcherStatus {
        self.services
            .watcher_status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|rx| rx.borrow().clone())
            .unwrap_or_default()
    }

    /// Interval scheduler's last and next run
    ///
    /// Falls back to the persisted times while the scheduler is not running.
    pub async fn schedule_times(&self) -> Result<ScheduleTimes> {
        let live = self
            .services
            .schedule_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|rx| rx.borrow().clone());
        match live {
            Some(times) => Ok(times),
            None => self.db.get_schedule_times().await,
        }
    }
}
