//! Sequential batch execution
//!
//! A batch is an ordered list of [`WorkUnit`]s. The [`BatchRunner`] walks them
//! one source at a time and one item at a time, in listing order, through a
//! [`RunGuard`] obtained from the run registry:
//!
//! 1. resolve the source's listing (or take the pre-listed items), merging in
//!    items a watcher poll already detected
//! 2. select candidates: every undownloaded item for full-mode sources,
//!    unseen items for subscribe-mode sources, everything for explicit units
//! 3. execute each candidate, recording exactly one outcome per item
//! 4. union the newly downloaded IDs into subscribe-mode watch state
//!
//! The first run of a subscribe-mode source only records the current listing
//! as seen and downloads nothing.
//!
//! After the last source the full record goes to the history collaborator and
//! the notification hub, and the guard is released.

use crate::db::ActiveRunMarker;
use crate::executor::DownloadExecutor;
use crate::history::HistorySink;
use crate::notifications::NotificationHub;
use crate::registry::{Busy, RunGuard, RunRegistry, RunSpec};
use crate::source_query::{SourceQuery, dedup_items};
use crate::types::{
    ErrorKind, ItemOutcome, RunPhase, RunSummary, RunTrigger, Source, SourceItem, SourceMode,
    SourceSummary,
};
use crate::watch_store::WatchStore;
use chrono::Utc;
use std::sync::Arc;

/// One source of a batch, optionally with its items already listed
#[derive(Clone, Debug)]
pub struct WorkUnit {
    /// Source to process
    pub source: Source,
    /// Items to consider instead of querying the source
    pub items: Option<Vec<SourceItem>>,
    /// Items already known to be new; merged into the listing and accounted
    /// even when the source is never listed
    pub detected: Vec<SourceItem>,
    /// Download `items` as given, bypassing history and seen-set selection
    pub explicit: bool,
}

impl WorkUnit {
    /// Unit whose listing is resolved when the runner reaches it
    pub fn new(source: Source) -> Self {
        Self {
            source,
            items: None,
            detected: Vec::new(),
            explicit: false,
        }
    }

    /// Unit with a fixed item list
    pub fn with_items(source: Source, items: Vec<SourceItem>) -> Self {
        Self {
            items: Some(items),
            ..Self::new(source)
        }
    }

    /// Unit listed when reached, carrying the items a poll already detected
    pub fn with_detected(source: Source, detected: Vec<SourceItem>) -> Self {
        Self {
            detected,
            ..Self::new(source)
        }
    }

    /// Unit downloading exactly `items`, whatever history says
    pub fn explicit(source: Source, items: Vec<SourceItem>) -> Self {
        Self {
            items: Some(items),
            explicit: true,
            ..Self::new(source)
        }
    }

    /// Items this unit is known to cover before any listing
    fn known_items(&self) -> Vec<SourceItem> {
        let mut known = self.items.clone().unwrap_or_default();
        known.extend(self.detected.iter().cloned());
        dedup_items(known)
    }
}

/// Runs batches through the single-run gate
#[derive(Clone)]
pub struct BatchRunner {
    registry: RunRegistry,
    executor: Arc<DownloadExecutor>,
    source_query: Arc<dyn SourceQuery>,
    history: Arc<dyn HistorySink>,
    watch_store: Arc<WatchStore>,
    notifications: NotificationHub,
}

impl BatchRunner {
    /// Wire a runner to its collaborators
    pub fn new(
        registry: RunRegistry,
        executor: Arc<DownloadExecutor>,
        source_query: Arc<dyn SourceQuery>,
        history: Arc<dyn HistorySink>,
        watch_store: Arc<WatchStore>,
        notifications: NotificationHub,
    ) -> Self {
        Self {
            registry,
            executor,
            source_query,
            history,
            watch_store,
            notifications,
        }
    }

    /// The registry gating this runner
    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Acquire the gate for `units`
    ///
    /// # Errors
    ///
    /// Returns [`Busy`] when another run is active.
    pub fn start(&self, trigger: RunTrigger, units: &[WorkUnit]) -> Result<RunGuard, Busy> {
        self.registry.start(RunSpec {
            trigger,
            sources: units.iter().map(|u| u.source.id.clone()).collect(),
        })
    }

    /// Start and execute a batch to completion
    ///
    /// # Errors
    ///
    /// Returns [`Busy`] when another run is active; nothing is queued.
    pub async fn run(&self, trigger: RunTrigger, units: Vec<WorkUnit>) -> Result<RunSummary, Busy> {
        let guard = self.start(trigger, &units)?;
        Ok(self.execute(guard, units).await)
    }

    /// Execute a batch on an already-acquired guard, releasing it at the end
    pub async fn execute(&self, guard: RunGuard, units: Vec<WorkUnit>) -> RunSummary {
        let run_id = guard.run_id();
        let initial = guard.snapshot();
        let trigger = initial.trigger.unwrap_or(RunTrigger::Manual);
        let started_at = initial.started_at.unwrap_or_else(Utc::now);

        let marker = ActiveRunMarker {
            run_id,
            trigger,
            started_at,
        };
        if let Err(e) = self.history.begin_run(&marker).await {
            tracing::warn!(run_id = %run_id, error = %e, "Failed to persist active run marker");
        }

        let mut sources = Vec::with_capacity(units.len());
        for unit in units {
            let summary = self.process_source(&guard, unit).await;
            sources.push(summary);
        }

        guard.set_phase(RunPhase::Finalizing);
        let state = guard.snapshot();
        let mut summary = RunSummary {
            run_id,
            trigger,
            started_at,
            finished_at: Utc::now(),
            successes: state.successes,
            failures: state.failures,
            sources,
            cancelled: guard.is_cancelled(),
            last_error: state.last_error,
        };

        if let Err(e) = self.history.record_run(&summary).await {
            tracing::error!(run_id = %run_id, error = %e, "Failed to record run history");
            let message = format!("history not recorded: {e}");
            guard.set_last_error(message.clone());
            summary.last_error = Some(message);
        }

        self.notifications.dispatch(&summary);
        guard.finish();
        summary
    }

    async fn process_source(&self, guard: &RunGuard, unit: WorkUnit) -> SourceSummary {
        let mut summary = SourceSummary {
            source_id: unit.source.id.clone(),
            name: unit.source.display_name().to_string(),
            downloaded: 0,
            failed: 0,
        };

        if guard.is_cancelled() {
            // Unlisted sources are skipped; known items are accounted as cancelled
            let known = unit.known_items();
            guard.begin_source(&unit.source.id, known.len() as u64);
            for item in &known {
                guard.record_failure(ItemOutcome::cancelled(&unit.source.id, item));
                summary.failed += 1;
            }
            return summary;
        }

        let WorkUnit {
            source,
            items,
            detected,
            explicit,
        } = unit;

        guard.set_phase(RunPhase::Polling);
        let mut listing = match items {
            Some(items) => items,
            None => match self.source_query.list_items(&source).await {
                Ok(items) => items,
                Err(e) if !detected.is_empty() => {
                    tracing::warn!(
                        source_id = %source.id,
                        error = %e,
                        detected = detected.len(),
                        "Source listing failed; downloading detected items only"
                    );
                    Vec::new()
                }
                Err(e) => {
                    tracing::warn!(source_id = %source.id, error = %e, "Source listing failed; skipping source");
                    guard.begin_source(&source.id, 1);
                    guard.record_failure(ItemOutcome {
                        source_id: source.id.clone(),
                        item_id: source.id.clone(),
                        title: source.name.clone(),
                        error_kind: Some(ErrorKind::Network),
                        message: Some(e.to_string()),
                        output_path: None,
                        strategy: None,
                        retry_count: 0,
                    });
                    summary.failed = 1;
                    return summary;
                }
            },
        };

        listing.extend(detected);
        let listing = dedup_items(listing);
        let selected = if explicit {
            listing
        } else {
            self.select_items(&source, listing).await
        };

        guard.set_phase(RunPhase::Downloading);
        guard.begin_source(&source.id, selected.len() as u64);
        tracing::info!(
            source_id = %source.id,
            mode = source.mode.as_str(),
            items = selected.len(),
            "Processing source"
        );

        let mut downloaded_ids = Vec::new();
        for item in &selected {
            if guard.is_cancelled() {
                guard.record_failure(ItemOutcome::cancelled(&source.id, item));
                summary.failed += 1;
                continue;
            }

            guard.begin_item(&item.id);
            let attempt = self
                .executor
                .execute(
                    item,
                    &source.folder,
                    &source.options,
                    guard.cancel_token(),
                    guard.progress_sink(&item.id),
                )
                .await;
            let outcome = ItemOutcome::from_attempt(&source.id, item, &attempt);

            if attempt.ok {
                tracing::info!(source_id = %source.id, item_id = %item.id, strategy = ?attempt.strategy, "Item downloaded");
                guard.record_success(outcome);
                downloaded_ids.push(item.id.clone());
                summary.downloaded += 1;
            } else {
                tracing::warn!(
                    source_id = %source.id,
                    item_id = %item.id,
                    error_kind = attempt.error_kind.map(|k| k.as_str()).unwrap_or("unknown"),
                    "Item failed"
                );
                guard.record_failure(outcome);
                summary.failed += 1;
            }
        }

        if source.mode == SourceMode::Subscribe {
            self.watch_store
                .record_seen(&source.id, &downloaded_ids)
                .await;
        }
        summary
    }

    async fn select_items(&self, source: &Source, listing: Vec<SourceItem>) -> Vec<SourceItem> {
        match source.mode {
            SourceMode::Subscribe => {
                let listed: Vec<String> = listing.iter().map(|i| i.id.clone()).collect();
                let item_count = listed.len() as u64;
                // Read and (on first run) initialize under one lock so a concurrent
                // watcher poll cannot interleave
                let seen = self
                    .watch_store
                    .modify(&source.id, move |state| {
                        if state.initialized {
                            Some(state.last_seen_item_ids.clone())
                        } else {
                            state.last_seen_item_ids.extend(listed);
                            state.initialized = true;
                            state.last_item_count = Some(item_count);
                            None
                        }
                    })
                    .await;

                match seen {
                    Some(seen) => listing
                        .into_iter()
                        .filter(|item| !seen.contains(&item.id))
                        .collect(),
                    None => {
                        tracing::info!(
                            source_id = %source.id,
                            items = item_count,
                            "First subscribe run: recorded current items as seen, downloading nothing"
                        );
                        Vec::new()
                    }
                }
            }
            SourceMode::Full => {
                let mut selected = Vec::with_capacity(listing.len());
                for item in listing {
                    match self.history.is_downloaded(&source.id, &item.id).await {
                        Ok(true) => {
                            tracing::debug!(source_id = %source.id, item_id = %item.id, "Already downloaded; skipping");
                        }
                        Ok(false) => selected.push(item),
                        Err(e) => {
                            tracing::warn!(source_id = %source.id, item_id = %item.id, error = %e, "History lookup failed; downloading anyway");
                            selected.push(item);
                        }
                    }
                }
                selected
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
