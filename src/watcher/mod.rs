//! Adaptive watcher
//!
//! Polls every configured source on its own adaptive interval, collects
//! detections into a [`PendingBatch`], and hands the batch to the batch runner
//! once the quiet window has passed with no further detections.
//!
//! # Behaviour
//!
//! - A poll that finds new items resets the source to the active interval; an
//!   idle poll backs off by the configured factor, bounded by floor and cap.
//! - Each genuinely new detection re-arms the quiet window.
//! - A downtime window pauses polling only. A batch whose quiet window expires
//!   during downtime still runs, and a batch still waiting when downtime ends
//!   is flushed at once.
//! - A batch is only started when the run registry is idle; while another run
//!   is active the pending batch keeps accumulating.
//! - Listings run in their own task, so a quiet window that expires during a
//!   slow poll still flushes on time.
//!
//! Interval and detection rules live in [`policy`], the quiet-window timer in
//! [`debounce`] and downtime evaluation in [`downtime`].

pub mod debounce;
pub mod downtime;
pub mod policy;

use crate::batch::{BatchRunner, WorkUnit};
use crate::config::WatchPolicy;
use crate::error::{Error, Result};
use crate::source_query::SourceQuery;
use crate::types::{Event, RunId, RunTrigger, Source, SourceItem};
use crate::watch_store::WatchStore;
use chrono::{DateTime, Utc};
use debounce::Debounce;
use downtime::{DowntimeStatus, DowntimeWindow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Source of wall-clock time; replaceable so tests can drive it from tokio's clock
pub type WallClock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The system clock
pub fn system_clock() -> WallClock {
    Arc::new(Utc::now)
}

/// Live watcher inputs, swapped on configuration reload
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WatchSettings {
    /// Interval, quiet-window and downtime policy
    pub policy: WatchPolicy,
    /// Sources to poll, in configuration order
    pub sources: Vec<Source>,
}

/// What the watcher is doing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherPhase {
    /// Watching is turned off
    #[default]
    Disabled,
    /// Waiting for the next poll
    Idle,
    /// Listing a source
    Polling,
    /// Detections are pending; waiting for the quiet window (or the registry)
    WaitingQuietWindow,
    /// A batch this watcher flushed is running
    RunningBatch,
}

/// Snapshot published after every loop iteration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WatcherStatus {
    /// Current phase
    pub phase: WatcherPhase,
    /// Sources waiting to be flushed, in detection order
    pub pending_sources: Vec<String>,
    /// New items waiting to be flushed
    pub pending_items: u64,
    /// Seconds until the quiet window expires
    pub flush_in_secs: Option<u64>,
    /// Whether polling is paused by the downtime window
    pub downtime_active: bool,
    /// When the current downtime window ends
    pub downtime_ends_at: Option<DateTime<Utc>>,
    /// Next time any source is due
    pub next_poll_at: Option<DateTime<Utc>>,
    /// Last batch handed to the runner
    pub last_flush_at: Option<DateTime<Utc>>,
    /// Run started by the last flush
    pub last_run_id: Option<RunId>,
}

/// Detections awaiting a batch
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PendingBatch {
    sources: Vec<String>,
    items: HashMap<String, Vec<SourceItem>>,
    first_detected_at: Option<DateTime<Utc>>,
    last_detected_at: Option<DateTime<Utc>>,
}

impl PendingBatch {
    /// Add detected items of a source
    ///
    /// Returns true when at least one item was not already pending.
    pub fn add(&mut self, source_id: &str, items: impl IntoIterator<Item = SourceItem>, now: DateTime<Utc>) -> bool {
        let entry = self.items.entry(source_id.to_string()).or_default();
        let before = entry.len();
        for item in items {
            if !entry.iter().any(|pending| pending.id == item.id) {
                entry.push(item);
            }
        }
        let added = entry.len() > before;

        if entry.is_empty() {
            self.items.remove(source_id);
            return false;
        }
        if !self.sources.iter().any(|s| s == source_id) {
            self.sources.push(source_id.to_string());
        }
        if added {
            self.first_detected_at.get_or_insert(now);
            self.last_detected_at = Some(now);
        }
        added
    }

    /// Sources in first-detection order
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Pending items of a source, in detection order
    pub fn items(&self, source_id: &str) -> &[SourceItem] {
        self.items.get(source_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether a source has pending items
    pub fn contains(&self, source_id: &str) -> bool {
        self.items.contains_key(source_id)
    }

    /// Total pending item IDs
    pub fn item_count(&self) -> u64 {
        self.items.values().map(|ids| ids.len() as u64).sum()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// First detection of this batch
    pub fn first_detected_at(&self) -> Option<DateTime<Utc>> {
        self.first_detected_at
    }

    /// Latest detection of this batch
    pub fn last_detected_at(&self) -> Option<DateTime<Utc>> {
        self.last_detected_at
    }
}

/// Mutable state owned by the watcher loop
#[derive(Default)]
struct LoopState {
    pending: PendingBatch,
    /// Item IDs handed to the batch that is still running
    in_flight: HashMap<String, BTreeSet<String>>,
    own_run: Option<RunId>,
    flush_ready: bool,
    was_downtime: bool,
    last_flush_at: Option<DateTime<Utc>>,
    last_run_id: Option<RunId>,
}

/// Adaptive polling loop feeding the batch runner
pub struct AdaptiveWatcher {
    runner: BatchRunner,
    source_query: Arc<dyn SourceQuery>,
    watch_store: Arc<WatchStore>,
    settings_rx: watch::Receiver<WatchSettings>,
    event_tx: broadcast::Sender<Event>,
    clock: WallClock,
    status_tx: watch::Sender<WatcherStatus>,
}

impl AdaptiveWatcher {
    /// Create a watcher; it does nothing until [`run`](Self::run) is awaited
    pub fn new(
        runner: BatchRunner,
        source_query: Arc<dyn SourceQuery>,
        watch_store: Arc<WatchStore>,
        settings_rx: watch::Receiver<WatchSettings>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        let (status_tx, _) = watch::channel(WatcherStatus::default());
        Self {
            runner,
            source_query,
            watch_store,
            settings_rx,
            event_tx,
            clock: system_clock(),
            status_tx,
        }
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, clock: WallClock) -> Self {
        self.clock = clock;
        self
    }

    /// Receiver of the status published after every iteration
    pub fn status_receiver(&self) -> watch::Receiver<WatcherStatus> {
        self.status_tx.subscribe()
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!("Adaptive watcher started");

        let mut settings_rx = self.settings_rx.clone();
        let mut settings = settings_rx.borrow_and_update().clone();
        let mut settings_open = true;
        let mut idle_rx = self.runner.registry().idle_receiver();
        let mut debounce = Debounce::new(settings.policy.quiet_window());
        let mut state = LoopState::default();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let registry = self.runner.registry();
            if state.own_run.is_some() && registry.active_run_id() != state.own_run {
                state.own_run = None;
                state.in_flight.clear();
            }

            if !settings.policy.enabled {
                if !state.pending.is_empty() {
                    tracing::info!(sources = state.pending.sources().len(), "Watcher disabled; dropping pending batch");
                }
                state.pending = PendingBatch::default();
                state.flush_ready = false;
                debounce.clear();
                self.publish(&state, &debounce, &settings, DowntimeStatus::Inactive, WatcherPhase::Disabled)
                    .await;

                if !settings_open {
                    shutdown.cancelled().await;
                    break;
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = settings_rx.changed() => {
                        match changed {
                            Ok(()) => settings = self.reload(&mut settings_rx, &mut debounce),
                            Err(_) => settings_open = false,
                        }
                    }
                }
                continue;
            }

            let now = (self.clock)();
            let window = DowntimeWindow::from_config(&settings.policy.downtime);
            let downtime = window
                .map(|w| w.status_at(now))
                .unwrap_or(DowntimeStatus::Inactive);

            if downtime.is_active() && !state.was_downtime {
                tracing::info!("Downtime window started; polling paused");
            }
            let downtime_ended = state.was_downtime && !downtime.is_active();
            if downtime_ended {
                tracing::info!("Downtime window ended; polling resumed");
            }
            state.was_downtime = downtime.is_active();

            if debounce.is_expired(Instant::now()) {
                debounce.clear();
                state.flush_ready = true;
            }
            if downtime_ended && !state.pending.is_empty() {
                // Detections that waited out the downtime go immediately
                debounce.clear();
                state.flush_ready = true;
            }
            if state.flush_ready && registry.is_idle() {
                self.flush(&settings, &mut state, &mut debounce);
            }

            if !downtime.is_active() {
                for source in &settings.sources {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    let due = match self.watch_store.get(&source.id).await {
                        Some(watch_state) => watch_state.is_due((self.clock)()),
                        None => true,
                    };
                    if due {
                        self.publish(&state, &debounce, &settings, downtime, WatcherPhase::Polling)
                            .await;
                        self.poll_source(source, &settings, &mut state, &mut debounce)
                            .await;
                    }
                }
            }

            let phase = self.phase_for(&state);
            let next_poll = self
                .publish(&state, &debounce, &settings, downtime, phase)
                .await;

            let now = (self.clock)();
            let wake_at = match downtime {
                DowntimeStatus::Active { ends_at } => Some(ends_at),
                DowntimeStatus::Inactive => {
                    let downtime_start = window.and_then(|w| w.next_start_after(now));
                    match (next_poll, downtime_start) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    }
                }
            };
            let sleep_for = wake_at.map(|at| (at - now).to_std().unwrap_or(Duration::ZERO));

            idle_rx.borrow_and_update();
            let wait_for_idle = state.flush_ready && !registry.is_idle();

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep_or_forever(sleep_for) => {}
                _ = debounce.expiry() => {}
                _ = idle_rx.changed(), if wait_for_idle => {}
                changed = settings_rx.changed(), if settings_open => {
                    match changed {
                        Ok(()) => settings = self.reload(&mut settings_rx, &mut debounce),
                        Err(_) => settings_open = false,
                    }
                }
            }
        }

        tracing::info!("Adaptive watcher stopped");
    }

    fn reload(&self, settings_rx: &mut watch::Receiver<WatchSettings>, debounce: &mut Debounce) -> WatchSettings {
        let settings = settings_rx.borrow_and_update().clone();
        debounce.set_window(settings.policy.quiet_window());
        tracing::info!(
            enabled = settings.policy.enabled,
            sources = settings.sources.len(),
            "Watcher settings reloaded"
        );
        settings
    }

    fn phase_for(&self, state: &LoopState) -> WatcherPhase {
        if state.own_run.is_some() && self.runner.registry().active_run_id() == state.own_run {
            WatcherPhase::RunningBatch
        } else if !state.pending.is_empty() {
            WatcherPhase::WaitingQuietWindow
        } else {
            WatcherPhase::Idle
        }
    }

    /// List `source` in its own task, flushing on time if the quiet window
    /// expires while the listing is outstanding
    async fn list_source(
        &self,
        source: &Source,
        settings: &WatchSettings,
        state: &mut LoopState,
        debounce: &mut Debounce,
    ) -> Result<Vec<SourceItem>> {
        let query = self.source_query.clone();
        let target = source.clone();
        let mut listing = tokio::spawn(async move { query.list_items(&target).await });

        loop {
            tokio::select! {
                joined = &mut listing => {
                    return joined.map_err(|e| Error::Other(format!("listing task failed: {e}")))?;
                }
                _ = debounce.expiry() => {
                    debounce.clear();
                    state.flush_ready = true;
                    if self.runner.registry().is_idle() {
                        self.flush(settings, state, debounce);
                    }
                }
            }
        }
    }

    async fn poll_source(&self, source: &Source, settings: &WatchSettings, state: &mut LoopState, debounce: &mut Debounce) {
        let policy = &settings.policy;
        let now = (self.clock)();
        let listing = match self.list_source(source, settings, state, debounce).await {
            Ok(listing) => listing,
            Err(e) => {
                // Retried after the current interval; the interval itself is unchanged
                tracing::warn!(source_id = %source.id, error = %e, "Watcher poll failed");
                self.watch_store
                    .modify(&source.id, |watch_state| {
                        watch_state.last_poll_at = Some(now);
                    })
                    .await;
                return;
            }
        };

        let mode = source.mode;
        let (diff, interval) = self
            .watch_store
            .modify(&source.id, |watch_state| {
                let diff = policy::diff_listing(watch_state, &listing);
                policy::apply_poll(watch_state, mode, &listing, &diff, now, policy);
                (diff, watch_state.current_poll_interval)
            })
            .await;

        if diff.baseline {
            tracing::info!(source_id = %source.id, items = listing.len(), "Recorded baseline listing");
        }

        let in_flight = state.in_flight.get(&source.id);
        let detected: Vec<SourceItem> = diff
            .new_items
            .iter()
            .filter(|item| in_flight.is_none_or(|ids| !ids.contains(&item.id)))
            .cloned()
            .collect();

        if !detected.is_empty() {
            let newly_pending = !state.pending.contains(&source.id);
            let count = detected.len();
            if state.pending.add(&source.id, detected, now) {
                debounce.trigger(Instant::now());
                tracing::info!(
                    source_id = %source.id,
                    new_items = count,
                    quiet_window_secs = debounce.window().as_secs(),
                    "New items detected; quiet window armed"
                );
            }
            if newly_pending {
                self.emit(Event::BatchQueued {
                    sources: state.pending.sources().to_vec(),
                });
            }
        }

        tracing::debug!(
            source_id = %source.id,
            new_items = diff.new_items.len(),
            next_interval_secs = interval.as_secs(),
            "Source polled"
        );
        self.emit(Event::WatcherPolled {
            source_id: source.id.clone(),
            new_items: diff.new_items.len() as u64,
            next_interval_secs: interval.as_secs(),
        });
    }

    fn flush(&self, settings: &WatchSettings, state: &mut LoopState, debounce: &mut Debounce) {
        if state.pending.is_empty() {
            state.flush_ready = false;
            return;
        }

        let units: Vec<WorkUnit> = state
            .pending
            .sources()
            .iter()
            .filter_map(|id| settings.sources.iter().find(|s| &s.id == id))
            .map(|source| WorkUnit::with_detected(source.clone(), state.pending.items(&source.id).to_vec()))
            .collect();

        if units.is_empty() {
            tracing::info!("Pending sources are no longer configured; dropping batch");
            state.pending = PendingBatch::default();
            state.flush_ready = false;
            return;
        }

        match self.runner.start(RunTrigger::Watcher, &units) {
            Ok(guard) => {
                let run_id = guard.run_id();
                let batch = std::mem::take(&mut state.pending);
                tracing::info!(
                    run_id = %run_id,
                    sources = units.len(),
                    items = batch.item_count(),
                    "Flushing watcher batch"
                );

                state.in_flight = batch
                    .items
                    .into_iter()
                    .map(|(source_id, items)| (source_id, items.into_iter().map(|item| item.id).collect()))
                    .collect();
                state.own_run = Some(run_id);
                state.flush_ready = false;
                state.last_flush_at = Some((self.clock)());
                state.last_run_id = Some(run_id);
                debounce.clear();

                let runner = self.runner.clone();
                tokio::spawn(async move {
                    runner.execute(guard, units).await;
                });
            }
            Err(busy) => {
                tracing::debug!(active_run = %busy.run_id, "Registry busy; batch stays pending");
            }
        }
    }

    /// Publish status; returns the earliest next poll time
    async fn publish(
        &self,
        state: &LoopState,
        debounce: &Debounce,
        settings: &WatchSettings,
        downtime: DowntimeStatus,
        phase: WatcherPhase,
    ) -> Option<DateTime<Utc>> {
        let now = (self.clock)();
        let mut next_poll: Option<DateTime<Utc>> = None;
        if phase != WatcherPhase::Disabled {
            for source in &settings.sources {
                let due = match self.watch_store.get(&source.id).await {
                    Some(watch_state) => policy::next_poll_at(&watch_state).unwrap_or(now),
                    None => now,
                };
                next_poll = Some(next_poll.map_or(due, |current| current.min(due)));
            }
        }

        let flush_in_secs = debounce
            .deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()).as_secs());

        self.status_tx.send_replace(WatcherStatus {
            phase,
            pending_sources: state.pending.sources().to_vec(),
            pending_items: state.pending.item_count(),
            flush_in_secs,
            downtime_active: downtime.is_active(),
            downtime_ends_at: match downtime {
                DowntimeStatus::Active { ends_at } => Some(ends_at),
                DowntimeStatus::Inactive => None,
            },
            next_poll_at: next_poll,
            last_flush_at: state.last_flush_at,
            last_run_id: state.last_run_id,
        });
        next_poll
    }
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}
