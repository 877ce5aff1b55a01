//! Single-run gate and live run state
//!
//! [`RunRegistry::start`] hands out at most one [`RunGuard`] at a time. The
//! guard is the only writer of the live [`RunState`]; everyone else reads
//! snapshots through [`RunRegistry::status`]. Dropping the guard (or calling
//! [`RunGuard::finish`]) returns the registry to idle and wakes anyone waiting
//! in [`RunRegistry::wait_idle`].
//!
//! A second `start` while a run is active is rejected with [`Busy`], never
//! queued.

use crate::extractor::ProgressSink;
use crate::types::{Event, ItemOutcome, ItemProgress, RunId, RunPhase, RunState, RunTrigger};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// What a run is being started for
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSpec {
    /// What triggered the run
    pub trigger: RunTrigger,
    /// Source IDs in processing order
    pub sources: Vec<String>,
}

/// Rejection of a concurrent start; an expected signal, not a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("a run is already in progress (run {run_id})")]
pub struct Busy {
    /// The run holding the gate
    pub run_id: RunId,
}

/// Result of [`RunRegistry::cancel`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Cancellation was requested for this run
    Accepted(RunId),
    /// No run was active
    NoOp,
}

struct Active {
    run_id: RunId,
    cancel: CancellationToken,
}

struct Inner {
    state: Mutex<RunState>,
    active: Mutex<Option<Active>>,
    resolved: Mutex<HashSet<(String, String)>>,
    next_run_id: AtomicI64,
    idle_tx: watch::Sender<bool>,
    event_tx: broadcast::Sender<Event>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, RunState> {
        // A panic while holding the lock cannot leave RunState half-written
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active(&self) -> MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

/// Shared single-run gate
#[derive(Clone)]
pub struct RunRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RunRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRegistry")
            .field("idle", &self.is_idle())
            .finish()
    }
}

impl RunRegistry {
    /// Create an idle registry; run IDs start at 1
    pub fn new(event_tx: broadcast::Sender<Event>) -> Self {
        let (idle_tx, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RunState::default()),
                active: Mutex::new(None),
                resolved: Mutex::new(HashSet::new()),
                next_run_id: AtomicI64::new(1),
                idle_tx,
                event_tx,
            }),
        }
    }

    /// Continue numbering after runs recorded by a previous process
    pub fn set_next_run_id(&self, next: i64) {
        self.inner.next_run_id.fetch_max(next, Ordering::SeqCst);
    }

    /// Acquire the gate for a new run
    ///
    /// # Errors
    ///
    /// Returns [`Busy`] when a run is already active.
    pub fn start(&self, spec: RunSpec) -> Result<RunGuard, Busy> {
        let mut active = self.inner.active();
        if let Some(current) = active.as_ref() {
            return Err(Busy {
                run_id: current.run_id,
            });
        }

        let run_id = RunId(self.inner.next_run_id.fetch_add(1, Ordering::SeqCst));
        let cancel = CancellationToken::new();
        *active = Some(Active {
            run_id,
            cancel: cancel.clone(),
        });

        *self.inner.state() = RunState {
            run_id: Some(run_id),
            phase: RunPhase::Polling,
            trigger: Some(spec.trigger),
            started_at: Some(Utc::now()),
            ..RunState::default()
        };
        self.inner
            .resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.inner.idle_tx.send_replace(false);
        drop(active);

        tracing::info!(
            run_id = %run_id,
            trigger = spec.trigger.as_str(),
            sources = spec.sources.len(),
            "Run started"
        );
        self.inner.emit(Event::RunStarted {
            run_id,
            trigger: spec.trigger,
            sources: spec.sources,
        });

        Ok(RunGuard {
            inner: Arc::clone(&self.inner),
            run_id,
            cancel,
            released: false,
        })
    }

    /// Snapshot of the live (or last finished) run
    pub fn status(&self) -> RunState {
        self.inner.state().clone()
    }

    /// Request cancellation of the active run
    ///
    /// The run observes the request at its next checkpoint; nothing is killed.
    pub fn cancel(&self) -> CancelOutcome {
        let active = self.inner.active();
        match active.as_ref() {
            Some(current) => {
                current.cancel.cancel();
                self.inner.state().cancel_requested = true;
                tracing::info!(run_id = %current.run_id, "Cancellation requested");
                CancelOutcome::Accepted(current.run_id)
            }
            None => CancelOutcome::NoOp,
        }
    }

    /// Whether no run holds the gate
    pub fn is_idle(&self) -> bool {
        self.inner.active().is_none()
    }

    /// Run currently holding the gate
    pub fn active_run_id(&self) -> Option<RunId> {
        self.inner.active().as_ref().map(|a| a.run_id)
    }

    /// Wait until no run holds the gate
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.idle_tx.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail
        let _ = rx.wait_for(|idle| *idle).await;
    }

    /// Receiver that flips to `true` whenever the gate is released
    pub fn idle_receiver(&self) -> watch::Receiver<bool> {
        self.inner.idle_tx.subscribe()
    }
}

/// Exclusive handle on the live run
///
/// Every mutation of [`RunState`] during a run goes through the guard.
pub struct RunGuard {
    inner: Arc<Inner>,
    run_id: RunId,
    cancel: CancellationToken,
    released: bool,
}

impl std::fmt::Debug for RunGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunGuard")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RunGuard {
    /// ID of this run
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Token cancelled by [`RunRegistry::cancel`]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Move to a new phase
    pub fn set_phase(&self, phase: RunPhase) {
        let changed = {
            let mut state = self.inner.state();
            let changed = state.phase != phase;
            state.phase = phase;
            changed
        };
        if changed {
            self.inner.emit(Event::PhaseChanged {
                run_id: self.run_id,
                phase,
            });
        }
    }

    /// Start processing a source with `total` selected items
    pub fn begin_source(&self, source_id: &str, total: u64) {
        {
            let mut state = self.inner.state();
            state.current_source_id = Some(source_id.to_string());
            state.current_item_id = None;
            state.progress_current = 0;
            state.progress_total = total;
            state.item_progress = None;
        }
        self.inner.emit(Event::SourceStarted {
            run_id: self.run_id,
            source_id: source_id.to_string(),
            total,
        });
    }

    /// Start downloading an item
    pub fn begin_item(&self, item_id: &str) {
        let mut state = self.inner.state();
        state.current_item_id = Some(item_id.to_string());
        state.item_progress = None;
    }

    /// Callback feeding advisory progress of `item_id` into the run state
    pub fn progress_sink(&self, item_id: &str) -> ProgressSink {
        let inner = Arc::clone(&self.inner);
        let run_id = self.run_id;
        let item_id = item_id.to_string();
        Arc::new(move |progress: ItemProgress| {
            inner.state().item_progress = Some(progress.clone());
            inner.emit(Event::ItemProgress {
                run_id,
                item_id: item_id.clone(),
                progress,
            });
        })
    }

    /// Record a downloaded item
    pub fn record_success(&self, outcome: ItemOutcome) {
        self.record(outcome, true);
    }

    /// Record a failed item; its message becomes the run's last error
    pub fn record_failure(&self, outcome: ItemOutcome) {
        self.record(outcome, false);
    }

    fn record(&self, outcome: ItemOutcome, success: bool) {
        let key = (outcome.source_id.clone(), outcome.item_id.clone());
        let first = self
            .inner
            .resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key);
        if !first {
            tracing::warn!(
                source_id = %outcome.source_id,
                item_id = %outcome.item_id,
                "Item already resolved in this run; ignoring duplicate outcome"
            );
            return;
        }

        {
            let mut state = self.inner.state();
            state.progress_current = state.progress_current.saturating_add(1);
            state.item_progress = None;
            if success {
                state.successes.push(outcome.clone());
            } else {
                let kind = outcome.error_kind.map(|k| k.as_str()).unwrap_or("unknown");
                let detail = outcome.message.as_deref().unwrap_or("no diagnostic");
                state.last_error = Some(format!("{} [{}]: {}", outcome.item_id, kind, detail));
                state.failures.push(outcome.clone());
            }
        }

        let event = if success {
            Event::ItemSucceeded {
                run_id: self.run_id,
                outcome,
            }
        } else {
            Event::ItemFailed {
                run_id: self.run_id,
                outcome,
            }
        };
        self.inner.emit(event);
    }

    /// Record a run-level error (e.g. history storage failed)
    pub fn set_last_error(&self, message: impl Into<String>) {
        self.inner.state().last_error = Some(message.into());
    }

    /// Snapshot of this run's state
    pub fn snapshot(&self) -> RunState {
        self.inner.state().clone()
    }

    /// Return to idle and release the gate; yields the final state
    pub fn finish(mut self) -> RunState {
        self.release()
    }

    fn release(&mut self) -> RunState {
        self.released = true;
        let final_state = {
            let mut state = self.inner.state();
            state.phase = RunPhase::Idle;
            state.finished_at = Some(Utc::now());
            state.current_item_id = None;
            state.item_progress = None;
            state.cancel_requested = self.cancel.is_cancelled();
            state.clone()
        };

        *self.inner.active() = None;
        self.inner.idle_tx.send_replace(true);

        tracing::info!(
            run_id = %self.run_id,
            successes = final_state.successes.len(),
            failures = final_state.failures.len(),
            cancelled = final_state.cancel_requested,
            "Run finished"
        );
        self.inner.emit(Event::RunFinished {
            run_id: self.run_id,
            successes: final_state.successes.len() as u64,
            failures: final_state.failures.len() as u64,
            cancelled: final_state.cancel_requested,
        });
        final_state
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(run_id = %self.run_id, "Run guard dropped without finish; releasing gate");
            self.release();
        }
    }
}
