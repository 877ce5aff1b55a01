//! Shared, persisted per-source watch state
//!
//! The watcher folds poll results in and the batch runner unions newly
//! downloaded subscribe-mode IDs in. Both go through [`WatchStore::modify`],
//! which holds the store lock across the read-modify-persist so neither can
//! overwrite the other's update with a stale copy.

use crate::config::WatchPolicy;
use crate::db::Database;
use crate::error::Result;
use crate::types::WatchState;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;

/// In-memory map of [`WatchState`] backed by the database
pub struct WatchStore {
    states: Mutex<HashMap<String, WatchState>>,
    db: Option<Database>,
    initial_interval: std::sync::RwLock<Duration>,
}

impl WatchStore {
    /// A store that is never persisted
    pub fn in_memory(policy: &WatchPolicy) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            db: None,
            initial_interval: std::sync::RwLock::new(crate::watcher::policy::initial_interval(policy)),
        }
    }

    /// Load every persisted state from `db`
    pub async fn load(db: Database, policy: &WatchPolicy) -> Result<Self> {
        let loaded = db.load_watch_states().await?;
        tracing::info!(sources = loaded.len(), "Loaded watch state");

        let states = loaded
            .into_iter()
            .map(|state| (state.source_id.clone(), state))
            .collect();

        let store = Self {
            states: Mutex::new(states),
            db: Some(db),
            initial_interval: std::sync::RwLock::new(crate::watcher::policy::initial_interval(policy)),
        };
        store.apply_policy(policy).await;
        Ok(store)
    }

    fn initial_interval(&self) -> Duration {
        *self
            .initial_interval
            .read()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of one source's state
    pub async fn get(&self, source_id: &str) -> Option<WatchState> {
        self.states.lock().await.get(source_id).cloned()
    }

    /// Copies of every state, ordered by source ID
    pub async fn snapshot(&self) -> Vec<WatchState> {
        let mut states: Vec<WatchState> = self.states.lock().await.values().cloned().collect();
        states.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        states
    }

    /// Atomically update (creating if missing) and persist a source's state
    ///
    /// The persisted row is written before the lock is released. A failed
    /// write is logged; the in-memory update stands.
    pub async fn modify<R>(&self, source_id: &str, update: impl FnOnce(&mut WatchState) -> R) -> R {
        let initial = self.initial_interval();
        let mut states = self.states.lock().await;
        let state = states
            .entry(source_id.to_string())
            .or_insert_with(|| WatchState::new(source_id, initial));
        let result = update(state);

        if let Some(db) = &self.db
            && let Err(e) = db.save_watch_state(state).await
        {
            tracing::error!(source_id, error = %e, "Failed to persist watch state");
        }
        result
    }

    /// Union successfully downloaded IDs into a source's seen set
    pub async fn record_seen(&self, source_id: &str, item_ids: &[String]) {
        if item_ids.is_empty() {
            return;
        }
        self.modify(source_id, |state| {
            state.last_seen_item_ids.extend(item_ids.iter().cloned());
        })
        .await;
    }

    /// Re-bound every interval after a policy change, keeping all other state
    pub async fn apply_policy(&self, policy: &WatchPolicy) {
        *self
            .initial_interval
            .write()
            .unwrap_or_else(|e| e.into_inner()) = crate::watcher::policy::initial_interval(policy);

        let (min, max) = (policy.min_interval(), policy.max_interval());
        let mut states = self.states.lock().await;
        for state in states.values_mut() {
            state.current_poll_interval = state.current_poll_interval.max(min).min(max);
        }
    }

    /// Drop in-memory entries for sources no longer configured
    ///
    /// Persisted rows are kept so a re-added source resumes its history.
    pub async fn retain_sources(&self, source_ids: &HashSet<String>) {
        let mut states = self.states.lock().await;
        let before = states.len();
        states.retain(|id, _| source_ids.contains(id));
        let dropped = before - states.len();
        if dropped > 0 {
            tracing::info!(dropped, "Dropped watch state of removed sources");
        }
    }
}
