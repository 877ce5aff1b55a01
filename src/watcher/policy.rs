//! Pure interval and detection rules for the adaptive watcher.
//!
//! Nothing here performs I/O; the watcher loop feeds poll results in and
//! persists the updated [`WatchState`].

use crate::config::WatchPolicy;
use crate::types::{SourceItem, SourceMode, WatchState};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Interval assigned to a source that has never been polled
pub fn initial_interval(policy: &WatchPolicy) -> Duration {
    policy.min_interval()
}

/// Keep `interval` within `[min, max]` without panicking on inverted bounds
fn bound(interval: Duration, policy: &WatchPolicy) -> Duration {
    interval.max(policy.min_interval()).min(policy.max_interval())
}

/// Interval after a poll that found new items
pub fn active_interval(policy: &WatchPolicy) -> Duration {
    bound(policy.active_reset(), policy)
}

/// Interval after the `idle_polls`-th consecutive idle poll
///
/// The first idle poll of a streak keeps the current interval; every further
/// one multiplies it by `idle_backoff_factor`.
pub fn idle_interval(current: Duration, idle_polls: u32, policy: &WatchPolicy) -> Duration {
    let next = if idle_polls <= 1 {
        current
    } else {
        current.saturating_mul(policy.idle_backoff_factor.max(1))
    };
    bound(next, policy)
}

/// New items found by diffing a listing against watch state
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListingDiff {
    /// Items not seen before, in listing order
    pub new_items: Vec<SourceItem>,
    /// This poll established the baseline; nothing is reported as new
    pub baseline: bool,
}

impl ListingDiff {
    /// Whether the poll detected work
    pub fn has_new_items(&self) -> bool {
        !self.new_items.is_empty()
    }
}

/// Compare a listing against the seen set
///
/// The first poll of any source records a baseline and reports nothing new.
pub fn diff_listing(state: &WatchState, listing: &[SourceItem]) -> ListingDiff {
    if !state.initialized {
        return ListingDiff {
            new_items: Vec::new(),
            baseline: true,
        };
    }
    let new_items = listing
        .iter()
        .filter(|item| !state.last_seen_item_ids.contains(&item.id))
        .cloned()
        .collect();
    ListingDiff {
        new_items,
        baseline: false,
    }
}

/// Fold a completed poll into `state`
///
/// Subscribe sources only change their seen set on the baseline poll; after
/// that the batch runner owns it. Full sources track the listing snapshot on
/// every poll.
pub fn apply_poll(
    state: &mut WatchState,
    mode: SourceMode,
    listing: &[SourceItem],
    diff: &ListingDiff,
    now: DateTime<Utc>,
    policy: &WatchPolicy,
) {
    if diff.baseline || mode == SourceMode::Full {
        state.last_seen_item_ids = listing.iter().map(|item| item.id.clone()).collect();
    }
    state.initialized = true;
    state.last_item_count = Some(listing.len() as u64);
    state.last_poll_at = Some(now);

    if diff.has_new_items() {
        state.consecutive_idle_polls = 0;
        state.last_activity_at = Some(now);
        state.current_poll_interval = active_interval(policy);
    } else {
        state.consecutive_idle_polls = state.consecutive_idle_polls.saturating_add(1);
        state.current_poll_interval =
            idle_interval(state.current_poll_interval, state.consecutive_idle_polls, policy);
    }
}

/// When `state` is next due for a poll
pub fn next_poll_at(state: &WatchState) -> Option<DateTime<Utc>> {
    let last = state.last_poll_at?;
    let interval = chrono::Duration::from_std(state.current_poll_interval).ok()?;
    Some(last + interval)
}
