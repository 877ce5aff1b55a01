//! Resettable-deadline debounce.
//!
//! Every [`Debounce::trigger`] pushes the deadline to `now + window`. The
//! owner awaits [`Debounce::expiry`] alongside its other events; an unarmed
//! debounce never fires.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Quiet-window timer
#[derive(Clone, Debug)]
pub struct Debounce {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    /// Create an unarmed debounce with the given quiet window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Quiet window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Change the window; an armed deadline is left untouched until the next trigger
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    /// Arm (or re-arm) the deadline at `now + window`
    pub fn trigger(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    /// Disarm
    pub fn clear(&mut self) {
        self.deadline = None;
    }

    /// Current deadline, if armed
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the deadline is armed
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Whether the armed deadline has passed at `now`
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Future completing at the current deadline (pending forever when unarmed)
    ///
    /// The future does not borrow `self`, so the debounce may be re-armed while
    /// it is outstanding; callers re-create it after each trigger.
    pub fn expiry(&self) -> impl Future<Output = ()> + Send + use<> {
        let deadline = self.deadline;
        async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        }
    }
}
