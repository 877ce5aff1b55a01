//! Fallback ladder evaluation with capped linear backoff
//!
//! The ladder is an ordered list of profiles. Each step is attempted in turn
//! until one yields an accepted result (short-circuit) or a non-retryable
//! failure stops the fold. Before step `n` (1-based, first step excluded) the
//! ladder sleeps `min(base × (n - 1), cap)`, optionally jittered.
//!
//! # Example
//!
//! ```no_run
//! use playlist_archiver::retry::{BackoffPolicy, LadderOutcome, StepFailure, run_ladder};
//! use playlist_archiver::types::ErrorKind;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let profiles = ["android", "web", "default"];
//! let policy = BackoffPolicy::default();
//! let cancel = CancellationToken::new();
//!
//! let outcome = run_ladder(&profiles, &policy, &cancel, |profile, _step| {
//!     let profile = *profile;
//!     async move {
//!         if profile == "default" {
//!             Ok(format!("downloaded via {profile}"))
//!         } else {
//!             Err(StepFailure::new(ErrorKind::ExtractorRejected, "403"))
//!         }
//!     }
//! })
//! .await;
//!
//! assert!(matches!(outcome, LadderOutcome::Accepted { .. }));
//! # }
//! ```

use crate::config::RetryConfig;
use crate::types::ErrorKind;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for failures that can be classified as retryable or not
///
/// Retryable failures advance the ladder to the next profile. Everything else
/// ends the ladder immediately.
pub trait IsRetryable {
    /// Returns true if the next ladder step should be attempted
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ErrorKind {
    fn is_retryable(&self) -> bool {
        match self {
            ErrorKind::Network | ErrorKind::ExtractorRejected => true,
            ErrorKind::UnsupportedFormat | ErrorKind::Disk | ErrorKind::Cancelled => false,
        }
    }
}

/// Classified failure of a single ladder step
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepFailure {
    /// Failure classification
    pub kind: ErrorKind,
    /// Diagnostic text
    pub message: String,
}

impl StepFailure {
    /// Create a step failure
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl IsRetryable for StepFailure {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Result of folding over a ladder
#[derive(Clone, Debug, PartialEq)]
pub enum LadderOutcome<T> {
    /// A step produced an accepted value
    Accepted {
        /// The accepted value
        value: T,
        /// Number of steps attempted, including the accepting one
        steps: u32,
    },
    /// No step succeeded
    Failed {
        /// Classification of the last failure (or `Cancelled`)
        failure: StepFailure,
        /// Number of steps attempted
        steps: u32,
    },
}

/// Capped linear backoff between ladder steps
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum steps attempted
    pub max_attempts: u32,
    /// Backoff unit
    pub base: Duration,
    /// Backoff cap
    pub cap: Duration,
    /// Add up to 25% random jitter
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base: config.base_backoff,
            cap: config.max_backoff,
            jitter: config.jitter,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the step at `attempt_index` (1-based count of steps already made)
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        self.base.saturating_mul(attempt_index).min(self.cap)
    }
}

/// Fold over `profiles`, returning the first accepted result
///
/// Stops early on a non-retryable failure or on cancellation. Cancellation is
/// observed before each step and during backoff sleeps, never mid-step.
pub async fn run_ladder<P, T, F, Fut>(
    profiles: &[P],
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> LadderOutcome<T>
where
    F: FnMut(&P, u32) -> Fut,
    Fut: Future<Output = Result<T, StepFailure>>,
{
    let limit = profiles.len().min(policy.max_attempts as usize);
    let mut steps = 0u32;
    let mut last_failure = StepFailure::new(
        ErrorKind::UnsupportedFormat,
        "no extractor profiles configured",
    );

    for profile in profiles.iter().take(limit) {
        if steps > 0 {
            let delay = policy.delay_for(steps);
            let delay = if policy.jitter {
                add_jitter(delay)
            } else {
                delay
            };

            tracing::debug!(
                step = steps + 1,
                delay_ms = delay.as_millis() as u64,
                "Backing off before next ladder step"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return LadderOutcome::Failed {
                        failure: StepFailure::new(ErrorKind::Cancelled, "cancelled during backoff"),
                        steps,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if cancel.is_cancelled() {
            return LadderOutcome::Failed {
                failure: StepFailure::new(ErrorKind::Cancelled, "cancelled before ladder step"),
                steps,
            };
        }

        steps += 1;
        match attempt(profile, steps).await {
            Ok(value) => return LadderOutcome::Accepted { value, steps },
            Err(failure) if failure.is_retryable() => {
                tracing::warn!(
                    step = steps,
                    error_kind = %failure.kind,
                    error = %failure.message,
                    "Ladder step failed, advancing"
                );
                last_failure = failure;
            }
            Err(failure) => {
                tracing::warn!(
                    step = steps,
                    error_kind = %failure.kind,
                    error = %failure.message,
                    "Ladder step failed with terminal error"
                );
                return LadderOutcome::Failed { failure, steps };
            }
        }
    }

    LadderOutcome::Failed {
        failure: last_failure,
        steps,
    }
}

/// Add up to 25% random jitter to a delay
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=0.25);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
