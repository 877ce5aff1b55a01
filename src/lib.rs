//! # playlist-archiver
//!
//! Keeps local archives of video playlists, channels and feeds in sync.
//!
//! ## Design Philosophy
//!
//! playlist-archiver is designed to be:
//! - **One run at a time** - Manual, scheduled and watcher runs share a single gate
//! - **Resilient downloads** - Native extraction first, then a ladder of fallback profiles
//! - **Polite polling** - The watcher backs off on idle sources and honours a downtime window
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use playlist_archiver::{Archiver, Config, RunTrigger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("archiver.json")?;
//!     let archiver = Archiver::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = archiver.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     archiver.start_run(RunTrigger::Manual, None)?;
//!     archiver.wait_idle().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Archiver facade (decomposed into focused submodules)
pub mod archiver;
/// Sequential batch execution
pub mod batch;
/// Configuration types
pub mod config;
/// Live configuration reload
pub mod config_watcher;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Per-item download with fallback ladder
pub mod executor;
/// Extraction tool adapters
pub mod extractor;
/// Run history collaborator
pub mod history;
/// Fixed-interval scheduler
pub mod interval_scheduler;
/// Run summary notifications
pub mod notifications;
/// Single-run registry
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Source listing backends
pub mod source_query;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Per-source watch state store
pub mod watch_store;
/// Adaptive watcher
pub mod watcher;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use archiver::Archiver;
pub use config::{Config, SourceConfig, WatchPolicy};
pub use db::Database;
pub use error::{ApiError, DatabaseError, Error, ErrorDetail, Result, ToHttpStatus};
pub use registry::{Busy, CancelOutcome, RunRegistry};
pub use types::{
    ErrorKind, Event, HistoryEntry, ItemOutcome, RunId, RunPhase, RunState, RunSummary,
    RunTrigger, Source, SourceItem, SourceKind, SourceMode, WatchState,
};

/// Helper function to run the archiver with graceful signal handling.
///
/// Waits for a termination signal and then calls the archiver's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use playlist_archiver::{Archiver, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let archiver = Archiver::new(Config::load("archiver.json")?).await?;
///     archiver.start_services(None)?;
///
///     run_with_shutdown(archiver).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(archiver: Archiver) -> Result<()> {
    wait_for_signal().await;
    archiver.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
