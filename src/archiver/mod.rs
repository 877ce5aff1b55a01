//! The archiver facade, split into focused submodules.
//!
//! [`Archiver`] owns every long-lived component and wires them together:
//! - [`control`] - Manual runs, cancellation and read-only queries
//! - [`services`] - Watcher, scheduler and config-reload background tasks
//! - [`lifecycle`] - Configuration reload and graceful shutdown

mod control;
mod lifecycle;
mod services;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::batch::BatchRunner;
use crate::config::Config;
use crate::db::{Database, ScheduleTimes};
use crate::error::{Error, Result};
use crate::executor::{DownloadExecutor, ExecutorSettings};
use crate::extractor::{Extractor, YtDlpExtractor};
use crate::interval_scheduler::ScheduleSettings;
use crate::notifications::NotificationHub;
use crate::registry::RunRegistry;
use crate::source_query::{FeedSourceQuery, SourceQuery, SourceQueryRouter, YtDlpSourceQuery};
use crate::types::Event;
use crate::watch_store::WatchStore;
use crate::watcher::{WatchSettings, WatcherStatus};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Live configuration and the settings derived from it
pub(crate) struct LiveSettings {
    /// Current configuration; replaced on reload
    pub(crate) config: watch::Sender<Config>,
    /// Watcher inputs derived from `config`
    pub(crate) watch: watch::Sender<WatchSettings>,
    /// Scheduler inputs derived from `config`
    pub(crate) schedule: watch::Sender<ScheduleSettings>,
}

/// Handles of the background services
pub(crate) struct Services {
    /// Cancelled on shutdown; stops every service loop
    pub(crate) shutdown: CancellationToken,
    /// Cleared on shutdown; new runs are refused afterwards
    pub(crate) accepting_new: AtomicBool,
    pub(crate) watcher_status: Mutex<Option<watch::Receiver<WatcherStatus>>>,
    pub(crate) schedule_times: Mutex<Option<watch::Receiver<ScheduleTimes>>>,
    /// Watched configuration file; runtime changes are written back to it
    pub(crate) config_path: Mutex<Option<PathBuf>>,
    pub(crate) handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Archiver instance (cloneable; all state is shared)
#[derive(Clone)]
pub struct Archiver {
    /// Database for history, watch state and runtime markers
    /// Public for integration tests to inspect persisted state
    pub db: Database,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) registry: RunRegistry,
    pub(crate) runner: BatchRunner,
    pub(crate) source_query: Arc<dyn SourceQuery>,
    pub(crate) watch_store: Arc<WatchStore>,
    pub(crate) settings: Arc<LiveSettings>,
    pub(crate) services: Arc<Services>,
}

impl Archiver {
    /// Create an archiver that drives yt-dlp
    ///
    /// Discovers yt-dlp (and ffprobe/node) per `config.tools`, then calls
    /// [`with_components`](Self::with_components).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExternalTool`] when yt-dlp cannot be found, plus any
    /// error from [`with_components`](Self::with_components).
    pub async fn new(config: Config) -> Result<Self> {
        let extractor = Arc::new(YtDlpExtractor::from_config(&config.tools)?);
        let playlists = Arc::new(YtDlpSourceQuery::from_config(&config.tools)?);
        let feeds = Arc::new(FeedSourceQuery::new()?);
        let source_query = Arc::new(SourceQueryRouter::new(playlists, feeds));
        Self::with_components(config, extractor, source_query).await
    }

    /// Create an archiver around explicit extraction and listing backends
    ///
    /// This initializes all core components:
    /// - Creates the download and temp directories
    /// - Opens the SQLite database and runs migrations
    /// - Records a run left active by a crashed process as interrupted
    /// - Loads persisted watch state
    /// - Builds the executor, notifiers and batch runner
    ///
    /// Background services are not started; see
    /// [`start_services`](Self::start_services).
    pub async fn with_components(
        config: Config,
        extractor: Arc<dyn Extractor>,
        source_query: Arc<dyn SourceQuery>,
    ) -> Result<Self> {
        for (label, dir) in [
            ("download", &config.download.download_dir),
            ("temp", &config.download.temp_dir),
        ] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {label} directory '{}': {e}", dir.display()),
                ))
            })?;
        }

        let db = Database::new(&config.persistence.database_path).await?;
        if db.was_unclean_shutdown().await? {
            tracing::warn!("Previous session did not shut down cleanly");
        }
        db.set_clean_start().await?;

        if let Some(marker) = db.recover_stale_run().await? {
            tracing::warn!(
                run_id = %marker.run_id,
                trigger = marker.trigger.as_str(),
                "Run from a previous session was interrupted; recorded in history"
            );
        }

        let (event_tx, _rx) = broadcast::channel(1000);

        let registry = RunRegistry::new(event_tx.clone());
        registry.set_next_run_id(db.max_run_id().await? + 1);

        let watch_store = Arc::new(WatchStore::load(db.clone(), &config.watch_policy).await?);
        let executor = Arc::new(DownloadExecutor::new(
            extractor,
            ExecutorSettings::from_config(&config),
        ));
        let notifications = NotificationHub::from_config(&config.notifications, event_tx.clone())?;
        tracing::info!(notifiers = notifications.len(), "Notification hub initialized");

        let runner = BatchRunner::new(
            registry.clone(),
            executor,
            source_query.clone(),
            Arc::new(db.clone()),
            watch_store.clone(),
            notifications,
        );

        let sources = config.resolved_sources();
        let settings = LiveSettings {
            watch: watch::Sender::new(WatchSettings {
                policy: config.watch_policy.clone(),
                sources: sources.clone(),
            }),
            schedule: watch::Sender::new(ScheduleSettings {
                schedule: config.schedule.clone(),
                sources,
            }),
            config: watch::Sender::new(config),
        };

        let services = Services {
            shutdown: CancellationToken::new(),
            accepting_new: AtomicBool::new(true),
            watcher_status: Mutex::new(None),
            schedule_times: Mutex::new(None),
            config_path: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        };

        Ok(Self {
            db,
            event_tx,
            registry,
            runner,
            source_query,
            watch_store,
            settings: Arc::new(settings),
            services: Arc::new(services),
        })
    }

    /// Subscribe to archiver events
    ///
    /// Each subscriber receives every event independently. A subscriber more
    /// than 1000 events behind receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Current configuration
    pub fn get_config(&self) -> Config {
        self.settings.config.borrow().clone()
    }

    /// Spawn the REST API server in a background task
    pub fn spawn_api_server(&self) -> JoinHandle<Result<()>> {
        let archiver = self.clone();
        let config = self.get_config();
        tokio::spawn(async move { crate::api::start_api_server(archiver, config.api).await })
    }
}
