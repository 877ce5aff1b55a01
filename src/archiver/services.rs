//! Background service starters: adaptive watcher, interval scheduler and
//! configuration reload.

use crate::config_watcher::ConfigWatcher;
use crate::error::Result;
use crate::interval_scheduler::IntervalScheduler;
use crate::watcher::AdaptiveWatcher;
use std::path::PathBuf;

use super::Archiver;

impl Archiver {
    /// Start every background service
    ///
    /// The watcher and scheduler always run; they idle while disabled in the
    /// configuration and pick up changes live. With `config_path`, the file is
    /// watched and reloaded on change.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be watched.
    pub fn start_services(&self, config_path: Option<PathBuf>) -> Result<()> {
        self.start_watcher();
        self.start_scheduler();
        if let Some(path) = config_path {
            self.start_config_watcher(path)?;
        }
        Ok(())
    }

    /// Start the adaptive watcher background task
    pub fn start_watcher(&self) {
        let watcher = AdaptiveWatcher::new(
            self.runner.clone(),
            self.source_query.clone(),
            self.watch_store.clone(),
            self.settings.watch.subscribe(),
            self.event_tx.clone(),
        );
        *self
            .services
            .watcher_status
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(watcher.status_receiver());

        let handle = tokio::spawn(watcher.run(self.services.shutdown.child_token()));
        self.track(handle);
        tracing::info!("Adaptive watcher background task started");
    }

    /// Start the interval scheduler background task
    pub fn start_scheduler(&self) {
        let scheduler = IntervalScheduler::new(
            self.runner.clone(),
            self.settings.schedule.subscribe(),
            Some(self.db.clone()),
        );
        *self
            .services
            .schedule_times
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(scheduler.times_receiver());

        let handle = tokio::spawn(scheduler.run(self.services.shutdown.child_token()));
        self.track(handle);
        tracing::info!("Interval scheduler background task started");
    }

    /// Watch `path` and apply every valid configuration written to it
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigWatch`](crate::Error::ConfigWatch) when the
    /// file's directory cannot be watched.
    pub fn start_config_watcher(&self, path: PathBuf) -> Result<()> {
        let (config_tx, mut config_rx) = tokio::sync::watch::channel(self.get_config());
        let watcher = ConfigWatcher::new(path.clone(), config_tx)?;
        *self
            .services
            .config_path
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(path);

        let shutdown = self.services.shutdown.child_token();
        self.track(tokio::spawn(watcher.run(shutdown.clone())));

        let archiver = self.clone();
        self.track(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = config_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let config = config_rx.borrow_and_update().clone();
                        if let Err(e) = archiver.apply_config(config).await {
                            tracing::warn!(error = %e, "Reloaded configuration rejected");
                        }
                    }
                }
            }
        }));

        tracing::info!("Config watcher background task started");
        Ok(())
    }

    fn track(&self, handle: tokio::task::JoinHandle<()>) {
        self.services
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }
}
