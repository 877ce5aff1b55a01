//! Configuration reload and shutdown coordination.

use crate::config::{Config, ScheduleConfig, ScheduleUpdate};
use crate::error::{Error, Result};
use crate::interval_scheduler::ScheduleSettings;
use crate::registry::CancelOutcome;
use crate::types::Event;
use crate::watcher::WatchSettings;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::Archiver;

/// How long shutdown waits for the active run to observe cancellation
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl Archiver {
    /// Swap in a new configuration
    ///
    /// Sources, watch policy and schedule take effect immediately; watch state
    /// of every source survives, and sources no longer configured have their
    /// in-memory entry dropped. Download, tool, retry, notification and API
    /// settings keep their startup values until restart.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] listing every validation problem; nothing is
    /// applied in that case.
    pub async fn apply_config(&self, config: Config) -> Result<()> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(Error::Config {
                message: problems.join("; "),
                key: None,
            });
        }

        self.watch_store.apply_policy(&config.watch_policy).await;
        let sources = config.resolved_sources();
        let ids: HashSet<String> = sources.iter().map(|s| s.id.clone()).collect();
        self.watch_store.retain_sources(&ids).await;

        let watch = WatchSettings {
            policy: config.watch_policy.clone(),
            sources: sources.clone(),
        };
        self.settings.watch.send_if_modified(|current| {
            let changed = *current != watch;
            if changed {
                *current = watch;
            }
            changed
        });

        let schedule = ScheduleSettings {
            schedule: config.schedule.clone(),
            sources,
        };
        self.settings.schedule.send_if_modified(|current| {
            let changed = *current != schedule;
            if changed {
                *current = schedule;
            }
            changed
        });

        tracing::info!(
            sources = ids.len(),
            watcher_enabled = config.watch_policy.enabled,
            schedule_enabled = config.schedule.enabled,
            "Configuration applied"
        );
        self.settings.config.send_replace(config);
        Ok(())
    }

    /// Change the interval schedule at runtime
    ///
    /// The merged schedule is validated and applied like a reload. When a
    /// configuration file is being watched, the updated configuration is also
    /// written back to it so the change survives a restart.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the merged schedule is invalid (nothing
    /// changes), or an I/O error when the file cannot be written.
    pub async fn update_schedule(&self, update: &ScheduleUpdate) -> Result<ScheduleConfig> {
        let mut config = self.get_config();
        update.apply_to(&mut config.schedule);
        let schedule = config.schedule.clone();
        self.apply_config(config.clone()).await?;

        let path = self
            .services
            .config_path
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(path) = path {
            config.save(&path).await?;
            tracing::info!(path = %path.display(), "Schedule written to configuration file");
        }
        Ok(schedule)
    }

    /// Gracefully shut down the archiver
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new runs
    /// 2. Stops the watcher, scheduler and config watcher and waits for them
    /// 3. Cancels the active run and waits for it (30 second timeout)
    /// 4. Marks a clean shutdown in the database
    ///
    /// # Errors
    ///
    /// Never fails at present; persistence problems during shutdown are
    /// logged and the sequence continues.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.services.accepting_new.store(false, Ordering::SeqCst);
        self.services.shutdown.cancel();

        // Services first, so none of them starts a run after the cancel
        let handles: Vec<_> = self
            .services
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        if let CancelOutcome::Accepted(run_id) = self.registry.cancel() {
            tracing::info!(run_id = %run_id, "Cancelled active run");
        }
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.registry.wait_idle()).await {
            Ok(()) => tracing::info!("No run active"),
            Err(_) => tracing::warn!("Timeout waiting for the active run, proceeding with shutdown"),
        }

        if let Err(e) = self.db.set_clean_shutdown().await {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        } else {
            tracing::info!("Marked clean shutdown in database");
        }

        self.event_tx.send(Event::Shutdown).ok();
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
