//! Live configuration reload
//!
//! Watches the configuration file's directory (editors often replace the file
//! rather than write it in place) and publishes every successfully loaded and
//! validated [`Config`] on a watch channel. A file that fails to parse or
//! validate is logged and ignored; the previous configuration stays live.

use crate::config::Config;
use crate::error::{Error, Result};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Bursts of filesystem events closer together than this are one change
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Reloads a configuration file when it changes on disk
pub struct ConfigWatcher {
    watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    path: PathBuf,
    file_name: OsString,
    config_tx: watch::Sender<Config>,
}

impl ConfigWatcher {
    /// Watch `path`, publishing reloaded configurations on `config_tx`
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigWatch`] when the path has no file name or the
    /// filesystem watcher cannot be registered.
    pub fn new(path: impl Into<PathBuf>, config_tx: watch::Sender<Config>) -> Result<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| Error::ConfigWatch(format!("not a file path: {}", path.display())))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                if tx.send(res).is_err() {
                    tracing::debug!("Config watcher receiver dropped");
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|e| Error::ConfigWatch(e.to_string()))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::ConfigWatch(format!("failed to watch {}: {e}", dir.display())))?;
        tracing::info!(path = %path.display(), "Watching configuration file");

        Ok(Self {
            watcher,
            rx,
            path,
            file_name,
            config_tx,
        })
    }

    fn concerns_config(&self, event: &Event) -> bool {
        matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_)
        ) && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(self.file_name.as_os_str()))
    }

    /// Process filesystem events until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.rx.recv() => event,
            };
            match event {
                Some(Ok(event)) if self.concerns_config(&event) => {
                    self.settle().await;
                    self.reload();
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => tracing::error!(error = %e, "Filesystem watcher error"),
                None => break,
            }
        }

        // Dropping the watcher unregisters it
        drop(self.watcher);
        tracing::info!("Config watcher stopped");
    }

    /// Swallow the rest of a burst so a half-written file is not loaded
    async fn settle(&mut self) {
        loop {
            match tokio::time::timeout(SETTLE_DELAY, self.rx.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    }

    fn reload(&self) {
        match Config::load(&self.path) {
            Ok(config) => {
                tracing::info!(
                    path = %self.path.display(),
                    sources = config.sources.len(),
                    "Configuration reloaded"
                );
                self.config_tx.send_replace(config);
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring invalid configuration");
            }
        }
    }
}
