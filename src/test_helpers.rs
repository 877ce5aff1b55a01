//! Shared fakes and fixtures for unit tests.

use crate::archiver::Archiver;
use crate::batch::BatchRunner;
use crate::config::{Config, ExtractorProfile, SourceConfig, WatchPolicy};
use crate::db::ActiveRunMarker;
use crate::error::{Error, Result};
use crate::executor::{DownloadExecutor, ExecutorSettings};
use crate::extractor::{ExtractionOutput, ExtractionRequest, Extractor, ProgressSink};
use crate::history::HistorySink;
use crate::notifications::NotificationHub;
use crate::registry::RunRegistry;
use crate::retry::BackoffPolicy;
use crate::source_query::SourceQuery;
use crate::types::{
    DownloadOptions, ErrorKind, Event, OutputKind, RunSummary, Source, SourceItem, SourceKind,
    SourceMode,
};
use crate::watch_store::WatchStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

pub(crate) fn item(id: &str) -> SourceItem {
    SourceItem {
        id: id.to_string(),
        url: format!("https://www.youtube.com/watch?v={id}"),
        title: None,
        channel: None,
        upload_date: None,
    }
}

pub(crate) fn source(id: &str, mode: SourceMode, media_root: &Path) -> Source {
    Source {
        id: id.to_string(),
        name: None,
        kind: SourceKind::Playlist,
        url: None,
        folder: media_root.join(id),
        account: None,
        mode,
        options: DownloadOptions::default(),
    }
}

/// Produces muxed video unless the item is scripted to fail
#[derive(Default)]
pub(crate) struct FakeExtractor {
    pub(crate) failures: HashMap<String, ErrorKind>,
    pub(crate) cancel_after: Option<(String, RunRegistry)>,
    pub(crate) calls: Mutex<Vec<String>>,
}

impl FakeExtractor {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, request: &ExtractionRequest, _progress: ProgressSink) -> ExtractionOutput {
        self.calls.lock().unwrap().push(request.item_id.clone());

        if let Some((item_id, registry)) = &self.cancel_after
            && *item_id == request.item_id
        {
            registry.cancel();
        }

        if let Some(kind) = self.failures.get(&request.item_id) {
            return ExtractionOutput::failed(*kind, format!("scripted {kind}"));
        }
        let path = request.staging_dir.join(format!("{}.webm", request.item_id));
        tokio::fs::write(&path, b"media").await.unwrap();
        ExtractionOutput::produced(path, OutputKind::MuxedVideo)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Listings keyed by source ID; sources in `broken` fail to list
#[derive(Default)]
pub(crate) struct FakeQuery {
    listings: Mutex<HashMap<String, Vec<SourceItem>>>,
    pub(crate) broken: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    queried: Mutex<Vec<String>>,
}

impl FakeQuery {
    pub(crate) fn set(&self, source_id: &str, ids: &[&str]) {
        self.listings
            .lock()
            .unwrap()
            .insert(source_id.to_string(), ids.iter().map(|id| item(id)).collect());
    }

    pub(crate) fn break_source(&self, source_id: &str) {
        self.broken.lock().unwrap().insert(source_id.to_string());
    }

    /// Make every listing of `source_id` take `delay`
    pub(crate) fn slow_source(&self, source_id: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(source_id.to_string(), delay);
    }

    /// Source IDs in query order
    pub(crate) fn queried(&self) -> Vec<String> {
        self.queried.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceQuery for FakeQuery {
    async fn list_items(&self, source: &Source) -> Result<Vec<SourceItem>> {
        self.queried.lock().unwrap().push(source.id.clone());
        let delay = self.delays.lock().unwrap().get(&source.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.broken.lock().unwrap().contains(&source.id) {
            return Err(Error::SourceQuery {
                source_id: source.id.clone(),
                message: "HTTP 503".into(),
            });
        }
        Ok(self
            .listings
            .lock()
            .unwrap()
            .get(&source.id)
            .cloned()
            .unwrap_or_default())
    }
}

/// History kept in memory
#[derive(Default)]
pub(crate) struct MemoryHistory {
    pub(crate) runs: Mutex<Vec<RunSummary>>,
    pub(crate) markers: Mutex<Vec<ActiveRunMarker>>,
    pub(crate) fail_record: bool,
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn begin_run(&self, marker: &ActiveRunMarker) -> Result<()> {
        self.markers.lock().unwrap().push(marker.clone());
        Ok(())
    }

    async fn record_run(&self, summary: &RunSummary) -> Result<()> {
        if self.fail_record {
            return Err(Error::Other("disk full".into()));
        }
        self.runs.lock().unwrap().push(summary.clone());
        Ok(())
    }

    async fn is_downloaded(&self, source_id: &str, item_id: &str) -> Result<bool> {
        Ok(self.runs.lock().unwrap().iter().any(|run| {
            run.successes
                .iter()
                .any(|o| o.source_id == source_id && o.item_id == item_id)
        }))
    }
}

/// A batch runner wired to in-memory fakes
pub(crate) struct TestHarness {
    pub(crate) root: TempDir,
    pub(crate) runner: BatchRunner,
    pub(crate) registry: RunRegistry,
    pub(crate) query: Arc<FakeQuery>,
    pub(crate) history: Arc<MemoryHistory>,
    pub(crate) extractor: Arc<FakeExtractor>,
    pub(crate) watch_store: Arc<WatchStore>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) events: broadcast::Receiver<Event>,
}

/// Knobs for [`TestHarness::build`]
#[derive(Default)]
pub(crate) struct HarnessOptions<'a> {
    pub(crate) failures: &'a [(&'a str, ErrorKind)],
    pub(crate) cancel_after: Option<&'a str>,
    pub(crate) history: MemoryHistory,
    pub(crate) policy: WatchPolicy,
}

impl TestHarness {
    pub(crate) fn new() -> Self {
        Self::build(HarnessOptions::default())
    }

    pub(crate) fn build(options: HarnessOptions<'_>) -> Self {
        let root = TempDir::new().unwrap();
        let (event_tx, events) = broadcast::channel(1024);
        let registry = RunRegistry::new(event_tx.clone());

        let extractor = Arc::new(FakeExtractor {
            failures: options
                .failures
                .iter()
                .map(|(id, kind)| (id.to_string(), *kind))
                .collect(),
            cancel_after: options
                .cancel_after
                .map(|id| (id.to_string(), registry.clone())),
            calls: Mutex::new(Vec::new()),
        });
        let settings = ExecutorSettings {
            temp_dir: root.path().join("temp"),
            min_free_space: 0,
            attempt_timeout: Duration::from_secs(30),
            cookies_file: None,
            backoff: BackoffPolicy {
                max_attempts: 2,
                base: Duration::ZERO,
                cap: Duration::ZERO,
                jitter: false,
            },
            ladder: ExtractorProfile::default_ladder(false),
        };
        let executor = Arc::new(DownloadExecutor::new(extractor.clone(), settings));
        let query = Arc::new(FakeQuery::default());
        let history = Arc::new(options.history);
        let watch_store = Arc::new(WatchStore::in_memory(&options.policy));

        let runner = BatchRunner::new(
            registry.clone(),
            executor,
            query.clone(),
            history.clone(),
            watch_store.clone(),
            NotificationHub::new(event_tx.clone()),
        );

        Self {
            root,
            runner,
            registry,
            query,
            history,
            extractor,
            watch_store,
            event_tx,
            events,
        }
    }

    pub(crate) fn source(&self, id: &str, mode: SourceMode) -> Source {
        source(id, mode, &self.root.path().join("media"))
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.extractor.calls()
    }

    pub(crate) fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub(crate) fn source_config(id: &str, mode: SourceMode) -> SourceConfig {
    SourceConfig {
        id: id.to_string(),
        name: None,
        kind: SourceKind::Playlist,
        url: None,
        folder: PathBuf::from(id),
        account: None,
        mode,
        final_format: None,
        music_mode: false,
    }
}

/// Configuration rooted in `root` with full-mode sources and instant retries
pub(crate) fn archiver_config(root: &Path, sources: &[&str]) -> Config {
    let mut config = Config::default();
    config.download.download_dir = root.join("downloads");
    config.download.temp_dir = root.join("temp");
    config.download.min_free_space = 0;
    config.persistence.database_path = root.join("archive.db");
    config.retry.max_attempts = 2;
    config.retry.base_backoff = Duration::ZERO;
    config.retry.max_backoff = Duration::ZERO;
    config.retry.jitter = false;
    config.sources = sources
        .iter()
        .map(|id| source_config(id, SourceMode::Full))
        .collect();
    config
}

/// An archiver over a real database and scripted backends
pub(crate) struct ArchiverFixture {
    pub(crate) _root: TempDir,
    pub(crate) archiver: Archiver,
    pub(crate) query: Arc<FakeQuery>,
    pub(crate) extractor: Arc<FakeExtractor>,
}

pub(crate) async fn archiver_fixture_with(
    root: TempDir,
    config: Config,
    extractor: FakeExtractor,
) -> ArchiverFixture {
    let query = Arc::new(FakeQuery::default());
    let extractor = Arc::new(extractor);
    let archiver = Archiver::with_components(config, extractor.clone(), query.clone())
        .await
        .unwrap();
    ArchiverFixture {
        _root: root,
        archiver,
        query,
        extractor,
    }
}

pub(crate) async fn archiver_fixture(sources: &[&str]) -> ArchiverFixture {
    let root = TempDir::new().unwrap();
    let config = archiver_config(root.path(), sources);
    archiver_fixture_with(root, config, FakeExtractor::default()).await
}
