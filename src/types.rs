//! Core types for playlist-archiver

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Unique identifier for an archive run
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl RunId {
    /// Create a new RunId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for RunId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<RunId> for i64 {
    fn from(id: RunId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for RunId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// How a source's items are selected for download
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Every listed item is a download candidate
    #[default]
    Full,
    /// Only items never seen before are downloaded
    Subscribe,
}

impl SourceMode {
    /// Stable string form used in logs and the database
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Full => "full",
            SourceMode::Subscribe => "subscribe",
        }
    }
}

/// Where a source's listing comes from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A playlist or channel listed through yt-dlp
    #[default]
    Playlist,
    /// An RSS/Atom feed fetched over HTTP
    Feed,
}

/// Per-source download options
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Container/audio format for the final file (e.g. "webm", "mp4", "mp3")
    #[serde(default)]
    pub final_format: Option<String>,

    /// Music mode: download audio only and accept audio-only output
    #[serde(default)]
    pub music_mode: bool,
}

/// A remote collection tracked by the archiver
///
/// Built from [`SourceConfig`](crate::config::SourceConfig); immutable for the
/// duration of a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Playlist ID, channel ID or feed identifier
    pub id: String,
    /// Optional human-readable name
    pub name: Option<String>,
    /// Listing backend
    pub kind: SourceKind,
    /// Listing URL override (required for feeds)
    pub url: Option<String>,
    /// Destination folder for downloaded files
    pub folder: PathBuf,
    /// Credential reference (account name); resolved by an external collaborator
    pub account: Option<String>,
    /// Item selection mode
    pub mode: SourceMode,
    /// Download options applied to every item
    pub options: DownloadOptions,
}

impl Source {
    /// Name for logs and notifications
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Source ID under which single-URL runs are recorded
pub const SINGLE_SOURCE_ID: &str = "single";

/// An ad-hoc download of one URL, outside any configured source
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleDownload {
    /// Item URL (http or https)
    pub url: String,
    /// Folder relative to the single-download directory; must stay inside it
    #[serde(default)]
    pub destination: Option<PathBuf>,
    /// Final container/audio format, overriding the default
    #[serde(default)]
    pub final_format: Option<String>,
    /// Download audio only; implied for music.youtube.com URLs
    #[serde(default)]
    pub music_mode: bool,
}

/// One item listed by a source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    /// Stable item ID (video ID, feed entry GUID)
    pub id: String,
    /// URL handed to the extraction tool
    pub url: String,
    /// Title, when the listing provides one
    pub title: Option<String>,
    /// Uploader / channel name
    pub channel: Option<String>,
    /// Upload date as reported by the listing (YYYYMMDD)
    pub upload_date: Option<String>,
}

/// Per-source watcher state, persisted across restarts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WatchState {
    /// Source this state belongs to
    pub source_id: String,
    /// Item IDs already seen (subscribe-mode diffing)
    pub last_seen_item_ids: BTreeSet<String>,
    /// Current adaptive poll interval
    #[serde(with = "crate::config::duration_serde")]
    pub current_poll_interval: Duration,
    /// Polls in a row that found nothing new
    pub consecutive_idle_polls: u32,
    /// When the source was last polled
    pub last_poll_at: Option<DateTime<Utc>>,
    /// When new items were last detected
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Whether the seen set has been recorded at least once
    pub initialized: bool,
    /// Item count observed by the last full-mode poll
    pub last_item_count: Option<u64>,
}

impl WatchState {
    /// Fresh state for a source that has never been polled
    pub fn new(source_id: impl Into<String>, initial_interval: Duration) -> Self {
        Self {
            source_id: source_id.into(),
            last_seen_item_ids: BTreeSet::new(),
            current_poll_interval: initial_interval,
            consecutive_idle_polls: 0,
            last_poll_at: None,
            last_activity_at: None,
            initialized: false,
            last_item_count: None,
        }
    }

    /// Whether the source is due for a poll at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_poll_at {
            None => true,
            Some(last) => {
                let interval = chrono::Duration::from_std(self.current_poll_interval)
                    .unwrap_or(chrono::Duration::MAX);
                now >= last + interval
            }
        }
    }
}

/// Run lifecycle phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    /// No run active
    #[default]
    Idle,
    /// Resolving source listings
    Polling,
    /// Executing downloads
    Downloading,
    /// Recording history and sending notifications
    Finalizing,
}

/// What started a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    /// Operator request (API or library call)
    Manual,
    /// Interval scheduler tick
    Scheduled,
    /// Adaptive watcher batch flush
    Watcher,
}

impl RunTrigger {
    /// Stable string form used in logs and the database
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Manual => "manual",
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Watcher => "watcher",
        }
    }
}

/// Download failure taxonomy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient transport failure; advances the retry ladder
    Network,
    /// The extractor refused this client profile; advances the retry ladder
    ExtractorRejected,
    /// No acceptable format exists for the item; terminal for this run
    UnsupportedFormat,
    /// Local storage problem; terminal and needs operator attention
    Disk,
    /// Operator cancelled the run
    Cancelled,
}

impl ErrorKind {
    /// Stable string form used in logs and the database
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::ExtractorRejected => "extractor_rejected",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::Disk => "disk",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Parse the string form produced by [`ErrorKind::as_str`]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "network" => Some(ErrorKind::Network),
            "extractor_rejected" => Some(ErrorKind::ExtractorRejected),
            "unsupported_format" => Some(ErrorKind::UnsupportedFormat),
            "disk" => Some(ErrorKind::Disk),
            "cancelled" => Some(ErrorKind::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which executor phase produced an attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Single native invocation with JS runtime + remote solver
    Native,
    /// Extractor-profile retry ladder
    Fallback,
}

/// Kind of media file an extraction produced
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Video with an audio track
    MuxedVideo,
    /// Audio stream only
    AudioOnly,
    /// Nothing usable
    #[default]
    None,
}

/// Result of executing one item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadAttempt {
    /// Phase that produced the final result
    pub strategy: Strategy,
    /// Whether an accepted output landed in the destination folder
    pub ok: bool,
    /// Kind of the final output
    pub output_kind: OutputKind,
    /// Failure classification when `ok` is false
    pub error_kind: Option<ErrorKind>,
    /// Fallback ladder steps attempted (0 when native succeeded)
    pub retry_count: u32,
    /// Final path in the destination folder
    pub output_path: Option<PathBuf>,
    /// Client profile that produced the output
    pub profile: Option<String>,
    /// Last diagnostic message from the extractor
    pub message: Option<String>,
}

impl DownloadAttempt {
    /// A failed attempt with the given classification
    pub fn failed(
        strategy: Strategy,
        error_kind: ErrorKind,
        retry_count: u32,
        message: Option<String>,
    ) -> Self {
        Self {
            strategy,
            ok: false,
            output_kind: OutputKind::None,
            error_kind: Some(error_kind),
            retry_count,
            output_path: None,
            profile: None,
            message,
        }
    }
}

/// Resolved item recorded in a run's successes or failures
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    /// Source the item belongs to
    pub source_id: String,
    /// Item ID
    pub item_id: String,
    /// Title, if known
    pub title: Option<String>,
    /// Failure classification (None for successes)
    pub error_kind: Option<ErrorKind>,
    /// Diagnostic message for failures
    pub message: Option<String>,
    /// Final file path for successes
    pub output_path: Option<PathBuf>,
    /// Executor phase that resolved the item
    pub strategy: Option<Strategy>,
    /// Fallback ladder steps attempted
    pub retry_count: u32,
}

impl ItemOutcome {
    /// Outcome for an item that was never attempted because the run was cancelled
    pub fn cancelled(source_id: &str, item: &SourceItem) -> Self {
        Self {
            source_id: source_id.to_string(),
            item_id: item.id.clone(),
            title: item.title.clone(),
            error_kind: Some(ErrorKind::Cancelled),
            message: Some("run cancelled before item was attempted".to_string()),
            output_path: None,
            strategy: None,
            retry_count: 0,
        }
    }

    /// Outcome derived from an executor attempt
    pub fn from_attempt(source_id: &str, item: &SourceItem, attempt: &DownloadAttempt) -> Self {
        Self {
            source_id: source_id.to_string(),
            item_id: item.id.clone(),
            title: item.title.clone(),
            error_kind: attempt.error_kind,
            message: attempt.message.clone(),
            output_path: attempt.output_path.clone(),
            strategy: Some(attempt.strategy),
            retry_count: attempt.retry_count,
        }
    }
}

/// Advisory progress of the item currently downloading
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemProgress {
    /// Percent complete (0-100)
    pub percent: Option<f32>,
    /// Bytes downloaded so far
    pub downloaded_bytes: Option<u64>,
    /// Expected total size
    pub total_bytes: Option<u64>,
    /// Current speed in bytes per second
    pub speed_bps: Option<u64>,
    /// Estimated seconds remaining
    pub eta_secs: Option<u64>,
}

/// Snapshot of the live (or last) run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Run identifier; None before the first run
    pub run_id: Option<RunId>,
    /// Current phase
    pub phase: RunPhase,
    /// What started the run
    pub trigger: Option<RunTrigger>,
    /// Source currently being processed
    pub current_source_id: Option<String>,
    /// Item currently being downloaded
    pub current_item_id: Option<String>,
    /// Items resolved so far in the current source
    pub progress_current: u64,
    /// Items to resolve in the current source
    pub progress_total: u64,
    /// Successfully downloaded items, in resolution order
    pub successes: Vec<ItemOutcome>,
    /// Failed items, in resolution order
    pub failures: Vec<ItemOutcome>,
    /// Run start time
    pub started_at: Option<DateTime<Utc>>,
    /// Run end time
    pub finished_at: Option<DateTime<Utc>>,
    /// Whether cancellation has been requested
    pub cancel_requested: bool,
    /// Last terminal error recorded during the run
    pub last_error: Option<String>,
    /// Advisory progress of the current item
    pub item_progress: Option<ItemProgress>,
}

impl RunState {
    /// Whether a run is currently active
    pub fn is_running(&self) -> bool {
        self.phase != RunPhase::Idle
    }
}

/// Per-source counts in a run summary
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    /// Source ID
    pub source_id: String,
    /// Display name
    pub name: String,
    /// Items downloaded
    pub downloaded: u64,
    /// Items failed
    pub failed: u64,
}

/// Completed run record handed to the history and notification collaborators
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier
    pub run_id: RunId,
    /// What started the run
    pub trigger: RunTrigger,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
    /// Successful items
    pub successes: Vec<ItemOutcome>,
    /// Failed items
    pub failures: Vec<ItemOutcome>,
    /// Per-source counts in processing order
    pub sources: Vec<SourceSummary>,
    /// Whether the run was cancelled
    pub cancelled: bool,
    /// Last terminal error
    pub last_error: Option<String>,
}

/// Stored history row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Row ID
    pub id: i64,
    /// Run that produced this row
    pub run_id: RunId,
    /// Source ID
    pub source_id: String,
    /// Item ID
    pub item_id: String,
    /// Title, if known
    pub title: Option<String>,
    /// Whether the item was downloaded
    pub success: bool,
    /// Failure classification
    pub error_kind: Option<ErrorKind>,
    /// Diagnostic message
    pub message: Option<String>,
    /// Final file path
    pub output_path: Option<PathBuf>,
    /// When the item was resolved
    pub recorded_at: DateTime<Utc>,
}

/// Events emitted by the archiver
///
/// Consumers subscribe through [`Archiver::subscribe`](crate::Archiver::subscribe).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run acquired the single-run gate
    RunStarted {
        /// Run ID
        run_id: RunId,
        /// What started it
        trigger: RunTrigger,
        /// Sources queued, in order
        sources: Vec<String>,
    },

    /// The run moved to a new phase
    PhaseChanged {
        /// Run ID
        run_id: RunId,
        /// New phase
        phase: RunPhase,
    },

    /// A source started processing
    SourceStarted {
        /// Run ID
        run_id: RunId,
        /// Source ID
        source_id: String,
        /// Items selected for download
        total: u64,
    },

    /// Advisory progress for the current item
    ItemProgress {
        /// Run ID
        run_id: RunId,
        /// Item ID
        item_id: String,
        /// Progress values
        progress: ItemProgress,
    },

    /// An item was downloaded
    ItemSucceeded {
        /// Run ID
        run_id: RunId,
        /// Resolved outcome
        outcome: ItemOutcome,
    },

    /// An item failed
    ItemFailed {
        /// Run ID
        run_id: RunId,
        /// Resolved outcome
        outcome: ItemOutcome,
    },

    /// The run finished and the gate was released
    RunFinished {
        /// Run ID
        run_id: RunId,
        /// Number of successes
        successes: u64,
        /// Number of failures
        failures: u64,
        /// Whether the run was cancelled
        cancelled: bool,
    },

    /// The watcher added sources to its pending batch
    BatchQueued {
        /// Sources with new work
        sources: Vec<String>,
    },

    /// The watcher polled a source
    WatcherPolled {
        /// Source ID
        source_id: String,
        /// New items found
        new_items: u64,
        /// Next poll interval in seconds
        next_interval_secs: u64,
    },

    /// A notification could not be delivered
    NotificationFailed {
        /// Notifier name
        notifier: String,
        /// Error message
        error: String,
    },

    /// The archiver is shutting down
    Shutdown,
}

impl Event {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            Event::RunStarted { .. } => "run_started",
            Event::PhaseChanged { .. } => "phase_changed",
            Event::SourceStarted { .. } => "source_started",
            Event::ItemProgress { .. } => "item_progress",
            Event::ItemSucceeded { .. } => "item_succeeded",
            Event::ItemFailed { .. } => "item_failed",
            Event::RunFinished { .. } => "run_finished",
            Event::BatchQueued { .. } => "batch_queued",
            Event::WatcherPolled { .. } => "watcher_polled",
            Event::NotificationFailed { .. } => "notification_failed",
            Event::Shutdown => "shutdown",
        }
    }
}
