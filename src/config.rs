//! Configuration types for playlist-archiver

use crate::error::{Error, Result};
use crate::types::{DownloadOptions, SINGLE_SOURCE_ID, Source, SourceKind, SourceMode};
use crate::watcher::downtime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the archiver
///
/// Loaded from a JSON file with [`Config::load`]. Every section has defaults,
/// so an empty object `{}` is a valid (if useless) configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Directories, disk thresholds and per-attempt timeout
    #[serde(default)]
    pub download: DownloadConfig,

    /// External tool paths (yt-dlp, ffprobe, JS runtime)
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Fallback ladder bounds and backoff
    #[serde(default)]
    pub retry: RetryConfig,

    /// Ordered extractor profiles tried during fallback (empty = built-in ladder)
    #[serde(default)]
    pub extractor_profiles: Vec<ExtractorProfile>,

    /// Tracked sources, processed in this order
    #[serde(default, alias = "playlists")]
    pub sources: Vec<SourceConfig>,

    /// Adaptive watcher policy
    #[serde(default)]
    pub watch_policy: WatchPolicy,

    /// Fixed-interval full runs
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Run summary delivery
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Database location
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,
}

/// Download directories and per-attempt limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Base directory for relative source folders (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Staging directory for in-progress downloads (default: "./temp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Minimum free space in the destination before an attempt starts (default: 1 GB)
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,

    /// Upper bound for a single extraction tool invocation (default: 30 minutes)
    #[serde(default = "default_attempt_timeout", with = "duration_serde")]
    pub attempt_timeout: Duration,

    /// Base directory for single-URL downloads (default: "<download_dir>/single")
    #[serde(default)]
    pub single_download_dir: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            temp_dir: default_temp_dir(),
            min_free_space: default_min_free_space(),
            attempt_timeout: default_attempt_timeout(),
            single_download_dir: None,
        }
    }
}

/// External tool paths
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to yt-dlp (auto-detected if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Path to ffprobe (auto-detected if None)
    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// Path to the JavaScript runtime handed to yt-dlp (node; auto-detected if None)
    #[serde(default)]
    pub js_runtime_path: Option<PathBuf>,

    /// Netscape cookie file enabling the final `best` ladder step
    #[serde(default, alias = "yt_dlp_cookies")]
    pub cookies_file: Option<PathBuf>,

    /// Whether to search PATH for binaries when explicit paths are not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            ffprobe_path: None,
            js_runtime_path: None,
            cookies_file: None,
            search_path: true,
        }
    }
}

/// Fallback ladder bounds
///
/// Backoff before ladder step `n` (1-based) is `min(base_backoff × n, max_backoff)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum ladder steps per item (default: 6)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit (default: 5 seconds)
    #[serde(default = "default_base_backoff", with = "duration_serde")]
    pub base_backoff: Duration,

    /// Backoff cap (default: 60 seconds)
    #[serde(default = "default_max_backoff", with = "duration_serde")]
    pub max_backoff: Duration,

    /// Add up to 25% random jitter to each backoff (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff: default_base_backoff(),
            max_backoff: default_max_backoff(),
            jitter: true,
        }
    }
}

/// Format preference of a ladder step
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatPreference {
    /// Container-constrained selector derived from the item's final format
    #[default]
    Strict,
    /// `bestvideo+bestaudio/best`
    Permissive,
    /// `best` (single pre-muxed file)
    Best,
}

/// One client-identity / format-preference step of the fallback ladder
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorProfile {
    /// Step name used in logs and outcomes
    pub name: String,

    /// `player_client` extractor argument (None = extractor default)
    #[serde(default)]
    pub client: Option<String>,

    /// Extra HTTP headers sent by the extractor
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Format selector preference
    #[serde(default)]
    pub format: FormatPreference,

    /// Pass the configured cookie file
    #[serde(default)]
    pub use_cookies: bool,
}

impl ExtractorProfile {
    fn hardened(name: &str, user_agent: &str) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("User-Agent".to_string(), user_agent.to_string());
        headers.insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());
        Self {
            name: name.to_string(),
            client: Some(name.to_string()),
            headers,
            format: FormatPreference::Strict,
            use_cookies: false,
        }
    }

    fn plain(name: &str, format: FormatPreference, use_cookies: bool) -> Self {
        Self {
            name: name.to_string(),
            client: None,
            headers: BTreeMap::new(),
            format,
            use_cookies,
        }
    }

    /// Built-in ladder: hardened clients, then the default client with
    /// progressively looser selectors, then `best` with cookies when available
    pub fn default_ladder(with_cookies: bool) -> Vec<ExtractorProfile> {
        let mut ladder = vec![
            Self::hardened(
                "android",
                "com.google.android.youtube/19.42.37 (Linux; Android 14)",
            ),
            Self::hardened(
                "tv_embedded",
                "Mozilla/5.0 (SmartTV; Linux; Tizen 6.5) AppleWebKit/537.36",
            ),
            Self::hardened(
                "web",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Safari/605.1.15",
            ),
            Self::plain("default", FormatPreference::Strict, false),
            Self::plain("default_permissive", FormatPreference::Permissive, false),
        ];
        if with_cookies {
            ladder.push(Self::plain("cookies_best", FormatPreference::Best, true));
        }
        ladder
    }
}

/// Source definition as written in the config file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Playlist/channel/feed identifier
    #[serde(alias = "playlist_id")]
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Listing backend (default: playlist)
    #[serde(default)]
    pub kind: SourceKind,

    /// Listing URL (required for feeds, optional override for playlists)
    #[serde(default)]
    pub url: Option<String>,

    /// Destination folder; relative paths resolve against `download.download_dir`
    #[serde(alias = "directory")]
    pub folder: PathBuf,

    /// Account reference for credentialed listings
    #[serde(default)]
    pub account: Option<String>,

    /// Item selection mode (default: full)
    #[serde(default)]
    pub mode: SourceMode,

    /// Container/audio format for the final file
    #[serde(default)]
    pub final_format: Option<String>,

    /// Download audio only
    #[serde(default)]
    pub music_mode: bool,
}

impl SourceConfig {
    /// Build the run-time [`Source`], resolving the folder against `base_dir`
    pub fn to_source(&self, base_dir: &Path) -> Source {
        let folder = if self.folder.is_absolute() {
            self.folder.clone()
        } else {
            base_dir.join(&self.folder)
        };
        Source {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            url: self.url.clone(),
            folder,
            account: self.account.clone(),
            mode: self.mode,
            options: DownloadOptions {
                final_format: self.final_format.clone(),
                music_mode: self.music_mode,
            },
        }
    }
}

/// Adaptive watcher policy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WatchPolicy {
    /// Run the watcher at all (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Interval floor in minutes (default: 5)
    #[serde(default = "default_min_interval_minutes")]
    pub min_interval_minutes: u64,

    /// Interval cap in minutes (default: 360)
    #[serde(default = "default_max_interval_minutes")]
    pub max_interval_minutes: u64,

    /// Multiplier applied after each consecutive idle poll (default: 2)
    #[serde(default = "default_idle_backoff_factor")]
    pub idle_backoff_factor: u32,

    /// Interval in minutes after a poll that found new items (default: 5)
    #[serde(default = "default_active_reset_minutes")]
    pub active_reset_minutes: u64,

    /// Silence after the last detection before a batch is flushed (default: 60)
    #[serde(default = "default_quiet_window_seconds")]
    pub quiet_window_seconds: u64,

    /// Local-time window during which polling is paused
    #[serde(default)]
    pub downtime: DowntimeConfig,
}

impl Default for WatchPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            min_interval_minutes: default_min_interval_minutes(),
            max_interval_minutes: default_max_interval_minutes(),
            idle_backoff_factor: default_idle_backoff_factor(),
            active_reset_minutes: default_active_reset_minutes(),
            quiet_window_seconds: default_quiet_window_seconds(),
            downtime: DowntimeConfig::default(),
        }
    }
}

impl WatchPolicy {
    /// Interval floor
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_minutes.saturating_mul(60))
    }

    /// Interval cap
    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_minutes.saturating_mul(60))
    }

    /// Interval after activity
    pub fn active_reset(&self) -> Duration {
        Duration::from_secs(self.active_reset_minutes.saturating_mul(60))
    }

    /// Quiet window
    pub fn quiet_window(&self) -> Duration {
        Duration::from_secs(self.quiet_window_seconds)
    }
}

/// Downtime window (HH:MM local times; may wrap midnight)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DowntimeConfig {
    /// Whether the window applies (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Window start, "HH:MM" (default: "23:00")
    #[serde(default = "default_downtime_start")]
    pub start: String,

    /// Window end, "HH:MM" (default: "07:00")
    #[serde(default = "default_downtime_end")]
    pub end: String,

    /// "local"/"system", "UTC" or an IANA zone name (default: "local")
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for DowntimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start: default_downtime_start(),
            end: default_downtime_end(),
            timezone: default_timezone(),
        }
    }
}

/// Fixed-interval scheduler settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Run the scheduler (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Hours between full runs (default: 6)
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Start a run as soon as the scheduler starts (default: false)
    #[serde(default)]
    pub run_on_startup: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: default_interval_hours(),
            run_on_startup: false,
        }
    }
}

impl ScheduleConfig {
    /// Interval between runs
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours.saturating_mul(3600))
    }
}

/// Partial schedule change; unset fields keep their current value
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    /// Turn the scheduler on or off
    #[serde(default)]
    pub enabled: Option<bool>,

    /// New interval in hours (must be >= 1)
    #[serde(default)]
    pub interval_hours: Option<u64>,

    /// Run as soon as the scheduler (re)starts
    #[serde(default)]
    pub run_on_startup: Option<bool>,
}

impl ScheduleUpdate {
    /// Overlay the set fields onto `schedule`
    pub fn apply_to(&self, schedule: &mut ScheduleConfig) {
        if let Some(enabled) = self.enabled {
            schedule.enabled = enabled;
        }
        if let Some(hours) = self.interval_hours {
            schedule.interval_hours = hours;
        }
        if let Some(run_on_startup) = self.run_on_startup {
            schedule.run_on_startup = run_on_startup;
        }
    }
}

/// Run summary delivery
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Telegram bot delivery
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    /// Generic JSON webhooks
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

/// Telegram Bot API settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token
    pub bot_token: String,

    /// Destination chat
    pub chat_id: String,

    /// API base URL (default: "https://api.telegram.org")
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

/// Webhook endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// URL receiving a JSON POST per finished run
    pub url: String,

    /// Optional bearer token
    #[serde(default)]
    pub auth_header: Option<String>,

    /// Request timeout (default: 30 seconds)
    #[serde(default = "default_webhook_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Only notify runs that had at least one success or failure (default: true)
    #[serde(default = "default_true")]
    pub skip_empty_runs: bool,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./playlist-archiver.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Serve the API at all (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind to (default: 127.0.0.1:8090)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Optional API key for authentication
    #[serde(default)]
    pub api_key: Option<String>,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            api_key: None,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

impl Config {
    /// Read, parse and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Write the configuration to `path` as pretty JSON
    ///
    /// The document goes to a hidden sibling first and is renamed over `path`,
    /// so readers never see a partial file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("config.json");
        let staged = path.with_file_name(format!(".{file_name}.tmp"));

        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&staged, json).await?;
        if let Err(e) = tokio::fs::rename(&staged, path).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw).map_err(|e| Error::Config {
            message: format!("invalid config JSON: {e}"),
            key: None,
        })?;

        let problems = config.validate();
        if !problems.is_empty() {
            return Err(Error::Config {
                message: problems.join("; "),
                key: None,
            });
        }
        Ok(config)
    }

    /// Structural validation, returning every problem found
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut seen = HashSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            if source.id.trim().is_empty() {
                errors.push(format!("sources[{idx}] missing id"));
            } else if source.id == SINGLE_SOURCE_ID {
                errors.push(format!("sources[{idx}] id '{SINGLE_SOURCE_ID}' is reserved for single-URL runs"));
            } else if !seen.insert(source.id.as_str()) {
                errors.push(format!("sources[{idx}] duplicate id '{}'", source.id));
            }
            if source.folder.as_os_str().is_empty() {
                errors.push(format!("sources[{idx}] missing folder"));
            }
            match &source.url {
                Some(url) if !is_http_url(url) => {
                    errors.push(format!("sources[{idx}] url '{url}' is not an http(s) URL"));
                }
                None if source.kind == SourceKind::Feed => {
                    errors.push(format!("sources[{idx}] feed sources require url"));
                }
                _ => {}
            }
        }

        for (idx, webhook) in self.notifications.webhooks.iter().enumerate() {
            if !is_http_url(&webhook.url) {
                errors.push(format!("notifications.webhooks[{idx}] url is not an http(s) URL"));
            }
        }
        if let Some(telegram) = &self.notifications.telegram
            && !is_http_url(&telegram.api_base)
        {
            errors.push("notifications.telegram.api_base is not an http(s) URL".into());
        }

        let policy = &self.watch_policy;
        if policy.min_interval_minutes < 1 {
            errors.push("watch_policy.min_interval_minutes must be >= 1".into());
        }
        if policy.max_interval_minutes < 1 {
            errors.push("watch_policy.max_interval_minutes must be >= 1".into());
        }
        if policy.max_interval_minutes < policy.min_interval_minutes {
            errors.push("watch_policy.max_interval_minutes must be >= min_interval_minutes".into());
        }
        if policy.idle_backoff_factor < 1 {
            errors.push("watch_policy.idle_backoff_factor must be >= 1".into());
        }
        if policy.active_reset_minutes < 1 {
            errors.push("watch_policy.active_reset_minutes must be >= 1".into());
        }
        if policy.downtime.enabled {
            for (key, value) in [
                ("start", &policy.downtime.start),
                ("end", &policy.downtime.end),
            ] {
                if downtime::parse_hhmm(value).is_none() {
                    errors.push(format!("watch_policy.downtime.{key} must be a string (HH:MM)"));
                }
            }
            if downtime::DowntimeZone::parse(&policy.downtime.timezone).is_none() {
                errors.push(format!(
                    "watch_policy.downtime.timezone '{}' is not a known timezone",
                    policy.downtime.timezone
                ));
            }
        }

        if self.schedule.interval_hours < 1 {
            errors.push("schedule.interval_hours must be >= 1".into());
        }

        if self.retry.max_attempts < 1 {
            errors.push("retry.max_attempts must be >= 1".into());
        }

        for (idx, profile) in self.extractor_profiles.iter().enumerate() {
            if profile.name.trim().is_empty() {
                errors.push(format!("extractor_profiles[{idx}] missing name"));
            }
        }

        errors
    }

    /// Base directory for single-URL downloads
    pub fn single_download_dir(&self) -> PathBuf {
        self.download
            .single_download_dir
            .clone()
            .unwrap_or_else(|| self.download.download_dir.join("single"))
    }

    /// Sources in configuration order, with folders resolved
    pub fn resolved_sources(&self) -> Vec<Source> {
        self.sources
            .iter()
            .map(|s| s.to_source(&self.download.download_dir))
            .collect()
    }

    /// Effective fallback ladder
    pub fn fallback_ladder(&self) -> Vec<ExtractorProfile> {
        if self.extractor_profiles.is_empty() {
            ExtractorProfile::default_ladder(self.tools.cookies_file.is_some())
        } else {
            self.extractor_profiles.clone()
        }
    }
}

fn is_http_url(raw: &str) -> bool {
    url::Url::parse(raw).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_min_free_space() -> u64 {
    1024 * 1024 * 1024
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    6
}

fn default_base_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(60)
}

fn default_min_interval_minutes() -> u64 {
    5
}

fn default_max_interval_minutes() -> u64 {
    360
}

fn default_idle_backoff_factor() -> u32 {
    2
}

fn default_active_reset_minutes() -> u64 {
    5
}

fn default_quiet_window_seconds() -> u64 {
    60
}

fn default_downtime_start() -> String {
    "23:00".to_string()
}

fn default_downtime_end() -> String {
    "07:00".to_string()
}

fn default_timezone() -> String {
    "local".to_string()
}

fn default_interval_hours() -> u64 {
    6
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./playlist-archiver.db")
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8090))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
