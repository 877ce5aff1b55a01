//! Extraction tool boundary
//!
//! The executor talks to the extraction tool only through [`Extractor`]. One
//! call is one tool invocation with one client profile; the executor decides
//! which profiles to try and whether the produced output is acceptable.
//!
//! ## Submodules
//!
//! - [`ytdlp`] — [`YtDlpExtractor`], the yt-dlp process implementation
//! - [`progress`] — parsing of yt-dlp progress lines

use crate::types::{ErrorKind, ItemProgress, OutputKind};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub mod progress;
pub mod ytdlp;

pub use ytdlp::YtDlpExtractor;

/// Advisory progress callback; must not block
pub type ProgressSink = Arc<dyn Fn(ItemProgress) + Send + Sync>;

/// A progress sink that drops every update
pub fn discard_progress() -> ProgressSink {
    Arc::new(|_| {})
}

/// One invocation of the extraction tool
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractionRequest {
    /// Item ID (used as the output file stem)
    pub item_id: String,
    /// Item URL
    pub url: String,
    /// Directory the tool writes into
    pub staging_dir: PathBuf,
    /// Format selector
    pub format: String,
    /// Profile name, for diagnostics
    pub profile: String,
    /// `player_client` extractor argument
    pub client: Option<String>,
    /// Extra HTTP headers
    pub headers: BTreeMap<String, String>,
    /// Cookie file
    pub cookies_file: Option<PathBuf>,
    /// Enable the JS runtime and the remote challenge solver
    pub js_solver: bool,
    /// Extract audio to this format (music mode)
    pub audio_format: Option<String>,
    /// Container for merged video output
    pub merge_format: Option<String>,
    /// Per-invocation timeout
    pub timeout: Duration,
}

/// What one invocation produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractionOutput {
    /// Whether the tool reported success and a file exists
    pub success: bool,
    /// Produced file inside the staging directory
    pub output_path: Option<PathBuf>,
    /// Probed kind of the produced file
    pub output_kind: OutputKind,
    /// Tool diagnostics (stderr tail)
    pub diagnostic: String,
    /// Classification when `success` is false
    pub error_kind: Option<ErrorKind>,
}

impl ExtractionOutput {
    /// A produced file of the given kind
    pub fn produced(path: PathBuf, kind: OutputKind) -> Self {
        Self {
            success: true,
            output_path: Some(path),
            output_kind: kind,
            diagnostic: String::new(),
            error_kind: None,
        }
    }

    /// A failed invocation
    pub fn failed(kind: ErrorKind, diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            output_path: None,
            output_kind: OutputKind::None,
            diagnostic: diagnostic.into(),
            error_kind: Some(kind),
        }
    }
}

/// Extraction tool invocation
///
/// Implementations must be safe to call repeatedly for the same item with
/// different profiles. They never return `Err`: every failure is classified
/// into [`ErrorKind`] on the output.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Run one extraction attempt
    async fn extract(&self, request: &ExtractionRequest, progress: ProgressSink)
    -> ExtractionOutput;

    /// Name for logs
    fn name(&self) -> &'static str;
}

/// Classify tool diagnostics into the failure taxonomy
///
/// Unknown failures are treated as profile-specific rejections so the ladder
/// moves on to the next profile.
pub fn classify_failure(diagnostic: &str) -> ErrorKind {
    let text = diagnostic.to_ascii_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if any(&[
        "no space left on device",
        "errno 28",
        "disk quota exceeded",
        "read-only file system",
        "permission denied",
    ]) {
        return ErrorKind::Disk;
    }
    if any(&[
        "requested format is not available",
        "no video formats found",
        "video unavailable",
        "private video",
        "has been removed",
        "unsupported url",
    ]) {
        return ErrorKind::UnsupportedFormat;
    }
    if any(&[
        "sign in to confirm",
        "not a bot",
        "http error 403",
        "http error 429",
        "precondition check failed",
        "nsig extraction failed",
        "signature extraction failed",
    ]) {
        return ErrorKind::ExtractorRejected;
    }
    if any(&[
        "timed out",
        "timeout",
        "connection reset",
        "connection refused",
        "connection aborted",
        "network is unreachable",
        "temporary failure in name resolution",
        "name or service not known",
        "unable to download webpage",
        "incompleteread",
        "http error 5",
        "remote end closed connection",
    ]) {
        return ErrorKind::Network;
    }
    ErrorKind::ExtractorRejected
}
