//! yt-dlp process extractor

use super::progress::{PROGRESS_TEMPLATE, parse_progress_line};
use super::{ExtractionOutput, ExtractionRequest, Extractor, ProgressSink, classify_failure};
use crate::config::ToolsConfig;
use crate::types::{ErrorKind, OutputKind};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Prefix of the line yt-dlp prints once the final file is in place
const FILEPATH_MARKER: &str = "archiver-output:";

/// Diagnostic lines kept from a failed invocation
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Extractor that shells out to yt-dlp
///
/// Each [`Extractor::extract`] call spawns one yt-dlp process. The child is
/// killed when the attempt times out or the future is dropped.
///
/// # Examples
///
/// ```no_run
/// use playlist_archiver::extractor::YtDlpExtractor;
/// use std::path::PathBuf;
///
/// // Explicit binary
/// let extractor = YtDlpExtractor::new(PathBuf::from("/usr/local/bin/yt-dlp"));
///
/// // Or auto-discover yt-dlp, ffprobe and node from PATH
/// let extractor = YtDlpExtractor::from_path().expect("yt-dlp not found in PATH");
/// ```
#[derive(Clone, Debug)]
pub struct YtDlpExtractor {
    binary_path: PathBuf,
    ffprobe_path: Option<PathBuf>,
    js_runtime_path: Option<PathBuf>,
}

impl YtDlpExtractor {
    /// Create an extractor with an explicit yt-dlp path and no helpers
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            ffprobe_path: None,
            js_runtime_path: None,
        }
    }

    /// Use ffprobe to classify produced files
    pub fn with_ffprobe(mut self, ffprobe_path: Option<PathBuf>) -> Self {
        self.ffprobe_path = ffprobe_path;
        self
    }

    /// JavaScript runtime handed to yt-dlp for the native attempt
    pub fn with_js_runtime(mut self, js_runtime_path: Option<PathBuf>) -> Self {
        self.js_runtime_path = js_runtime_path;
        self
    }

    /// Find yt-dlp (and optionally ffprobe and node) in PATH
    pub fn from_path() -> Option<Self> {
        let binary = which::which("yt-dlp").ok()?;
        Some(
            Self::new(binary)
                .with_ffprobe(which::which("ffprobe").ok())
                .with_js_runtime(which::which("node").ok()),
        )
    }

    /// Build from the tools configuration, searching PATH for unset paths
    pub fn from_config(tools: &ToolsConfig) -> crate::Result<Self> {
        let discover = |explicit: &Option<PathBuf>, name: &str| {
            explicit
                .clone()
                .or_else(|| tools.search_path.then(|| which::which(name).ok()).flatten())
        };

        let binary = discover(&tools.ytdlp_path, "yt-dlp").ok_or_else(|| {
            crate::Error::ExternalTool(
                "yt-dlp not found (set tools.ytdlp_path or install it in PATH)".into(),
            )
        })?;

        let extractor = Self::new(binary)
            .with_ffprobe(discover(&tools.ffprobe_path, "ffprobe"))
            .with_js_runtime(discover(&tools.js_runtime_path, "node"));

        if extractor.ffprobe_path.is_none() {
            tracing::warn!("ffprobe not found; output kind will be guessed from file extensions");
        }
        if extractor.js_runtime_path.is_none() {
            tracing::warn!("No JavaScript runtime found; native attempts run without a solver");
        }

        Ok(extractor)
    }

    /// Path of the yt-dlp binary
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Command line for one request
    pub fn build_args(&self, request: &ExtractionRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        let mut push = |value: &str| args.push(OsString::from(value));

        push("--newline");
        push("--progress");
        push("--progress-template");
        push(PROGRESS_TEMPLATE);
        push("--no-playlist");
        push("--no-color");
        push("--force-ipv4");
        push("--print");
        push(&format!("after_move:{FILEPATH_MARKER}%(filepath)s"));

        push("-f");
        push(&request.format);

        if let Some(audio_format) = &request.audio_format {
            push("-x");
            push("--audio-format");
            push(audio_format);
        } else if let Some(merge_format) = &request.merge_format {
            push("--merge-output-format");
            push(merge_format);
        }

        if request.js_solver {
            if let Some(runtime) = &self.js_runtime_path {
                let name = runtime
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("node");
                push("--js-runtimes");
                push(&format!("{}:{}", name, runtime.display()));
            }
            push("--remote-components");
            push("ejs:github");
        }

        if let Some(client) = &request.client {
            push("--extractor-args");
            push(&format!("youtube:player_client={client}"));
        }

        for (name, value) in &request.headers {
            push("--add-header");
            push(&format!("{name}:{value}"));
        }

        if let Some(ffprobe) = &self.ffprobe_path
            && let Some(dir) = ffprobe.parent()
            && !dir.as_os_str().is_empty()
        {
            push("--ffmpeg-location");
            push(&dir.display().to_string());
        }

        if let Some(cookies) = &request.cookies_file {
            args.push(OsString::from("--cookies"));
            args.push(cookies.clone().into_os_string());
        }

        args.push(OsString::from("-o"));
        args.push(
            request
                .staging_dir
                .join(format!("{}.%(ext)s", request.item_id))
                .into_os_string(),
        );
        args.push(OsString::from("--"));
        args.push(OsString::from(&request.url));
        args
    }

    async fn run(&self, request: &ExtractionRequest, progress: &ProgressSink) -> ToolRun {
        let mut child = match Command::new(&self.binary_path)
            .args(self.build_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ToolRun::spawn_failed(format!(
                    "Failed to execute {}: {}",
                    self.binary_path.display(),
                    e
                ));
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return ToolRun::spawn_failed("yt-dlp output pipes unavailable".to_string());
        };

        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut printed_path = None;
        let mut tail: VecDeque<String> = VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES);

        let mut handle_line = |line: String, is_stderr: bool| {
            if let Some(path) = line.strip_prefix(FILEPATH_MARKER) {
                printed_path = Some(PathBuf::from(path.trim()));
                return;
            }
            if let Some(update) = parse_progress_line(&line) {
                progress(update);
                return;
            }
            if is_stderr || line.starts_with("ERROR") || line.starts_with("WARNING") {
                if tail.len() == DIAGNOSTIC_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        };

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => handle_line(line, false),
                    _ => stdout_open = false,
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => handle_line(line, true),
                    _ => stderr_open = false,
                },
            }
        }

        let success = match child.wait().await {
            Ok(status) => status.success(),
            Err(e) => {
                tail.push_back(format!("Failed to wait for yt-dlp: {e}"));
                false
            }
        };

        ToolRun {
            success,
            spawn_failed: false,
            printed_path,
            diagnostic: tail.into_iter().collect::<Vec<_>>().join("\n"),
        }
    }

    /// Classify a produced file by its streams
    async fn probe(&self, path: &Path) -> OutputKind {
        let Some(ffprobe) = &self.ffprobe_path else {
            return kind_from_extension(path);
        };

        let output = Command::new(ffprobe)
            .args(["-v", "error", "-show_entries", "stream=codec_type", "-of", "csv=p=0"])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                kind_from_codec_types(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                tracing::debug!(
                    path = %path.display(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "ffprobe failed; falling back to extension"
                );
                kind_from_extension(path)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Failed to execute ffprobe; falling back to extension");
                kind_from_extension(path)
            }
        }
    }
}

struct ToolRun {
    success: bool,
    spawn_failed: bool,
    printed_path: Option<PathBuf>,
    diagnostic: String,
}

impl ToolRun {
    fn spawn_failed(diagnostic: String) -> Self {
        Self {
            success: false,
            spawn_failed: true,
            printed_path: None,
            diagnostic,
        }
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(
        &self,
        request: &ExtractionRequest,
        progress: ProgressSink,
    ) -> ExtractionOutput {
        tracing::debug!(
            item_id = %request.item_id,
            profile = %request.profile,
            format = %request.format,
            "Invoking yt-dlp"
        );

        let run = match tokio::time::timeout(request.timeout, self.run(request, &progress)).await {
            Ok(run) => run,
            Err(_) => {
                return ExtractionOutput::failed(
                    ErrorKind::Network,
                    format!("yt-dlp timed out after {}s", request.timeout.as_secs()),
                );
            }
        };

        if run.spawn_failed {
            // Missing or unusable binary needs an operator, not another profile
            return ExtractionOutput::failed(ErrorKind::Disk, run.diagnostic);
        }
        if !run.success {
            return ExtractionOutput::failed(classify_failure(&run.diagnostic), run.diagnostic);
        }

        let path = match run.printed_path.filter(|p| p.is_file()) {
            Some(path) => Some(path),
            None => find_staged_output(&request.staging_dir, &request.item_id).await,
        };
        let Some(path) = path else {
            return ExtractionOutput::failed(
                ErrorKind::UnsupportedFormat,
                "yt-dlp reported success but produced no file",
            );
        };

        let kind = self.probe(&path).await;
        let mut output = ExtractionOutput::produced(path, kind);
        output.diagnostic = run.diagnostic;
        output
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

/// Largest finished file in the staging dir whose stem is the item ID
async fn find_staged_output(staging_dir: &Path, item_id: &str) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(staging_dir).await.ok()?;
    let mut best: Option<(u64, PathBuf)> = None;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(item_id) || name.ends_with(".part") || name.ends_with(".ytdl") {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if meta.is_file() && best.as_ref().is_none_or(|(size, _)| meta.len() > *size) {
            best = Some((meta.len(), path));
        }
    }

    best.map(|(_, path)| path)
}

/// Map `ffprobe -show_entries stream=codec_type -of csv=p=0` output
pub(crate) fn kind_from_codec_types(output: &str) -> OutputKind {
    let mut video = false;
    let mut audio = false;
    for line in output.lines() {
        match line.trim() {
            "video" => video = true,
            "audio" => audio = true,
            _ => {}
        }
    }
    match (video, audio) {
        (true, true) => OutputKind::MuxedVideo,
        (false, true) => OutputKind::AudioOnly,
        _ => OutputKind::None,
    }
}

pub(crate) fn kind_from_extension(path: &Path) -> OutputKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp4" | "webm" | "mkv" | "mov" | "avi" | "flv") => OutputKind::MuxedVideo,
        Some("mp3" | "m4a" | "opus" | "ogg" | "aac" | "flac" | "wav") => OutputKind::AudioOnly,
        _ => OutputKind::None,
    }
}
