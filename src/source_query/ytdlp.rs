//! Playlist and channel listing through `yt-dlp --flat-playlist -J`

use super::{SourceQuery, dedup_items};
use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use crate::types::{Source, SourceItem};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const LISTING_TIMEOUT: Duration = Duration::from_secs(120);

/// Lists playlist entries without resolving formats
#[derive(Clone, Debug)]
pub struct YtDlpSourceQuery {
    binary_path: PathBuf,
    cookies_file: Option<PathBuf>,
    timeout: Duration,
}

impl YtDlpSourceQuery {
    /// Create a query backend for an explicit yt-dlp binary
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            cookies_file: None,
            timeout: LISTING_TIMEOUT,
        }
    }

    /// Build from the tools configuration
    pub fn from_config(tools: &ToolsConfig) -> Result<Self> {
        let binary = tools
            .ytdlp_path
            .clone()
            .or_else(|| tools.search_path.then(|| which::which("yt-dlp").ok()).flatten())
            .ok_or_else(|| Error::ExternalTool("yt-dlp not found for source listing".into()))?;
        Ok(Self {
            binary_path: binary,
            cookies_file: tools.cookies_file.clone(),
            timeout: LISTING_TIMEOUT,
        })
    }

    /// Override the listing timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// URL yt-dlp is asked to list
pub(crate) fn listing_url(source: &Source) -> String {
    if let Some(url) = &source.url {
        return url.clone();
    }
    if source.id.starts_with("UC") && source.id.len() == 24 {
        format!("https://www.youtube.com/channel/{}/videos", source.id)
    } else {
        format!("https://www.youtube.com/playlist?list={}", source.id)
    }
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    url: Option<String>,
    title: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    upload_date: Option<String>,
    #[serde(default)]
    entries: Option<Vec<Option<FlatEntry>>>,
}

/// Flatten `-J` output (channels nest one playlist per tab)
pub(crate) fn parse_flat_playlist(json: &str) -> std::result::Result<Vec<SourceItem>, String> {
    let root: FlatEntry =
        serde_json::from_str(json).map_err(|e| format!("invalid listing JSON: {e}"))?;

    fn walk(entry: FlatEntry, out: &mut Vec<SourceItem>) {
        if let Some(entries) = entry.entries {
            for child in entries.into_iter().flatten() {
                walk(child, out);
            }
            return;
        }
        let Some(id) = entry.id else {
            return;
        };
        let url = entry
            .url
            .filter(|u| u.starts_with("http"))
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={id}"));
        out.push(SourceItem {
            url,
            title: entry.title,
            channel: entry.channel.or(entry.uploader),
            upload_date: entry.upload_date,
            id,
        });
    }

    let mut items = Vec::new();
    walk(root, &mut items);
    Ok(dedup_items(items))
}

#[async_trait]
impl SourceQuery for YtDlpSourceQuery {
    async fn list_items(&self, source: &Source) -> Result<Vec<SourceItem>> {
        let url = listing_url(source);
        tracing::debug!(source_id = %source.id, url = %url, "Listing source");

        let mut command = Command::new(&self.binary_path);
        command
            .args(["--flat-playlist", "-J", "--no-warnings", "--force-ipv4"])
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(cookies) = &self.cookies_file {
            command.arg("--cookies").arg(cookies);
        }
        command.arg("--").arg(&url);

        let failure = |message: String| Error::SourceQuery {
            source_id: source.id.clone(),
            message,
        };

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| failure(format!("listing timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| failure(format!("Failed to execute yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failure(stderr.trim().to_string()));
        }

        parse_flat_playlist(&String::from_utf8_lossy(&output.stdout)).map_err(failure)
    }
}
