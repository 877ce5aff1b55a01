//! RSS / Atom feed listing over HTTP

use super::{SourceQuery, dedup_items};
use crate::error::{Error, Result};
use crate::types::{Source, SourceItem};
use async_trait::async_trait;
use std::time::Duration;

/// Lists feed entries; the entry link is handed to the extractor
pub struct FeedSourceQuery {
    http_client: reqwest::Client,
}

impl FeedSourceQuery {
    /// Create a feed backend with a 30 second request timeout
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("playlist-archiver feed reader")
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl SourceQuery for FeedSourceQuery {
    async fn list_items(&self, source: &Source) -> Result<Vec<SourceItem>> {
        let failure = |message: String| Error::SourceQuery {
            source_id: source.id.clone(),
            message,
        };
        let url = source
            .url
            .as_deref()
            .ok_or_else(|| failure("feed source has no url".into()))?;

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| failure(format!("Failed to fetch feed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failure(format!("feed returned HTTP {}", status.as_u16())));
        }

        let content = response
            .text()
            .await
            .map_err(|e| failure(format!("Failed to read feed content: {}", e)))?;

        parse_feed(&content).map_err(failure)
    }
}

/// Parse as RSS first, then Atom
pub(crate) fn parse_feed(content: &str) -> std::result::Result<Vec<SourceItem>, String> {
    match parse_as_rss(content) {
        Ok(items) => Ok(items),
        Err(rss_err) => parse_as_atom(content).map_err(|atom_err| {
            format!(
                "Failed to parse feed as RSS or Atom. RSS error: {}. Atom error: {}",
                rss_err, atom_err
            )
        }),
    }
}

fn parse_as_rss(content: &str) -> std::result::Result<Vec<SourceItem>, String> {
    let channel = content
        .parse::<rss::Channel>()
        .map_err(|e| e.to_string())?;
    let channel_title = channel.title().to_string();

    let items = channel
        .items()
        .iter()
        .filter_map(|item| {
            let url = item
                .link()
                .map(str::to_string)
                .or_else(|| item.enclosure().map(|e| e.url().to_string()))?;
            // GUID preferred, link as fallback
            let id = item
                .guid()
                .map(|g| g.value().to_string())
                .unwrap_or_else(|| url.clone());
            let upload_date = item.pub_date().and_then(|d| {
                chrono::DateTime::parse_from_rfc2822(d)
                    .ok()
                    .map(|dt| dt.format("%Y%m%d").to_string())
            });
            Some(SourceItem {
                id,
                url,
                title: item.title().map(str::to_string),
                channel: item
                    .author()
                    .map(str::to_string)
                    .or_else(|| Some(channel_title.clone())),
                upload_date,
            })
        })
        .collect();

    Ok(dedup_items(items))
}

fn parse_as_atom(content: &str) -> std::result::Result<Vec<SourceItem>, String> {
    let feed = atom_syndication::Feed::read_from(content.as_bytes()).map_err(|e| e.to_string())?;
    let feed_title = feed.title().as_str().to_string();

    let items = feed
        .entries()
        .iter()
        .filter_map(|entry| {
            let url = entry
                .links()
                .iter()
                .find(|link| link.rel() == "alternate")
                .or_else(|| entry.links().first())
                .map(|link| link.href().to_string())?;
            let published = entry.published().copied().unwrap_or_else(|| *entry.updated());
            Some(SourceItem {
                id: entry.id().to_string(),
                url,
                title: Some(entry.title().as_str().to_string()),
                channel: entry
                    .authors()
                    .first()
                    .map(|a| a.name().to_string())
                    .or_else(|| Some(feed_title.clone())),
                upload_date: Some(published.format("%Y%m%d").to_string()),
            })
        })
        .collect();

    Ok(dedup_items(items))
}
