//! Source listing
//!
//! The watcher and the batch runner ask a [`SourceQuery`] for the current,
//! ordered item list of a source. Listing goes through a path distinct from
//! the download path: yt-dlp's flat-playlist JSON for playlists and channels,
//! plain HTTP for RSS/Atom feeds.

use crate::error::Result;
use crate::types::{Source, SourceItem, SourceKind};
use async_trait::async_trait;
use std::sync::Arc;

mod feed;
mod ytdlp;

pub use feed::FeedSourceQuery;
pub use ytdlp::YtDlpSourceQuery;

/// Ordered item listing for a source
#[async_trait]
pub trait SourceQuery: Send + Sync {
    /// Current items in listing order (oldest-first or as the source orders them)
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceQuery`](crate::Error::SourceQuery) when the
    /// listing cannot be fetched or parsed.
    async fn list_items(&self, source: &Source) -> Result<Vec<SourceItem>>;
}

/// Dispatches to a backend by [`SourceKind`]
pub struct SourceQueryRouter {
    playlists: Arc<dyn SourceQuery>,
    feeds: Arc<dyn SourceQuery>,
}

impl SourceQueryRouter {
    /// Create a router from the two backends
    pub fn new(playlists: Arc<dyn SourceQuery>, feeds: Arc<dyn SourceQuery>) -> Self {
        Self { playlists, feeds }
    }
}

#[async_trait]
impl SourceQuery for SourceQueryRouter {
    async fn list_items(&self, source: &Source) -> Result<Vec<SourceItem>> {
        match source.kind {
            SourceKind::Playlist => self.playlists.list_items(source).await,
            SourceKind::Feed => self.feeds.list_items(source).await,
        }
    }
}

/// Drop repeated IDs, keeping the first occurrence
pub(crate) fn dedup_items(items: Vec<SourceItem>) -> Vec<SourceItem> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect()
}
