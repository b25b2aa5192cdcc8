//! Podcast feed reading.
//!
//! Feeds are external input: they may repeat episodes, omit identifiers or
//! list items without audio. Deduplication happens downstream through the
//! job fingerprint, so readers only skip entries they cannot use at all.

use async_trait::async_trait;
use thiserror::Error;

use crate::job::EpisodeMetadata;

pub mod rss;

pub use rss::RssFeedReader;

/// One episode offered for transcription.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    /// Episode GUID, falling back to its link, then its audio URL.
    pub guid_or_url: String,
    pub channel: String,
    pub audio_locator: String,
    pub metadata: EpisodeMetadata,
}

/// Where to read a feed from and how much of it.
#[derive(Debug, Clone)]
pub struct FeedSource {
    pub url: String,
    /// Channel name. Derived from the feed title when absent.
    pub channel: Option<String>,
    pub max_episodes: usize,
}

/// A parsed feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub channel: String,
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to fetch feed '{url}': {reason}")]
    Fetch { url: String, reason: String },

    #[error("Feed '{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to parse feed: {0}")]
    Parse(String),
}

#[async_trait]
pub trait FeedReader: Send + Sync {
    async fn read(&self, source: &FeedSource) -> Result<Feed, FeedError>;
}
