// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! RSS feed retrieval and parsing
//!
//! Produces the ordered list of [`Item`]s the download engine consumes.
//! Individual broken entries are skipped with a warning; a feed that cannot
//! be fetched or parsed at all is a [`FeedError`].

pub mod episode;
pub mod parser;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::download::Item;

pub use episode::{extract_episode_number, parse_pub_date, sort_items};
pub use parser::{parse_feed, parse_feed_with_quality};

/// Bitrate variant to pick when an item lists several audio enclosures.
///
/// Matched as a substring of the enclosure URL, as iono.fm names its
/// variants `..._high.m4a`, `..._medium.m4a` and `..._low.m4a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredQuality {
    High,
    #[default]
    Medium,
    Low,
}

impl PreferredQuality {
    /// Qualities to look for, best match first.
    pub fn search_order(self) -> [&'static str; 3] {
        match self {
            Self::High => ["high", "medium", "low"],
            Self::Medium => ["medium", "high", "low"],
            Self::Low => ["low", "medium", "high"],
        }
    }
}

impl fmt::Display for PreferredQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// A parsed podcast feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feed {
    /// Channel title
    pub title: String,
    /// Channel `itunes:author`, used to name the download directory
    pub author: Option<String>,
    /// Usable items in feed order
    pub items: Vec<Item>,
    /// Entries dropped for lacking an identifier or an audio enclosure
    pub skipped: usize,
}

impl Feed {
    /// Items in download order: sorted by episode, or as listed when `feed_order` is set.
    pub fn ordered_items(&self, feed_order: bool) -> Vec<Item> {
        let mut items = self.items.clone();
        if !feed_order {
            sort_items(&mut items);
        }
        items
    }
}

/// Why a feed could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Connection, timeout or body read failure
    Http(String),
    /// Server answered with a non-success status
    Status(u16),
    /// The document is not well-formed XML
    Parse(String),
    /// The document parsed but has no channel title
    NoTitle,
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(msg) => write!(f, "request failed: {}", msg),
            Self::Status(status) => write!(f, "server responded with HTTP {}", status),
            Self::Parse(msg) => write!(f, "invalid feed: {}", msg),
            Self::NoTitle => write!(f, "document has no channel title"),
        }
    }
}

impl std::error::Error for FeedError {}

/// Expand a user-supplied feed address into the URLs worth trying.
///
/// An iono.fm channel page (`https://iono.fm/c/<n>`) maps to its channel
/// RSS and then its provider RSS. Anything else is used as given.
pub fn candidate_urls(input: &str) -> Vec<String> {
    let input = input.trim();
    let lower = input.to_ascii_lowercase();

    if lower.contains("iono.fm/c/") {
        let channel = input
            .split("/c/")
            .nth(1)
            .and_then(|rest| rest.split(['/', '?', '#']).next())
            .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()));

        if let Some(id) = channel {
            return vec![
                format!("https://iono.fm/rss/chan/{}", id),
                format!("https://iono.fm/rss/prov/{}", id),
            ];
        }
    }

    vec![input.to_string()]
}

/// Fetches and parses feeds over HTTP.
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: reqwest::Client,
    timeout: Duration,
    quality: PreferredQuality,
}

impl FeedClient {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            quality: PreferredQuality::default(),
        }
    }

    pub fn with_quality(mut self, quality: PreferredQuality) -> Self {
        self.quality = quality;
        self
    }

    /// Fetch one URL and parse it. A document without a channel title is rejected.
    pub async fn fetch(&self, url: &str) -> Result<Feed, FeedError> {
        tracing::debug!(url, "Fetching feed");

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FeedError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FeedError::Http(e.to_string()))?;

        let feed = parse_feed_with_quality(&body, self.quality)?;
        if feed.title.trim().is_empty() {
            return Err(FeedError::NoTitle);
        }
        Ok(feed)
    }

    /// Try each candidate in order and return the first usable feed with its URL.
    pub async fn fetch_first(&self, candidates: &[String]) -> Result<(String, Feed), FeedError> {
        let mut last_error = FeedError::Http("no feed URL given".to_string());

        for url in candidates {
            match self.fetch(url).await {
                Ok(feed) => {
                    tracing::info!(
                        url = %url,
                        title = %feed.title,
                        items = feed.items.len(),
                        skipped = feed.skipped,
                        "Loaded feed"
                    );
                    return Ok((url.clone(), feed));
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Feed candidate unusable");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
