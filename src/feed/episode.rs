// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Episode numbers, publication dates and item ordering.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::download::Item;

/// Title patterns tried in order; the first that yields a plausible number wins.
static EPISODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)Episode\s+(\d+)",
        r"(?i)Ep\.?\s*(\d+)",
        r"#(\d+)",
        r"(?i)Part\s+(\d+)",
        r"(?i)(\d+):00\s+nuus",
        r"(?i)S\d+E(\d+)",
        r"(?i)Season\s+\d+\s+Episode\s+(\d+)",
        r"\b(\d{1,3})\b\s*(?:-|–|:|$)",
        r"^(\d+)\b",
        r"\b(\d+)$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("episode pattern is valid"))
    .collect()
});

/// Extract an episode number (1..=9999) from a title.
pub fn extract_episode_number(text: &str) -> Option<u32> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    EPISODE_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
            .find(|n| (1..=9999).contains(n))
    })
}

/// Parse an RSS `pubDate` (RFC 2822), accepting RFC 3339 as well.
pub fn parse_pub_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| tracing::debug!(value, error = %e, "Could not parse date"))
        .ok()
}

/// Sort by episode number (unnumbered last), then publication date
/// (undated first), then identifier. The sort is stable.
pub fn sort_items(items: &mut [Item]) {
    items.sort_by(|a, b| {
        let key = |i: &Item| (i.episode_number.is_none(), i.episode_number);
        key(a)
            .cmp(&key(b))
            .then_with(|| a.published.cmp(&b.published))
            .then_with(|| a.id.cmp(&b.id))
    });
}
