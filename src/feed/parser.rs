// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::episode::{extract_episode_number, parse_pub_date};
use super::{Feed, FeedError, PreferredQuality};
use crate::download::Item;

/// Parse an RSS 2.0 document into a [`Feed`], preferring medium quality audio.
pub fn parse_feed(xml: &[u8]) -> Result<Feed, FeedError> {
    parse_feed_with_quality(xml, PreferredQuality::default())
}

/// Parse an RSS 2.0 document into a [`Feed`].
///
/// Entries without an identifier or an audio enclosure are skipped with a
/// warning; only a malformed document is an error. When an entry lists
/// several audio enclosures, `quality` picks between them.
pub fn parse_feed_with_quality(xml: &[u8], quality: PreferredQuality) -> Result<Feed, FeedError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut feed = Feed::default();
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut current_item: Option<ItemBuilder> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                text.clear();

                if name == "item" {
                    current_item = Some(ItemBuilder::default());
                } else if name == "enclosure" {
                    if let Some(ref mut item) = current_item {
                        item.add_enclosure(&e);
                    }
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"enclosure" {
                    if let Some(ref mut item) = current_item {
                        item.add_enclosure(&e);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let chunk = e.unescape().unwrap_or_default();
                text.push_str(&chunk);
            }
            Ok(Event::CData(e)) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let value = std::mem::take(&mut text).trim().to_string();
                path.pop();

                if name == "item" {
                    if let Some(builder) = current_item.take() {
                        match builder.build(quality) {
                            Ok(item) => feed.items.push(item),
                            Err(reason) => {
                                tracing::warn!(reason = %reason, "Skipping feed entry");
                                feed.skipped += 1;
                            }
                        }
                    }
                } else if let Some(ref mut item) = current_item {
                    item.set_field(&name, value);
                } else if path.last().map(String::as_str) == Some("channel") && !value.is_empty() {
                    match name.as_str() {
                        "title" => feed.title = value,
                        "itunes:author" => feed.author = Some(value),
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FeedError::Parse(format!(
                    "XML parse error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    tracing::debug!(items = feed.items.len(), skipped = feed.skipped, "Parsed feed");
    Ok(feed)
}

#[derive(Default)]
struct ItemBuilder {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    pub_date: Option<String>,
    description: Option<String>,
    itunes_episode: Option<String>,
    /// Audio enclosures as `(url, length)`, in document order
    enclosures: Vec<(String, Option<u64>)>,
}

impl ItemBuilder {
    fn set_field(&mut self, name: &str, value: String) {
        if value.is_empty() {
            return;
        }
        let slot = match name {
            "title" => &mut self.title,
            "link" => &mut self.link,
            "guid" => &mut self.guid,
            "pubDate" => &mut self.pub_date,
            "description" => &mut self.description,
            "itunes:summary" => &mut self.description,
            "itunes:episode" => &mut self.itunes_episode,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    /// Collect an enclosure if it looks like mp3 or m4a audio.
    fn add_enclosure(&mut self, e: &BytesStart) {
        let mut url = None;
        let mut mime = None;
        let mut length = None;
        for attr in e.attributes().flatten() {
            let value = attr.unescape_value().unwrap_or_default().trim().to_string();
            match attr.key.as_ref() {
                b"url" => url = Some(value),
                b"type" => mime = Some(value.to_ascii_lowercase()),
                b"length" => length = value.parse::<u64>().ok().filter(|l| *l > 0),
                _ => {}
            }
        }

        let Some(url) = url.filter(|u| !u.is_empty()) else {
            return;
        };
        let lower = url.to_ascii_lowercase();
        let is_audio = lower.contains("mp3")
            || lower.contains("m4a")
            || mime.as_deref().is_some_and(|m| m.starts_with("audio/"));
        if is_audio {
            self.enclosures.push((url, length));
        }
    }

    fn build(self, quality: PreferredQuality) -> Result<Item, String> {
        let title = self.title.unwrap_or_default();

        let id = self
            .link
            .as_deref()
            .and_then(last_path_segment)
            .or_else(|| self.guid.as_deref().and_then(last_path_segment))
            .ok_or_else(|| format!("no link or guid for '{}'", title))?;

        let (media_url, enclosure_length) = select_enclosure(&self.enclosures, quality)
            .ok_or_else(|| format!("no audio enclosure for '{}'", title))?;
        if self.enclosures.len() > 1 {
            tracing::debug!(url = %media_url, %quality, "Selected enclosure by quality");
        }

        let episode_number = self
            .itunes_episode
            .as_deref()
            .and_then(|n| n.trim().parse::<u32>().ok())
            .filter(|n| (1..=9999).contains(n))
            .or_else(|| extract_episode_number(&title));

        let mut item = Item::new(id, title, media_url);
        item.published = self.pub_date.as_deref().and_then(parse_pub_date);
        item.enclosure_length = enclosure_length;
        item.episode_number = episode_number;
        item.description = self.description;
        Ok(item)
    }
}

/// First enclosure whose URL names a quality, walking `quality`'s search
/// order; the first audio enclosure when none does.
fn select_enclosure(
    enclosures: &[(String, Option<u64>)],
    quality: PreferredQuality,
) -> Option<(String, Option<u64>)> {
    quality
        .search_order()
        .iter()
        .find_map(|wanted| {
            enclosures
                .iter()
                .find(|(url, _)| url.to_ascii_lowercase().contains(*wanted))
        })
        .or_else(|| enclosures.first())
        .cloned()
}

/// `https://iono.fm/e/1599279` -> `1599279`; plain GUIDs pass through.
fn last_path_segment(value: &str) -> Option<String> {
    let without_query = value.trim().split(['?', '#']).next().unwrap_or_default();
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Die Podcast</title>
    <itunes:author>RSG Nuus</itunes:author>
    <image><title>Ignored image title</title></image>
    <item>
      <title>Episode 2: Tweede &amp; laaste</title>
      <link>https://iono.fm/e/1599280</link>
      <guid>https://iono.fm/e/1599280</guid>
      <pubDate>Tue, 14 May 2024 06:00:00 +0200</pubDate>
      <description><![CDATA[<p>Die tweede</p>]]></description>
      <enclosure url="https://dl.iono.fm/epi/prov_1/epi_1599280_mq.m4a" length="3411456" type="audio/mp4"/>
    </item>
    <item>
      <title>Episode 1</title>
      <link>https://iono.fm/e/1599279</link>
      <pubDate>Tue, 07 May 2024 06:00:00 +0200</pubDate>
      <enclosure url="https://cdn.example/cover.jpg" type="image/jpeg"/>
      <enclosure url="https://dl.iono.fm/epi/prov_1/epi_1599279_mq.mp3" length="2000000" type="audio/mpeg"/>
    </item>
    <item>
      <title>No audio here</title>
      <link>https://iono.fm/e/1599281</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_channel_and_items() {
        let feed = parse_feed(FEED.as_bytes()).unwrap();
        assert_eq!(feed.title, "Die Podcast");
        assert_eq!(feed.author.as_deref(), Some("RSG Nuus"));
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.skipped, 1);

        let first = &feed.items[0];
        assert_eq!(first.id, "1599280");
        assert_eq!(first.title, "Episode 2: Tweede & laaste");
        assert_eq!(first.episode_number, Some(2));
        assert_eq!(first.enclosure_length, Some(3411456));
        assert_eq!(first.description.as_deref(), Some("<p>Die tweede</p>"));
        assert!(first.published.is_some());

        let second = &feed.items[1];
        assert_eq!(second.id, "1599279");
        assert_eq!(second.media_url, "https://dl.iono.fm/epi/prov_1/epi_1599279_mq.mp3");
        assert_eq!(second.description, None);
    }

    #[test]
    fn test_guid_fallback_and_itunes_episode() {
        let xml = r#"<rss><channel><title>T</title>
            <item>
              <title>Bonus</title>
              <guid isPermaLink="false">abc-123</guid>
              <itunes:episode>9</itunes:episode>
              <enclosure url="https://x/a.mp3"/>
            </item>
        </channel></rss>"#;
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(feed.items[0].id, "abc-123");
        assert_eq!(feed.items[0].episode_number, Some(9));
    }

    const VARIANTS: &str = r#"<rss><channel><title>T</title>
        <item>
          <title>Episode 3</title>
          <link>https://iono.fm/e/1599282</link>
          <enclosure url="https://dl.iono.fm/epi/prov_1/epi_1599282_low.m4a" length="1000" type="audio/mp4"/>
          <enclosure url="https://dl.iono.fm/epi/prov_1/epi_1599282_high.m4a" length="4000" type="audio/mp4"/>
          <enclosure url="https://dl.iono.fm/epi/prov_1/epi_1599282_medium.m4a" length="2000" type="audio/mp4"/>
        </item>
    </channel></rss>"#;

    #[test]
    fn test_enclosure_quality_selection() {
        let pick = |quality| {
            let feed = parse_feed_with_quality(VARIANTS.as_bytes(), quality).unwrap();
            let item = feed.items.into_iter().next().unwrap();
            (item.media_url, item.enclosure_length)
        };

        let (url, length) = pick(PreferredQuality::Medium);
        assert!(url.ends_with("_medium.m4a"));
        assert_eq!(length, Some(2000));

        let (url, length) = pick(PreferredQuality::High);
        assert!(url.ends_with("_high.m4a"));
        assert_eq!(length, Some(4000));

        assert!(pick(PreferredQuality::Low).0.ends_with("_low.m4a"));
    }

    #[test]
    fn test_enclosure_quality_fallback_order() {
        // No medium variant: medium falls back to high before low.
        let xml = VARIANTS.replace(
            r#"<enclosure url="https://dl.iono.fm/epi/prov_1/epi_1599282_medium.m4a" length="2000" type="audio/mp4"/>"#,
            "",
        );
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert!(feed.items[0].media_url.ends_with("_high.m4a"));

        // No quality in any URL: the first audio enclosure wins.
        let xml = r#"<rss><channel><title>T</title><item>
            <title>Plain</title><link>https://x/e/7</link>
            <enclosure url="https://x/cover.jpg" type="image/jpeg"/>
            <enclosure url="https://x/a.mp3" length="10"/>
            <enclosure url="https://x/b.m4a" length="20"/>
        </item></channel></rss>"#;
        let feed = parse_feed_with_quality(xml.as_bytes(), PreferredQuality::Low).unwrap();
        assert_eq!(feed.items[0].media_url, "https://x/a.mp3");
        assert_eq!(feed.items[0].enclosure_length, Some(10));
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        let err = parse_feed(b"<rss><channel><title>T</wrong></channel></rss>").unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)));
    }

    #[test]
    fn test_last_path_segment() {
        assert_eq!(last_path_segment("https://iono.fm/e/1599279/"), Some("1599279".into()));
        assert_eq!(last_path_segment("https://x/e/42?ref=rss"), Some("42".into()));
        assert_eq!(last_path_segment("plain-guid"), Some("plain-guid".into()));
        assert_eq!(last_path_segment("  "), None);
    }
}
