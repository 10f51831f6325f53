// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File and directory naming for downloaded episodes.
//!
//! Titles come straight from feeds and may hold any Unicode. They are NFKC
//! normalized, stripped to word characters, whitespace, `-` and `.`, then
//! lowercased and length-bounded. The item identifier is appended so two
//! episodes with the same title never share a file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

use crate::download::Item;

/// Name used when sanitizing leaves nothing.
pub const UNNAMED: &str = "unnamed";

/// Extension used when neither the server nor the URL says otherwise.
pub const DEFAULT_EXTENSION: &str = ".m4a";

static DISALLOWED_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\w\s\-\.]").expect("disallowed chars regex is valid")
});

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+").expect("whitespace regex is valid")
});

/// Audio container to force, or `Auto` to detect per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredFormat {
    #[default]
    Auto,
    Mp3,
    M4a,
}

impl fmt::Display for PreferredFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreferredFormat::Auto => write!(f, "auto"),
            PreferredFormat::Mp3 => write!(f, "mp3"),
            PreferredFormat::M4a => write!(f, "m4a"),
        }
    }
}

/// Make `name` safe for use as a single path component.
pub fn sanitize_filename(name: &str, max_length: usize) -> String {
    if name.trim().is_empty() {
        return UNNAMED.to_string();
    }

    let normalized: String = name.nfkc().collect();
    let stripped = DISALLOWED_CHARS.replace_all(&normalized, "");
    let joined = WHITESPACE_RUN.replace_all(stripped.trim(), "_").to_lowercase();
    let truncated: String = joined.chars().take(max_length).collect();
    let result = truncated.trim_end_matches('_');

    // "." and ".." are not usable as names
    if result.is_empty() || result.chars().all(|c| c == '.') {
        UNNAMED.to_string()
    } else {
        result.to_string()
    }
}

/// Pick the file extension (with the leading dot) for a media file.
///
/// Order: forced format, then `Content-Type`, then the URL, then `.m4a`.
pub fn file_extension(url: &str, content_type: Option<&str>, preferred: PreferredFormat) -> &'static str {
    match preferred {
        PreferredFormat::Mp3 => return ".mp3",
        PreferredFormat::M4a => return ".m4a",
        PreferredFormat::Auto => {}
    }

    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        if ct.contains("audio/mpeg") || ct.contains("audio/mp3") {
            return ".mp3";
        }
        if ct.contains("audio/mp4") || ct.contains("audio/m4a") || ct.contains("audio/x-m4a") {
            return ".m4a";
        }
    }

    let url = url.to_ascii_lowercase();
    if url.contains(".mp3") {
        ".mp3"
    } else if url.contains(".m4a") {
        ".m4a"
    } else {
        DEFAULT_EXTENSION
    }
}

/// Directory name: explicit choice, else feed author, else feed title.
pub fn download_dir_name(explicit: Option<&str>, author: Option<&str>, title: &str, max_length: usize) -> String {
    let source = [explicit, author]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .unwrap_or(title);
    sanitize_filename(source, max_length)
}

/// Builds per-item file names from the run's naming options.
#[derive(Debug, Clone)]
pub struct FileNamer {
    pub max_length: usize,
    /// Always name from the title, never from the description
    pub short_names: bool,
    pub preferred_format: PreferredFormat,
}

impl FileNamer {
    pub fn new(max_length: usize, short_names: bool, preferred_format: PreferredFormat) -> Self {
        Self {
            max_length,
            short_names,
            preferred_format,
        }
    }

    /// Text the name is built from.
    ///
    /// The description is preferred when it fits within the length bound,
    /// since feed titles are often just "Episode 12".
    fn name_source<'a>(&self, item: &'a Item) -> &'a str {
        if self.short_names {
            return &item.title;
        }
        match item.description.as_deref().map(str::trim) {
            Some(desc) if !desc.is_empty() && desc.chars().count() <= self.max_length => desc,
            _ => &item.title,
        }
    }

    /// `<sanitized name>_<id><ext>`
    pub fn file_name(&self, item: &Item, content_type: Option<&str>) -> String {
        let stem = sanitize_filename(self.name_source(item), self.max_length);
        let id = sanitize_filename(&item.id, self.max_length);
        let ext = file_extension(&item.media_url, content_type, self.preferred_format);
        format!("{}_{}{}", stem, id, ext)
    }
}

/// If `path` does not exist but the same name with the other audio
/// extension does, return that one. Earlier runs may have guessed the
/// container differently.
pub fn existing_variant(path: &Path) -> Option<PathBuf> {
    if path.exists() {
        return Some(path.to_path_buf());
    }
    let other = match path.extension().and_then(|e| e.to_str()) {
        Some("mp3") => "m4a",
        Some("m4a") => "mp3",
        _ => return None,
    };
    let candidate = path.with_extension(other);
    candidate.exists().then_some(candidate)
}
