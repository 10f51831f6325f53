// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Run configuration.
//!
//! Read once at startup from JSON, validated, then passed by reference.
//! Every field has a default so a partial document is enough.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::download::progress::DEFAULT_PROGRESS_INTERVAL_BYTES;
use crate::download::RetryPolicy;
use crate::feed::PreferredQuality;
use crate::naming::PreferredFormat;

/// File looked up in the working directory when `--config` is not given.
pub const LOCAL_CONFIG_FILE: &str = "castfetch.json";

/// Cache file name inside the download directory.
pub const DEFAULT_CACHE_FILE: &str = "cache.json";

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Parent directory for per-feed download directories (default: working directory)
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Cache location; defaults to `cache.json` inside the feed's directory
    #[serde(default)]
    pub cache_file: Option<PathBuf>,
    /// Attempts per item, counting the first
    #[serde(default = "default_max_attempts", alias = "max_retries")]
    pub max_attempts: u32,
    /// Connect and response timeout, also the per-chunk stall limit
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Upper bound on sanitized name length, in characters
    #[serde(default = "default_filename_max_length")]
    pub filename_max_length: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log file path; empty disables file logging
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub preferred_format: PreferredFormat,
    /// Enclosure variant to pick when an episode offers several
    #[serde(default)]
    pub preferred_quality: PreferredQuality,
    /// Store and check SHA-256 of completed files
    #[serde(default)]
    pub verify_checksums: bool,
    /// Bytes between progress reports
    #[serde(default = "default_progress_interval_bytes")]
    pub progress_interval_bytes: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_filename_max_length() -> usize {
    80
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "castfetch.log".to_string()
}

fn default_progress_interval_bytes() -> u64 {
    DEFAULT_PROGRESS_INTERVAL_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: None,
            cache_file: None,
            max_attempts: default_max_attempts(),
            timeout_secs: default_timeout_secs(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            filename_max_length: default_filename_max_length(),
            log_level: default_log_level(),
            log_file: default_log_file(),
            preferred_format: PreferredFormat::default(),
            preferred_quality: PreferredQuality::default(),
            verify_checksums: false,
            progress_interval_bytes: default_progress_interval_bytes(),
        }
    }
}

impl Config {
    /// Load and validate the configuration.
    ///
    /// An explicit path must exist. Otherwise `castfetch.json` in the working
    /// directory is used, then `<config dir>/castfetch/config.json`, then the
    /// defaults. Returns the file actually read, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("config file {} does not exist", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::search_paths().into_iter().find(|p| p.is_file()),
        };

        let config = match &path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok((config, path))
    }

    /// Parse one JSON file without validating it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("castfetch").join("config.json"));
        }
        paths
    }

    /// Reject values the downloader cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be at least 1");
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            bail!(
                "retry_max_delay_ms ({}) is smaller than retry_base_delay_ms ({})",
                self.retry_max_delay_ms,
                self.retry_base_delay_ms
            );
        }
        if self.filename_max_length < 8 {
            bail!("filename_max_length must be at least 8");
        }
        if self.progress_interval_bytes == 0 {
            bail!("progress_interval_bytes must be greater than 0");
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            bail!(
                "log_level '{}' is not one of {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            );
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    /// Base directory that per-feed directories are created in.
    pub fn base_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Cache location for a given feed directory.
    pub fn cache_path(&self, feed_dir: &Path) -> PathBuf {
        self.cache_file
            .clone()
            .unwrap_or_else(|| feed_dir.join(DEFAULT_CACHE_FILE))
    }

    /// Log file path, or `None` when file logging is disabled.
    pub fn log_file_path(&self) -> Option<PathBuf> {
        let trimmed = self.log_file.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.filename_max_length, 80);
        assert_eq!(config.preferred_format, PreferredFormat::Auto);
        assert_eq!(config.preferred_quality, PreferredQuality::Medium);
        assert_eq!(config.progress_interval_bytes, 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_merges_onto_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"timeout_secs": 5, "preferred_format": "mp3"}"#).unwrap();
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.preferred_format, PreferredFormat::Mp3);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.log_file, "castfetch.log");
    }

    #[test]
    fn test_max_retries_alias() {
        let config: Config = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_policy().max_attempts, 5);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            r#"{"max_attempts": 0}"#,
            r#"{"timeout_secs": 0}"#,
            r#"{"retry_base_delay_ms": 5000, "retry_max_delay_ms": 1000}"#,
            r#"{"filename_max_length": 2}"#,
            r#"{"log_level": "loud"}"#,
            r#"{"progress_interval_bytes": 0}"#,
        ];
        for case in cases {
            let config: Config = serde_json::from_str(case).unwrap();
            assert!(config.validate().is_err(), "expected {} to be rejected", case);
        }
    }

    #[test]
    fn test_unknown_format_is_a_parse_error() {
        assert!(serde_json::from_str::<Config>(r#"{"preferred_format": "ogg"}"#).is_err());
        assert!(serde_json::from_str::<Config>(r#"{"preferred_quality": "best"}"#).is_err());
    }

    #[test]
    fn test_preferred_quality() {
        let config: Config = serde_json::from_str(r#"{"preferred_quality": "high"}"#).unwrap();
        assert_eq!(config.preferred_quality, PreferredQuality::High);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.json");
        fs::write(&path, r#"{"download_dir": "/tmp/pods", "verify_checksums": true}"#).unwrap();

        let (config, used) = Config::load(Some(&path)).unwrap();
        assert_eq!(used.as_deref(), Some(path.as_path()));
        assert!(config.verify_checksums);
        assert_eq!(config.base_dir(), PathBuf::from("/tmp/pods"));
    }

    #[test]
    fn test_load_missing_or_invalid_explicit_file() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.json"))).is_err());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(Config::load(Some(&bad)).is_err());

        let invalid = dir.path().join("invalid.json");
        fs::write(&invalid, r#"{"max_attempts": 0}"#).unwrap();
        assert!(Config::load(Some(&invalid)).is_err());
    }

    #[test]
    fn test_paths() {
        let mut config = Config::default();
        let feed_dir = Path::new("pods/rsg");
        assert_eq!(config.cache_path(feed_dir), feed_dir.join("cache.json"));

        config.cache_file = Some(PathBuf::from("/var/cache/castfetch.json"));
        assert_eq!(config.cache_path(feed_dir), PathBuf::from("/var/cache/castfetch.json"));

        assert_eq!(config.log_file_path(), Some(PathBuf::from("castfetch.log")));
        config.log_file = "  ".into();
        assert_eq!(config.log_file_path(), None);
    }
}
