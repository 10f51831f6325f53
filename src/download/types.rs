// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Types shared by the planner, fetcher, verifier and orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One downloadable feed entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Stable identifier, unique per feed entry
    pub id: String,
    /// Human-readable title (may contain non-ASCII text)
    pub title: String,
    /// Direct URL of the media file
    pub media_url: String,
    /// Publication time, if the feed carried a parseable one
    pub published: Option<DateTime<Utc>>,
    /// Enclosure length advertised by the feed
    pub enclosure_length: Option<u64>,
    /// Episode number extracted from the title
    pub episode_number: Option<u32>,
    /// Item description, used for naming when it is short enough
    pub description: Option<String>,
}

impl Item {
    /// Create an item with only the required fields set.
    pub fn new(id: impl Into<String>, title: impl Into<String>, media_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            media_url: media_url.into(),
            published: None,
            enclosure_length: None,
            episode_number: None,
            description: None,
        }
    }
}

/// Persisted record of the last known outcome for one item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// Expected byte size, once known
    pub expected_size: Option<u64>,
    /// True only after the Verifier accepted the file
    pub complete: bool,
    /// When this entry was last written
    pub updated_at: DateTime<Utc>,
    /// Hex SHA-256 of the completed file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Media URL the entry was produced from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// File name inside the download directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Why the last attempt did not complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl CacheEntry {
    /// Entry for a verified, complete file.
    pub fn completed(expected_size: u64, content_hash: Option<String>) -> Self {
        Self {
            expected_size: Some(expected_size),
            complete: true,
            updated_at: Utc::now(),
            content_hash,
            media_url: None,
            file_name: None,
            last_error: None,
        }
    }

    /// Entry for an item that did not reach a verified state this run.
    pub fn incomplete(expected_size: Option<u64>, reason: impl Into<String>) -> Self {
        Self {
            expected_size,
            complete: false,
            updated_at: Utc::now(),
            content_hash: None,
            media_url: None,
            file_name: None,
            last_error: Some(reason.into()),
        }
    }

    /// Attach the media URL and file name this entry describes.
    pub fn for_file(mut self, media_url: impl Into<String>, file_name: impl Into<String>) -> Self {
        self.media_url = Some(media_url.into());
        self.file_name = Some(file_name.into());
        self
    }
}

/// Action decided for one item before any transfer happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPlan {
    /// Local file is complete and verified
    Skip,
    /// Continue from this byte offset (the current local size)
    Resume(u64),
    /// Discard local state and download from byte zero
    Restart,
}

impl TransferPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPlan::Skip => "skip",
            TransferPlan::Resume(_) => "resume",
            TransferPlan::Restart => "restart",
        }
    }

    /// Byte offset the fetcher should start from.
    pub fn start_offset(&self) -> u64 {
        match self {
            TransferPlan::Resume(offset) => *offset,
            _ => 0,
        }
    }
}

impl fmt::Display for TransferPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferPlan::Resume(offset) => write!(f, "resume({})", offset),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Result of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Size of the destination file after the transfer
    pub final_size: u64,
    /// True if the bytes already on disk at the start were kept
    pub was_resumed: bool,
    /// Total size the server reported, if it reported one
    pub total_size: Option<u64>,
    /// Bytes received over the network during this fetch
    pub bytes_transferred: u64,
}

/// Verdict on a file after transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Verified { size: u64, hash: Option<String> },
    SizeMismatch { expected: u64, actual: u64 },
    HashMismatch { expected: String, actual: String },
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified { .. })
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::Verified { size, .. } => write!(f, "verified ({} bytes)", size),
            Verification::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {} bytes, found {}", expected, actual)
            }
            Verification::HashMismatch { expected, actual } => {
                write!(f, "hash mismatch: expected {}, found {}", expected, actual)
            }
        }
    }
}

/// Per-item lifecycle within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Planned,
    Transferring,
    Verifying,
    Done,
    Failed,
}

impl ItemState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (Pending, Planned)
                | (Pending, Failed)
                | (Planned, Transferring)
                | (Planned, Done)
                | (Planned, Failed)
                | (Transferring, Verifying)
                | (Transferring, Failed)
                | (Verifying, Done)
                | (Verifying, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Pending => "pending",
            ItemState::Planned => "planned",
            ItemState::Transferring => "transferring",
            ItemState::Verifying => "verifying",
            ItemState::Done => "done",
            ItemState::Failed => "failed",
        }
    }
}

/// How one item ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Already complete on disk
    Skipped,
    /// Transferred and verified
    Downloaded { resumed: bool, bytes: u64, size: u64 },
    /// Gave up for this run
    Failed { reason: String },
    /// Stopped by an interrupt; partial bytes kept
    Interrupted,
}

/// Identifier and reason for one failed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub id: String,
    pub reason: String,
}

/// Aggregate produced at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub resumed: usize,
    pub bytes_transferred: u64,
    pub failures: Vec<FailedItem>,
    pub interrupted: bool,
}

impl RunReport {
    /// Fold one item outcome into the report.
    pub fn record(&mut self, id: &str, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Downloaded { resumed, bytes, .. } => {
                self.succeeded += 1;
                self.bytes_transferred += bytes;
                if *resumed {
                    self.resumed += 1;
                }
            }
            ItemOutcome::Failed { reason } => {
                self.failed += 1;
                self.failures.push(FailedItem {
                    id: id.to_string(),
                    reason: reason.clone(),
                });
            }
            ItemOutcome::Interrupted => self.interrupted = true,
        }
    }

    /// Items that reached a terminal state.
    pub fn processed(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.interrupted
    }
}

/// Format a byte count for humans.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
