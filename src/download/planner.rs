// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transfer planning: skip, resume or restart.
//!
//! [`decide`] is the pure decision table. [`Planner`] gathers its inputs
//! (local file size, cache entry, server-reported size) and applies it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::http::{HttpClient, RemoteMeta};
use super::types::{CacheEntry, Item, TransferPlan};
use super::verify::sha256_file;
use crate::naming::{existing_variant, FileNamer};

/// Decide what to do with one item.
///
/// | local             | cache entry        | local vs expected | plan         |
/// |-------------------|--------------------|-------------------|--------------|
/// | absent or empty   | any                | -                 | Restart      |
/// | present           | any                | expected unknown  | Resume(local)|
/// | present           | any                | local > expected  | Restart      |
/// | present           | any                | equal             | Skip         |
/// | present           | complete           | local < expected  | Restart      |
/// | present           | incomplete/absent  | local < expected  | Resume(local)|
///
/// A complete entry with a smaller local file means the file was truncated
/// after it was verified, so its bytes are not trusted for a resume.
pub fn decide(local_size: Option<u64>, entry: Option<&CacheEntry>, expected: Option<u64>) -> TransferPlan {
    let local = match local_size {
        None | Some(0) => return TransferPlan::Restart,
        Some(local) => local,
    };

    let expected = match expected {
        None => return TransferPlan::Resume(local),
        Some(expected) => expected,
    };

    if local > expected {
        return TransferPlan::Restart;
    }
    if local == expected {
        return TransferPlan::Skip;
    }

    match entry {
        Some(entry) if entry.complete => TransferPlan::Restart,
        _ => TransferPlan::Resume(local),
    }
}

/// Where the expected size came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSource {
    /// HEAD probe this run
    Server,
    /// Recorded by an earlier run
    Cache,
    /// Feed enclosure length, often approximate
    Feed,
}

impl SizeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeSource::Server => "server",
            SizeSource::Cache => "cache",
            SizeSource::Feed => "feed",
        }
    }

    /// Whether a verifier may hold a transfer to this size.
    pub fn is_authoritative(&self) -> bool {
        !matches!(self, SizeSource::Feed)
    }
}

/// Everything the orchestrator needs to act on a plan.
#[derive(Debug, Clone)]
pub struct PlanDecision {
    pub plan: TransferPlan,
    pub expected: Option<u64>,
    pub size_source: Option<SizeSource>,
    /// Result of the metadata probe, if one was made and succeeded
    pub remote: Option<RemoteMeta>,
    pub path: PathBuf,
    pub file_name: String,
    pub local_size: Option<u64>,
    /// Why the plan was chosen, for logs
    pub reason: &'static str,
}

impl PlanDecision {
    /// Expected SHA-256, when the server advertises one.
    pub fn expected_hash(&self) -> Option<String> {
        self.remote.as_ref().and_then(|meta| meta.sha256_etag())
    }
}

pub struct Planner {
    client: Arc<dyn HttpClient>,
    namer: FileNamer,
    download_dir: PathBuf,
    recheck: bool,
}

impl Planner {
    pub fn new(client: Arc<dyn HttpClient>, namer: FileNamer, download_dir: impl Into<PathBuf>, recheck: bool) -> Self {
        Self {
            client,
            namer,
            download_dir: download_dir.into(),
            recheck,
        }
    }

    /// Plan one item against the local file and its cache entry.
    pub async fn plan(&self, item: &Item, cached: Option<&CacheEntry>) -> PlanDecision {
        if !self.recheck {
            if let Some(decision) = self.fast_skip(cached).await {
                return decision;
            }
        }

        let remote = self.probe(&item.media_url).await;

        let file_name = cached
            .and_then(|entry| entry.file_name.clone())
            .unwrap_or_else(|| {
                self.namer
                    .file_name(item, remote.as_ref().and_then(|m| m.content_type.as_deref()))
            });
        let wanted = self.download_dir.join(&file_name);
        let path = existing_variant(&wanted).unwrap_or(wanted);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(file_name);

        let local_size = local_size(&path).await;

        let (expected, size_source) = if let Some(len) = remote.as_ref().and_then(|m| m.content_length).filter(|l| *l > 0) {
            (Some(len), Some(SizeSource::Server))
        } else if let Some(size) = cached.filter(|_| !self.recheck).and_then(|e| e.expected_size) {
            (Some(size), Some(SizeSource::Cache))
        } else if let Some(len) = item.enclosure_length.filter(|l| *l > 0) {
            (Some(len), Some(SizeSource::Feed))
        } else {
            (None, None)
        };

        let entry_for_table = if self.recheck { None } else { cached };
        let mut plan = decide(local_size, entry_for_table, expected);
        let mut reason = describe(plan, local_size, expected);

        if plan == TransferPlan::Skip && self.recheck {
            let expected_hash = remote
                .as_ref()
                .and_then(|m| m.sha256_etag())
                .or_else(|| cached.and_then(|e| e.content_hash.clone()));
            if let Some(expected_hash) = expected_hash {
                match sha256_file(&path).await {
                    Ok(actual) if actual.eq_ignore_ascii_case(&expected_hash) => {
                        reason = "size and hash match";
                    }
                    Ok(actual) => {
                        warn!(id = %item.id, expected = %expected_hash, actual = %actual, "Hash mismatch on recheck");
                        plan = TransferPlan::Restart;
                        reason = "hash mismatch";
                    }
                    Err(e) => {
                        warn!(id = %item.id, error = %e, "Could not hash local file");
                        plan = TransferPlan::Restart;
                        reason = "local file unreadable";
                    }
                }
            }
        }

        debug!(
            id = %item.id,
            plan = %plan,
            local = ?local_size,
            expected = ?expected,
            source = size_source.map(|s| s.as_str()),
            reason,
            "Planned"
        );

        PlanDecision {
            plan,
            expected,
            size_source,
            remote,
            path,
            file_name,
            local_size,
            reason,
        }
    }

    /// A complete entry whose file still has the recorded size is skipped
    /// without touching the network.
    async fn fast_skip(&self, cached: Option<&CacheEntry>) -> Option<PlanDecision> {
        let entry = cached.filter(|e| e.complete)?;
        let expected = entry.expected_size?;
        let file_name = entry.file_name.clone()?;
        let path = self.download_dir.join(&file_name);
        let local = local_size(&path).await?;
        if local != expected {
            return None;
        }

        Some(PlanDecision {
            plan: TransferPlan::Skip,
            expected: Some(expected),
            size_source: Some(SizeSource::Cache),
            remote: None,
            path,
            file_name,
            local_size: Some(local),
            reason: "cached as complete",
        })
    }

    /// HEAD probe. A failure is logged and planning carries on without it.
    async fn probe(&self, url: &str) -> Option<RemoteMeta> {
        match self.client.head(url).await {
            Ok(meta) if meta.is_success() => Some(meta),
            Ok(meta) => {
                debug!(url, status = meta.status, "Probe returned an error status");
                None
            }
            Err(e) => {
                debug!(url, error = %e, "Probe failed, planning without a server size");
                None
            }
        }
    }
}

fn describe(plan: TransferPlan, local: Option<u64>, expected: Option<u64>) -> &'static str {
    match (plan, local, expected) {
        (TransferPlan::Restart, None, _) => "no local file",
        (TransferPlan::Restart, Some(0), _) => "local file is empty",
        (TransferPlan::Restart, Some(l), Some(e)) if l > e => "local file larger than expected",
        (TransferPlan::Restart, _, _) => "completed file was truncated",
        (TransferPlan::Resume(_), _, None) => "expected size unknown",
        (TransferPlan::Resume(_), _, _) => "partial file",
        (TransferPlan::Skip, _, _) => "size matches",
    }
}

/// Size of a regular file, `None` if absent.
async fn local_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}
