// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent download cache.
//!
//! Maps item identifiers to the last known outcome so a later run can skip
//! completed files and resume partial ones. The whole document is rewritten
//! after every item: temp file, fsync, rename, all under an exclusive lock
//! on a sibling `.lock` file.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::CacheEntry;

/// Schema version written into every cache document.
pub const CACHE_VERSION: u32 = 1;

/// Default timeout for acquiring file locks (5 seconds)
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval when waiting for lock acquisition
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// On-disk cache document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheDocument {
    pub version: u32,
    pub last_saved: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entries: BTreeMap<String, CacheEntry>,
}

impl Default for CacheDocument {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            last_saved: None,
            entries: BTreeMap::new(),
        }
    }
}

impl CacheDocument {
    /// Structural checks serde cannot express.
    fn validate(&self) -> std::result::Result<(), String> {
        if self.version != CACHE_VERSION {
            return Err(format!("unsupported cache version {}", self.version));
        }
        for (id, entry) in &self.entries {
            if id.is_empty() {
                return Err("entry with an empty identifier".into());
            }
            if entry.complete && entry.expected_size.is_none() {
                return Err(format!("entry '{}' is complete but has no expected size", id));
            }
        }
        Ok(())
    }
}

/// The only owner of cache entries. Every `put` is persisted before it returns.
#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    doc: CacheDocument,
}

impl CacheStore {
    /// Empty store that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            doc: CacheDocument::default(),
        }
    }

    /// Load the store at `path`.
    ///
    /// Never fails: a missing file gives an empty store, and an unreadable or
    /// invalid one is moved aside to `<path>.corrupt` with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut store = Self::new(path.clone());

        if !path.exists() {
            debug!(path = %path.display(), "No cache file yet, starting empty");
            return store;
        }

        match Self::read_document(&path) {
            Ok(doc) => {
                debug!(path = %path.display(), entries = doc.entries.len(), "Loaded cache");
                store.doc = doc;
            }
            Err(e) => {
                let aside = corrupt_path(&path);
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Cache file is unreadable, starting with an empty cache"
                );
                if let Err(rename_err) = fs::rename(&path, &aside) {
                    warn!(
                        path = %aside.display(),
                        error = %rename_err,
                        "Could not move the unreadable cache aside"
                    );
                }
            }
        }

        store
    }

    fn read_document(path: &Path) -> Result<CacheDocument> {
        let lock_path = lock_path(path);
        let lock_file = open_lock_file(&lock_path)?;
        if let Err(e) = acquire_shared_lock_with_timeout(&lock_file, LOCK_TIMEOUT) {
            // Reading without the lock can only see a complete old or new file.
            warn!(error = %e, "Reading cache without a lock");
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache file: {:?}", path))?;
        let doc: CacheDocument = serde_json::from_str(&content)
            .with_context(|| "Failed to parse cache file")?;
        if let Err(reason) = doc.validate() {
            bail!("Invalid cache file: {}", reason);
        }
        Ok(doc)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &str) -> Option<&CacheEntry> {
        self.doc.entries.get(id)
    }

    /// Overwrite the entry for `id` and persist immediately.
    pub fn put(&mut self, id: &str, entry: CacheEntry) -> Result<()> {
        self.doc.entries.insert(id.to_string(), entry);
        self.save()
    }

    pub fn len(&self) -> usize {
        self.doc.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.entries.is_empty()
    }

    /// Persist the whole document atomically.
    pub fn save(&mut self) -> Result<()> {
        self.save_with_timeout(LOCK_TIMEOUT)
    }

    pub fn save_with_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {:?}", parent))?;
            }
        }

        let _lock_guard = acquire_exclusive_lock_with_timeout(&lock_path(&self.path), timeout)?;

        let temp_path = self.path.with_extension("tmp");
        self.doc.last_saved = Some(Utc::now());
        let content = serde_json::to_string_pretty(&self.doc)
            .with_context(|| "Failed to serialize cache to JSON")?;

        {
            let mut temp_file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;

            temp_file.write_all(content.as_bytes())
                .with_context(|| "Failed to write to temp file")?;
            temp_file.sync_all()
                .with_context(|| "Failed to sync temp file to disk")?;
        }

        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to rename temp file to cache file: {:?} -> {:?}", temp_path, self.path))?;

        Ok(())
    }
}

/// `cache.json` -> `cache.json.corrupt`
fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".corrupt");
    PathBuf::from(name)
}

fn lock_path(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for lock file: {:?}", parent))?;
        }
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open lock file: {:?}", path))
}

/// Acquire an exclusive lock with timeout.
///
/// Returns the locked file handle; the lock is released when it is dropped.
fn acquire_exclusive_lock_with_timeout(path: &Path, timeout: Duration) -> Result<File> {
    let lock_file = open_lock_file(path)?;
    let start = Instant::now();

    loop {
        match FileExt::try_lock_exclusive(&lock_file) {
            Ok(()) => return Ok(lock_file),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if start.elapsed() >= timeout {
                    bail!(
                        "Timed out waiting for exclusive lock on {:?} after {:?}. \
                         Another castfetch run may be writing to the cache.",
                        path,
                        timeout
                    );
                }
                thread::sleep(LOCK_RETRY_INTERVAL);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to acquire exclusive lock on {:?}", path));
            }
        }
    }
}

fn acquire_shared_lock_with_timeout(file: &File, timeout: Duration) -> Result<()> {
    let start = Instant::now();

    loop {
        match FileExt::try_lock_shared(file) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if start.elapsed() >= timeout {
                    bail!("Timed out waiting for shared lock after {:?}", timeout);
                }
                thread::sleep(LOCK_RETRY_INTERVAL);
            }
            Err(e) => {
                return Err(e).with_context(|| "Failed to acquire shared lock on cache file");
            }
        }
    }
}
