// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Resumable fetcher.
//!
//! Streams a media URL to disk starting at a byte offset. Each attempt asks
//! for `bytes=<on-disk size>-`, so a retry never re-fetches bytes that were
//! already flushed. Range violations (200 to a range request, a 206 at the
//! wrong offset, an unsatisfiable range) are resolved by restarting from zero.

use futures_util::StreamExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::error::TransferError;
use super::http::{HttpClient, HttpResponse};
use super::progress::{ProgressThrottle, DEFAULT_PROGRESS_INTERVAL_BYTES, PROGRESS_MIN_INTERVAL};
use super::retry::{RetryPolicy, Sleeper};
use super::types::FetchOutcome;

/// Default limit on waiting for a single body chunk.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Restarts from zero allowed within one fetch before giving up.
const MAX_RESTARTS: u32 = 2;

/// How often a retry wait checks for an interrupt.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Progress callback: `(bytes on disk, expected total)`.
pub type ProgressFn<'a> = &'a mut (dyn FnMut(u64, Option<u64>) + Send);

/// What one attempt ended with, when it did not fail.
enum Step {
    /// File is complete at this size
    Complete(u64),
    /// Local bytes cannot be trusted; start over from zero
    Restart {
        reason: String,
        /// Total size the server reported in the response that forced the restart
        remote_total: Option<u64>,
    },
}

/// Mutable bookkeeping shared across the attempts of one fetch.
struct TransferState {
    /// Size the server reported for the whole resource
    total: Option<u64>,
    /// Size the caller expected, used for progress and change detection
    expected: Option<u64>,
    /// Whether the bytes present at the start are still part of the file
    kept_initial: bool,
    bytes_transferred: u64,
}

impl TransferState {
    fn display_total(&self) -> Option<u64> {
        self.total.or(self.expected)
    }
}

pub struct Fetcher {
    client: Arc<dyn HttpClient>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    read_timeout: Duration,
    progress_interval: u64,
    progress_min_interval: Duration,
    cancel: Arc<AtomicBool>,
}

impl Fetcher {
    pub fn new(
        client: Arc<dyn HttpClient>,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client,
            policy,
            sleeper,
            read_timeout: DEFAULT_READ_TIMEOUT,
            progress_interval: DEFAULT_PROGRESS_INTERVAL_BYTES,
            progress_min_interval: PROGRESS_MIN_INTERVAL,
            cancel,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_progress_interval(mut self, bytes: u64) -> Self {
        self.progress_interval = bytes;
        self
    }

    pub fn with_min_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_min_interval = interval;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Resolves once the interrupt flag is set.
    async fn interrupted(&self) {
        while !self.cancelled() {
            tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
        }
    }

    /// Transfer `url` into `dest`, keeping the first `start_offset` bytes.
    ///
    /// `start_offset` must equal the current size of `dest`; if it does not,
    /// the fetch starts from zero.
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        start_offset: u64,
        expected_total: Option<u64>,
        on_progress: ProgressFn<'_>,
    ) -> Result<FetchOutcome, TransferError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut offset = start_offset;
        if offset > 0 {
            let on_disk = file_len(dest).await;
            if on_disk != offset {
                warn!(
                    path = %dest.display(),
                    offset,
                    on_disk,
                    "Local size changed since planning, starting from zero"
                );
                offset = 0;
            }
        }

        let mut state = TransferState {
            total: None,
            expected: expected_total,
            kept_initial: offset > 0,
            bytes_transferred: 0,
        };
        let mut attempts = 0u32;
        let mut restarts = 0u32;

        loop {
            if self.cancelled() {
                return Err(TransferError::Cancelled {
                    bytes_on_disk: file_len(dest).await,
                });
            }

            attempts += 1;
            debug!(url, offset, attempt = attempts, "Requesting media");

            match self.attempt(url, dest, offset, &mut state, &mut *on_progress).await {
                Ok(Step::Complete(final_size)) => {
                    return Ok(FetchOutcome {
                        final_size,
                        was_resumed: state.kept_initial,
                        total_size: state.total,
                        bytes_transferred: state.bytes_transferred,
                    });
                }
                Ok(Step::Restart { reason, remote_total }) => {
                    restarts += 1;
                    if restarts > MAX_RESTARTS {
                        return Err(TransferError::Inconsistent(format!(
                            "{} (after {} restarts)",
                            reason, MAX_RESTARTS
                        )));
                    }
                    warn!(url, offset, reason = %reason, "Discarding local bytes and restarting");
                    truncate(dest).await?;
                    offset = 0;
                    state.kept_initial = false;
                    state.total = None;
                    // The caller's size is stale once the server disagreed with it.
                    state.expected = remote_total;
                    // A restart is not a failed attempt.
                    attempts -= 1;
                }
                Err(e) if e.is_retriable() => {
                    if !self.policy.allows_another(attempts) {
                        return Err(TransferError::Exhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }
                    let delay = self.policy.delay_for(attempts - 1);
                    offset = file_len(dest).await;
                    warn!(
                        url,
                        offset,
                        status = ?e.status(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::select! {
                        _ = self.sleeper.sleep(delay) => {}
                        _ = self.interrupted() => {
                            debug!(url, offset, "Interrupted during retry wait");
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        dest: &Path,
        offset: u64,
        state: &mut TransferState,
        on_progress: ProgressFn<'_>,
    ) -> Result<Step, TransferError> {
        let response = self.client.get(url, offset).await?;

        let (file, offset) = match response.status {
            206 => {
                let start = response.content_range.and_then(|cr| cr.start());
                if start != Some(offset) {
                    if offset == 0 {
                        return Err(TransferError::permanent(format!(
                            "unrequested partial response starting at {:?}",
                            start
                        )));
                    }
                    return Ok(Step::Restart {
                        reason: format!(
                            "asked for byte {}, server sent range starting at {:?}",
                            offset, start
                        ),
                        remote_total: response.content_range.and_then(|cr| cr.total),
                    });
                }

                let reported = response
                    .content_range
                    .and_then(|cr| cr.total)
                    .or_else(|| response.content_length.map(|len| offset + len));
                let known = state.total.or(state.expected);
                if let (Some(reported), Some(known)) = (reported, known) {
                    if offset > 0 && reported != known {
                        return Ok(Step::Restart {
                            reason: format!("remote size changed from {} to {} bytes", known, reported),
                            remote_total: Some(reported),
                        });
                    }
                }
                state.total = reported;
                let file = if offset == 0 {
                    open_fresh(dest).await?
                } else {
                    open_for_append(dest, offset).await?
                };
                (file, offset)
            }
            200 => {
                if offset > 0 {
                    info!(url, offset, "Server ignored the range request, taking the full body");
                    state.kept_initial = false;
                }
                state.total = response.content_length;
                (open_fresh(dest).await?, 0)
            }
            416 => {
                let remote_total = response
                    .content_range
                    .and_then(|cr| cr.total)
                    .or(state.total)
                    .or(state.expected);
                if offset > 0 && remote_total == Some(offset) {
                    debug!(url, offset, "Range not satisfiable at the end of the file, already complete");
                    state.total = Some(offset);
                    return Ok(Step::Complete(offset));
                }
                if offset > 0 {
                    return Ok(Step::Restart {
                        reason: format!(
                            "range from byte {} not satisfiable (remote size {:?})",
                            offset, remote_total
                        ),
                        remote_total: response.content_range.and_then(|cr| cr.total),
                    });
                }
                return Err(TransferError::Permanent {
                    status: Some(416),
                    message: "range not satisfiable at offset 0".into(),
                });
            }
            status if (200..300).contains(&status) => {
                return Err(TransferError::Permanent {
                    status: Some(status),
                    message: format!("unexpected HTTP {} for a media request", status),
                });
            }
            status => return Err(TransferError::from_status(status)),
        };

        self.stream_body(response, dest, file, offset, state, on_progress).await
    }

    async fn stream_body(
        &self,
        response: HttpResponse,
        dest: &Path,
        mut file: File,
        offset: u64,
        state: &mut TransferState,
        on_progress: ProgressFn<'_>,
    ) -> Result<Step, TransferError> {
        let mut body = response.body;
        let mut written = offset;
        let mut throttle = ProgressThrottle::new(self.progress_interval, self.progress_min_interval, written);
        on_progress(written, state.display_total());

        loop {
            let chunk = match tokio::time::timeout(self.read_timeout, body.next()).await {
                Err(_) => {
                    close(&mut file).await?;
                    return Err(TransferError::transient(format!(
                        "no data for {:?} at byte {}",
                        self.read_timeout, written
                    )));
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    close(&mut file).await?;
                    return Err(e);
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            let len = chunk.len() as u64;
            if let Some(total) = state.total {
                if written + len > total {
                    close(&mut file).await?;
                    drop(file);
                    truncate(dest).await?;
                    return Err(TransferError::Inconsistent(format!(
                        "server sent more than the reported {} bytes",
                        total
                    )));
                }
            }

            file.write_all(&chunk).await?;
            written += len;
            state.bytes_transferred += len;

            if throttle.should_report(written, state.display_total()) {
                on_progress(written, state.display_total());
            }

            if self.cancelled() {
                close(&mut file).await?;
                info!(bytes_on_disk = written, "Interrupted, partial file kept");
                return Err(TransferError::Cancelled { bytes_on_disk: written });
            }
        }

        close(&mut file).await?;

        if let Some(total) = state.total {
            if written < total {
                return Err(TransferError::transient(format!(
                    "connection closed at byte {} of {}",
                    written, total
                )));
            }
        }

        Ok(Step::Complete(written))
    }
}

/// Size of a file, 0 if it does not exist.
async fn file_len(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

async fn open_fresh(path: &Path) -> Result<File, TransferError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await?;
    Ok(file)
}

async fn open_for_append(path: &Path, offset: u64) -> Result<File, TransferError> {
    let file = OpenOptions::new().append(true).open(path).await?;
    let len = file.metadata().await?.len();
    if len != offset {
        return Err(TransferError::Inconsistent(format!(
            "expected {} bytes on disk before appending, found {}",
            offset, len
        )));
    }
    Ok(file)
}

/// Flush buffered writes and sync to disk.
async fn close(file: &mut File) -> Result<(), TransferError> {
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

async fn truncate(path: &Path) -> Result<(), TransferError> {
    match OpenOptions::new().write(true).open(path).await {
        Ok(file) => {
            file.set_len(0).await?;
            file.sync_all().await?;
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
