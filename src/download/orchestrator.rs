// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Run orchestrator.
//!
//! Processes items strictly one after another: plan, fetch, verify, then
//! write the outcome to the cache before the next item starts. One item's
//! failure never stops the run; an interrupt does, after the in-flight item
//! has been recorded as incomplete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::TransferError;
use super::fetcher::Fetcher;
use super::planner::{PlanDecision, Planner};
use super::progress::ProgressReporter;
use super::state::CacheStore;
use super::types::{CacheEntry, Item, ItemOutcome, ItemState, RunReport, TransferPlan, Verification};
use super::verify::{sha256_file, verify};

pub struct Orchestrator {
    planner: Planner,
    fetcher: Fetcher,
    cache: CacheStore,
    reporter: Arc<dyn ProgressReporter>,
    cancel: Arc<AtomicBool>,
    /// Store a SHA-256 of every completed file
    verify_checksums: bool,
}

impl Orchestrator {
    pub fn new(
        planner: Planner,
        fetcher: Fetcher,
        cache: CacheStore,
        reporter: Arc<dyn ProgressReporter>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            planner,
            fetcher,
            cache,
            reporter,
            cancel,
            verify_checksums: false,
        }
    }

    pub fn with_checksums(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Process every item in order and aggregate the outcomes.
    pub async fn run(&mut self, items: &[Item]) -> RunReport {
        let mut report = RunReport::default();

        for (index, item) in items.iter().enumerate() {
            if self.cancelled() {
                info!(remaining = items.len() - index, "Interrupt received, stopping before next item");
                report.interrupted = true;
                break;
            }

            debug!(id = %item.id, position = index + 1, total = items.len(), "Processing item");
            let outcome = self.process(item).await;
            self.reporter.item_finished(item, &outcome);
            report.record(&item.id, &outcome);

            if outcome == ItemOutcome::Interrupted {
                break;
            }
        }

        info!(
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            resumed = report.resumed,
            bytes = report.bytes_transferred,
            interrupted = report.interrupted,
            "Run finished"
        );
        report
    }

    async fn process(&mut self, item: &Item) -> ItemOutcome {
        let mut state = ItemState::Pending;
        let cached = self.cache.get(&item.id).cloned();

        let decision = self.planner.plan(item, cached.as_ref()).await;
        advance(&item.id, &mut state, ItemState::Planned);

        if decision.plan == TransferPlan::Skip {
            let hash = self.hash_for_skip(&decision, cached.as_ref()).await;
            let size = decision.local_size.or(decision.expected).unwrap_or(0);
            self.commit(
                &item.id,
                CacheEntry::completed(size, hash).for_file(&item.media_url, &decision.file_name),
            );
            advance(&item.id, &mut state, ItemState::Done);
            info!(
                id = %item.id,
                plan = %decision.plan,
                expected = ?decision.expected,
                status = state.as_str(),
                reason = decision.reason,
                "Already complete"
            );
            return ItemOutcome::Skipped;
        }

        advance(&item.id, &mut state, ItemState::Transferring);
        info!(
            id = %item.id,
            plan = %decision.plan,
            offset = decision.plan.start_offset(),
            expected = ?decision.expected,
            reason = decision.reason,
            file = %decision.file_name,
            "Downloading"
        );

        let trusted_expected = decision
            .expected
            .filter(|_| decision.size_source.is_some_and(|s| s.is_authoritative()));
        self.reporter.item_started(item, &decision.plan, decision.expected);

        let reporter = Arc::clone(&self.reporter);
        let mut on_progress = |bytes: u64, total: Option<u64>| reporter.item_progress(item, bytes, total);
        let fetched = self
            .fetcher
            .fetch(
                &item.media_url,
                &decision.path,
                decision.plan.start_offset(),
                trusted_expected,
                &mut on_progress,
            )
            .await;

        let outcome = match fetched {
            Ok(outcome) => outcome,
            Err(TransferError::Cancelled { bytes_on_disk }) => {
                advance(&item.id, &mut state, ItemState::Failed);
                warn!(
                    id = %item.id,
                    offset = bytes_on_disk,
                    expected = ?decision.expected,
                    status = state.as_str(),
                    reason = "interrupted",
                    "Transfer interrupted, partial file kept"
                );
                self.commit(
                    &item.id,
                    CacheEntry::incomplete(trusted_expected, "interrupted")
                        .for_file(&item.media_url, &decision.file_name),
                );
                return ItemOutcome::Interrupted;
            }
            Err(e) => {
                advance(&item.id, &mut state, ItemState::Failed);
                return self.fail(item, &decision, trusted_expected, e.kind(), e.status(), e.to_string());
            }
        };

        advance(&item.id, &mut state, ItemState::Verifying);
        let verify_size = outcome
            .total_size
            .or(trusted_expected)
            .unwrap_or(outcome.final_size);
        let expected_hash = decision.expected_hash();

        match verify(&decision.path, verify_size, expected_hash.as_deref()).await {
            Ok(Verification::Verified { size, hash }) => {
                let hash = match hash {
                    Some(hash) => Some(hash),
                    None if self.verify_checksums => sha256_file(&decision.path).await.ok(),
                    None => None,
                };
                self.commit(
                    &item.id,
                    CacheEntry::completed(size, hash).for_file(&item.media_url, &decision.file_name),
                );
                advance(&item.id, &mut state, ItemState::Done);
                info!(
                    id = %item.id,
                    plan = %decision.plan,
                    expected = size,
                    bytes = outcome.bytes_transferred,
                    resumed = outcome.was_resumed,
                    status = state.as_str(),
                    file = %decision.file_name,
                    "Saved"
                );
                ItemOutcome::Downloaded {
                    resumed: outcome.was_resumed,
                    bytes: outcome.bytes_transferred,
                    size,
                }
            }
            Ok(mismatch) => {
                advance(&item.id, &mut state, ItemState::Failed);
                // A file that failed verification must not be resumed or skipped next time.
                if let Err(e) = tokio::fs::remove_file(&decision.path).await {
                    warn!(id = %item.id, error = %e, "Could not remove file that failed verification");
                }
                self.fail(item, &decision, Some(verify_size), "verification", None, mismatch.to_string())
            }
            Err(e) => {
                advance(&item.id, &mut state, ItemState::Failed);
                self.fail(item, &decision, Some(verify_size), "io", None, format!("verification failed: {}", e))
            }
        }
    }

    fn fail(
        &mut self,
        item: &Item,
        decision: &PlanDecision,
        expected: Option<u64>,
        kind: &str,
        http_status: Option<u16>,
        reason: String,
    ) -> ItemOutcome {
        error!(
            id = %item.id,
            plan = %decision.plan,
            offset = decision.plan.start_offset(),
            expected = ?expected,
            kind,
            http_status = ?http_status,
            status = ItemState::Failed.as_str(),
            reason = %reason,
            "Download failed"
        );
        self.commit(
            &item.id,
            CacheEntry::incomplete(expected, reason.clone()).for_file(&item.media_url, &decision.file_name),
        );
        ItemOutcome::Failed { reason }
    }

    /// Keep a stored hash on skip; compute one only when checksums are on.
    async fn hash_for_skip(&self, decision: &PlanDecision, cached: Option<&CacheEntry>) -> Option<String> {
        let known = cached
            .filter(|e| e.complete && e.expected_size == decision.local_size)
            .and_then(|e| e.content_hash.clone());
        if known.is_some() || !self.verify_checksums {
            return known;
        }
        sha256_file(&decision.path).await.ok()
    }

    /// Write one outcome through to disk. A failed save is logged and the
    /// run goes on; the next successful save rewrites the whole document.
    fn commit(&mut self, id: &str, entry: CacheEntry) {
        if let Err(e) = self.cache.put(id, entry) {
            error!(id, path = %self.cache.path().display(), error = %e, "Failed to save cache");
        }
    }
}

fn advance(id: &str, state: &mut ItemState, next: ItemState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal transition {} -> {}",
        state.as_str(),
        next.as_str()
    );
    debug!(id, from = state.as_str(), to = next.as_str(), "State change");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::progress::NoopReporter;
    use crate::download::retry::{RecordingSleeper, RetryPolicy};
    use crate::download::testing::{body_of, Fault, FakeServer};
    use crate::naming::{FileNamer, PreferredFormat};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    const URL_A: &str = "https://dl.example/epi_1.mp3";
    const URL_B: &str = "https://dl.example/epi_2.mp3";

    fn items() -> Vec<Item> {
        vec![
            Item::new("1", "Episode 1", URL_A),
            Item::new("2", "Episode 2", URL_B),
        ]
    }

    fn orchestrator(server: &Arc<FakeServer>, dir: &Path, recheck: bool) -> Orchestrator {
        let cancel = Arc::new(AtomicBool::new(false));
        let namer = FileNamer::new(80, true, PreferredFormat::Auto);
        let planner = Planner::new(server.clone(), namer, dir, recheck);
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30));
        let fetcher = Fetcher::new(server.clone(), policy, Arc::new(RecordingSleeper::new()), cancel.clone());
        let cache = CacheStore::load(dir.join("cache.json"));
        Orchestrator::new(planner, fetcher, cache, Arc::new(NoopReporter), cancel)
    }

    #[tokio::test]
    async fn test_run_downloads_then_skips() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(
            FakeServer::new(URL_A, body_of(3_000)).with_resource(URL_B, body_of(5_000)),
        );

        let report = orchestrator(&server, dir.path(), false).run(&items()).await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.bytes_transferred, 8_000);
        assert!(report.is_clean());

        let gets = server.get_count();
        let second = orchestrator(&server, dir.path(), false).run(&items()).await;
        assert_eq!(second.skipped, 2);
        assert_eq!(second.succeeded, 0);
        assert_eq!(server.get_count(), gets, "second run must not download");

        let cache = CacheStore::load(dir.path().join("cache.json"));
        let entry = cache.get("2").unwrap();
        assert!(entry.complete);
        assert_eq!(entry.expected_size, Some(5_000));
        assert_eq!(entry.file_name.as_deref(), Some("episode_2_2.mp3"));
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_run() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(
            FakeServer::new(URL_A, body_of(3_000)).with_resource(URL_B, body_of(5_000)),
        );
        server.script(vec![Fault::Status(404)]);

        let mut orch = orchestrator(&server, dir.path(), false);
        let report = orch.run(&items()).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failures[0].id, "1");
        assert!(report.failures[0].reason.contains("404"));

        let entry = orch.cache().get("1").unwrap();
        assert!(!entry.complete);
        assert!(entry.last_error.is_some());
    }

    #[tokio::test]
    async fn test_resume_after_interrupted_run() {
        let dir = TempDir::new().unwrap();
        let data = body_of(3_411_456);
        let server = Arc::new(FakeServer::new(URL_A, data.clone()).with_chunk_size(64 * 1024));
        let item = Item::new("1599279", "Episode 1", URL_A);

        // Earlier run left 401408 bytes and an incomplete entry.
        let path = dir.path().join("episode_1_1599279.mp3");
        std::fs::write(&path, &data[..401_408]).unwrap();
        let mut cache = CacheStore::load(dir.path().join("cache.json"));
        cache
            .put(
                "1599279",
                CacheEntry::incomplete(Some(3_411_456), "interrupted")
                    .for_file(URL_A, "episode_1_1599279.mp3"),
            )
            .unwrap();

        let mut orch = orchestrator(&server, dir.path(), false);
        let report = orch.run(std::slice::from_ref(&item)).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.resumed, 1);
        assert_eq!(server.requested_offsets(), vec![401_408]);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 3_411_456);

        let entry = orch.cache().get("1599279").unwrap();
        assert!(entry.complete);
        assert_eq!(entry.expected_size, Some(3_411_456));
    }

    #[tokio::test]
    async fn test_interrupt_records_incomplete_entry_and_stops() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(
            FakeServer::new(URL_A, body_of(3_000)).with_resource(URL_B, body_of(5_000)),
        );
        let mut orch = orchestrator(&server, dir.path(), false);
        orch.cancel.store(true, Ordering::SeqCst);

        let report = orch.run(&items()).await;
        assert!(report.interrupted);
        assert_eq!(report.processed(), 0);
        assert!(orch.cache().is_empty());
    }

    #[tokio::test]
    async fn test_checksums_are_stored_when_enabled() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(FakeServer::new(URL_A, body_of(1_000)));
        let mut orch = orchestrator(&server, dir.path(), false).with_checksums(true);

        orch.run(&items()[..1]).await;
        let entry = orch.cache().get("1").unwrap();
        let expected = sha256_file(&dir.path().join("episode_1_1.mp3")).await.unwrap();
        assert_eq!(entry.content_hash.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_hash_mismatch_removes_file() {
        let dir = TempDir::new().unwrap();
        let etag = format!("\"{}\"", "0".repeat(64));
        let server = Arc::new(FakeServer::new(URL_A, body_of(1_000)).with_etag(&etag));
        let mut orch = orchestrator(&server, dir.path(), false);

        let report = orch.run(&items()[..1]).await;
        assert_eq!(report.failed, 1);
        assert!(report.failures[0].reason.contains("hash mismatch"));
        assert!(!dir.path().join("episode_1_1.mp3").exists());
        assert!(!orch.cache().get("1").unwrap().complete);
    }

    #[tokio::test]
    async fn test_stale_complete_entry_restarts() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(FakeServer::new(URL_A, body_of(2_000)));
        let mut cache = CacheStore::load(dir.path().join("cache.json"));
        cache
            .put("1", CacheEntry::completed(2_000, None).for_file(URL_A, "episode_1_1.mp3"))
            .unwrap();

        let mut orch = orchestrator(&server, dir.path(), false);
        let report = orch.run(&items()[..1]).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.resumed, 0);
        assert_eq!(server.requested_offsets(), vec![0]);
    }
}
