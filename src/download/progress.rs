// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Progress reporting for transfers.

use std::time::{Duration, Instant};

use super::types::{format_bytes, Item, ItemOutcome, TransferPlan};

/// Default byte interval between progress reports (1 MiB).
pub const DEFAULT_PROGRESS_INTERVAL_BYTES: u64 = 1_048_576;

/// Minimum time between progress reports.
pub const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(250);

/// Receives per-item progress from the orchestrator.
pub trait ProgressReporter: Send + Sync {
    /// A transfer is about to start.
    fn item_started(&self, _item: &Item, _plan: &TransferPlan, _expected: Option<u64>) {}

    /// Bytes on disk so far, out of the expected total.
    fn item_progress(&self, item: &Item, bytes: u64, total: Option<u64>);

    /// The item reached a terminal state.
    fn item_finished(&self, _item: &Item, _outcome: &ItemOutcome) {}
}

/// Reporter that writes progress lines to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn item_progress(&self, item: &Item, bytes: u64, total: Option<u64>) {
        match total {
            Some(total) if total > 0 => {
                let percent = (bytes as f64 / total as f64) * 100.0;
                tracing::info!(
                    id = %item.id,
                    bytes,
                    total,
                    "Progress: {:.1}% ({}/{})",
                    percent,
                    format_bytes(bytes),
                    format_bytes(total)
                );
            }
            _ => tracing::info!(id = %item.id, bytes, "Progress: {}", format_bytes(bytes)),
        }
    }
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn item_progress(&self, _item: &Item, _bytes: u64, _total: Option<u64>) {}
}

/// Decides when a progress callback is due.
///
/// A report fires once at least `interval_bytes` arrived since the last one
/// and `min_interval` elapsed, or when the total is reached.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval_bytes: u64,
    min_interval: Duration,
    last_bytes: u64,
    last_at: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval_bytes: u64, min_interval: Duration, starting_bytes: u64) -> Self {
        Self {
            interval_bytes: interval_bytes.max(1),
            min_interval,
            last_bytes: starting_bytes,
            last_at: None,
        }
    }

    pub fn should_report(&mut self, bytes: u64, total: Option<u64>) -> bool {
        let finished = total.is_some_and(|t| bytes >= t) && bytes != self.last_bytes;
        let enough_bytes = bytes.saturating_sub(self.last_bytes) >= self.interval_bytes;
        let enough_time = self
            .last_at
            .map(|at| at.elapsed() >= self.min_interval)
            .unwrap_or(true);

        if finished || (enough_bytes && enough_time) {
            self.last_bytes = bytes;
            self.last_at = Some(Instant::now());
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_reports_on_byte_interval() {
        let mut throttle = ProgressThrottle::new(100, Duration::ZERO, 0);
        assert!(!throttle.should_report(50, Some(1000)));
        assert!(throttle.should_report(120, Some(1000)));
        assert!(!throttle.should_report(150, Some(1000)));
        assert!(throttle.should_report(220, Some(1000)));
    }

    #[test]
    fn test_throttle_always_reports_completion_once() {
        let mut throttle = ProgressThrottle::new(1_000_000, Duration::from_secs(3600), 0);
        assert!(!throttle.should_report(10, Some(20)));
        assert!(throttle.should_report(20, Some(20)));
        assert!(!throttle.should_report(20, Some(20)));
    }

    #[test]
    fn test_throttle_respects_time_interval() {
        let mut throttle = ProgressThrottle::new(10, Duration::from_secs(3600), 0);
        assert!(throttle.should_report(10, None));
        // Enough bytes but not enough time
        assert!(!throttle.should_report(100, None));
    }

    #[test]
    fn test_throttle_starts_at_resume_offset() {
        let mut throttle = ProgressThrottle::new(100, Duration::ZERO, 401_408);
        assert!(!throttle.should_report(401_450, None));
        assert!(throttle.should_report(401_508, None));
    }
}
