// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Resumable download engine for castfetch
//!
//! Turns a list of feed items into complete local files, across
//! interruptions, network failures and repeated runs:
//! - Decides per item whether to skip, resume or restart
//! - Resumes with HTTP range requests and retries transient failures
//! - Verifies size (and SHA-256 when known) before marking anything done
//! - Persists every outcome immediately so a crash loses at most one item
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │ Orchestrator    │────▶│ Planner         │──── HEAD probe
//! │ (sequential)    │     │ (decide table)  │
//! └────────┬────────┘     └─────────────────┘
//!          │
//!          ├─────────────▶┌─────────────────┐
//!          │              │ Fetcher         │──── GET Range: bytes=N-
//!          │              │ (RetryPolicy)   │
//!          │              └─────────────────┘
//!          ├─────────────▶┌─────────────────┐
//!          │              │ Verifier        │
//!          │              └─────────────────┘
//!          ▼
//! ┌─────────────────┐
//! │ CacheStore      │
//! │ (atomic JSON)   │
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use std::time::Duration;
//! use castfetch::download::*;
//! use castfetch::naming::{FileNamer, PreferredFormat};
//!
//! # async fn example(items: Vec<Item>) -> anyhow::Result<()> {
//! let client = Arc::new(ReqwestClient::new(Duration::from_secs(30))?);
//! let cancel = Arc::new(AtomicBool::new(false));
//! let namer = FileNamer::new(80, false, PreferredFormat::Auto);
//!
//! let planner = Planner::new(client.clone(), namer, "my_podcast", false);
//! let fetcher = Fetcher::new(client, RetryPolicy::default(), Arc::new(TokioSleeper), cancel.clone());
//! let cache = CacheStore::load("my_podcast/cache.json");
//!
//! let mut orchestrator = Orchestrator::new(planner, fetcher, cache, Arc::new(LogReporter), cancel);
//! let report = orchestrator.run(&items).await;
//! println!("{} downloaded, {} skipped", report.succeeded, report.skipped);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod fetcher;
pub mod http;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod retry;
pub mod state;
pub mod types;
pub mod verify;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used items
pub use error::TransferError;
pub use fetcher::Fetcher;
pub use http::{HttpClient, HttpResponse, RemoteMeta, ReqwestClient};
pub use orchestrator::Orchestrator;
pub use planner::{decide, PlanDecision, Planner, SizeSource};
pub use progress::{LogReporter, NoopReporter, ProgressReporter};
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use state::CacheStore;
pub use types::{CacheEntry, FetchOutcome, Item, ItemOutcome, RunReport, TransferPlan, Verification};
