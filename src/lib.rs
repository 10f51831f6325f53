// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! castfetch - resumable podcast feed downloader library
//!
//! Run it twice, get the same files once.
//!
//! castfetch reads an RSS feed and makes every episode a complete local
//! file, surviving Ctrl+C, flaky networks and repeated runs:
//!
//! **Feed** -> **Plan (skip / resume / restart)** -> **Fetch** -> **Verify** -> **Cache**
//!
//! # Core Modules
//!
//! - [`download`] - Planner, resumable fetcher, verifier, orchestrator and cache store
//! - [`feed`] - RSS retrieval, parsing, episode numbers and ordering
//! - [`naming`] - Sanitized file and directory names
//! - [`config`] - JSON configuration with per-field defaults
//! - [`error`] - Fatal errors, exit codes and consistent formatting

pub mod config;
pub mod download;
pub mod error;
pub mod feed;
pub mod naming;

pub use config::Config;
pub use download::{
    CacheEntry, CacheStore, Fetcher, HttpClient, Item, ItemOutcome, Orchestrator, Planner,
    ProgressReporter, ReqwestClient, RetryPolicy, RunReport, TransferError, TransferPlan,
};
pub use error::{exit_codes, format_error, ErrorBuilder, FatalError};
pub use feed::{candidate_urls, Feed, FeedClient, FeedError, PreferredQuality};
pub use naming::{FileNamer, PreferredFormat};
